//! Downstream that records everything it sees.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use dvdemux::common::errors::FlowError;
use dvdemux::demux::{Caps, Downstream, OutputBuffer, StreamEvent, StreamKind};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Caps(StreamKind, Caps),
    Buffer(StreamKind, OutputBuffer),
    Event(StreamKind, StreamEvent),
}

#[derive(Default)]
pub struct Collector {
    seen: Mutex<Vec<Seen>>,
    unlinked: Mutex<Vec<StreamKind>>,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unlink(&self, kind: StreamKind) {
        self.unlinked.lock().push(kind);
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }

    pub fn buffers(&self, kind: StreamKind) -> Vec<OutputBuffer> {
        self.seen
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Buffer(k, b) if *k == kind => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn caps(&self, kind: StreamKind) -> Vec<Caps> {
        self.seen
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Caps(k, c) if *k == kind => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self, kind: StreamKind) -> Vec<StreamEvent> {
        self.seen
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Event(k, e) if *k == kind => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_eos(&self, kind: StreamKind) -> bool {
        self.events(kind).contains(&StreamEvent::Eos)
    }

    /// Poll until EOS shows up on `kind`.
    pub fn wait_eos(&self, kind: StreamKind) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.has_eos(kind) {
            assert!(Instant::now() < deadline, "timed out waiting for EOS on {kind}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Downstream for Collector {
    fn caps(&self, kind: StreamKind, caps: &Caps) {
        self.seen.lock().push(Seen::Caps(kind, *caps));
    }

    fn buffer(&self, kind: StreamKind, buffer: OutputBuffer) -> Result<(), FlowError> {
        if self.unlinked.lock().contains(&kind) {
            return Err(FlowError::NotLinked);
        }
        self.seen.lock().push(Seen::Buffer(kind, buffer));
        Ok(())
    }

    fn event(&self, kind: StreamKind, event: &StreamEvent) -> bool {
        self.seen.lock().push(Seen::Event(kind, event.clone()));
        true
    }
}

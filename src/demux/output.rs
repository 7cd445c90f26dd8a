//! Output side: the two source pads, what flows over them, and the bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::common::errors::{ErrorDomain, FlowError};
use crate::common::types::ClockTime;
use crate::demux::constants::{CONTAINER_FORMAT, FRAME_WIDTH};
use crate::demux::segment::SegmentEvent;
use crate::demux::types::{Format, StreamKind};

/// Negotiated format of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caps {
    /// Interleaved signed 16-bit PCM in native byte order.
    Audio { rate: u32, channels: u32 },
    /// Compressed DV frames, one per buffer.
    Video {
        width: u32,
        height: u32,
        framerate: (u32, u32),
        pixel_aspect_ratio: (u32, u32),
    },
}

impl Caps {
    pub fn audio(rate: u32, channels: u32) -> Self {
        Self::Audio { rate, channels }
    }

    pub fn video(height: u32, framerate: (u32, u32), pixel_aspect_ratio: (u32, u32)) -> Self {
        Self::Video {
            width: FRAME_WIDTH,
            height,
            framerate,
            pixel_aspect_ratio,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Audio { .. } => "audio/x-raw-int",
            Self::Video { .. } => "video/x-dv",
        }
    }
}

/// One buffer on an output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    pub data: Bytes,
    pub pts: ClockTime,
    pub duration: ClockTime,
    /// Frame index (video) or sample index (audio) of the first unit.
    pub offset: u64,
    pub offset_end: u64,
    /// Set on the first buffer after a new-recording boundary.
    pub discont: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagList {
    pub container_format: String,
}

impl Default for TagList {
    fn default() -> Self {
        Self {
            container_format: CONTAINER_FORMAT.to_string(),
        }
    }
}

/// Out-of-band events travelling alongside buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    FlushStart,
    FlushStop,
    Segment(SegmentEvent),
    Tags(TagList),
    Eos,
}

/// Consumer of the demuxed streams.
///
/// Calls for one stream arrive in order. Audio and video of the same DV
/// frame arrive audio first.
pub trait Downstream: Send + Sync {
    fn pad_added(&self, _kind: StreamKind) {}

    fn pad_removed(&self, _kind: StreamKind) {}

    fn caps(&self, _kind: StreamKind, _caps: &Caps) {}

    /// Accept a buffer. Return `FlowError::NotLinked` when nothing consumes
    /// this stream.
    fn buffer(&self, kind: StreamKind, buffer: OutputBuffer) -> Result<(), FlowError>;

    fn event(&self, _kind: StreamKind, _event: &StreamEvent) -> bool {
        true
    }
}

/// Element-level notifications for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Error { domain: ErrorDomain, detail: String },
    Warning { domain: ErrorDomain, detail: String },
    SegmentStart { format: Format, position: u64 },
    SegmentDone { format: Format, position: Option<u64> },
}

#[derive(Debug, Default)]
struct PadState {
    caps: Option<Caps>,
}

#[derive(Debug, Default)]
struct Sticky {
    segment: Option<SegmentEvent>,
    tags_sent: bool,
}

/// The lazily created source pads and their shared plumbing.
///
/// Pads are only created and given caps from the streaming context. Events
/// can be pushed from any thread; flush start in particular is pushed
/// without the stream lock.
pub struct Outputs {
    sink: Arc<dyn Downstream>,
    pads: RwLock<[Option<PadState>; 2]>,
    sticky: Mutex<Sticky>,
    flushing: AtomicBool,
}

fn slot(kind: StreamKind) -> usize {
    match kind {
        StreamKind::Video => 0,
        StreamKind::Audio => 1,
    }
}

const KINDS: [StreamKind; 2] = [StreamKind::Video, StreamKind::Audio];

impl Outputs {
    pub fn new(sink: Arc<dyn Downstream>) -> Self {
        Self {
            sink,
            pads: RwLock::new([None, None]),
            sticky: Mutex::new(Sticky::default()),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn has_pad(&self, kind: StreamKind) -> bool {
        self.pads.read()[slot(kind)].is_some()
    }

    fn existing(&self) -> Vec<StreamKind> {
        let pads = self.pads.read();
        KINDS
            .into_iter()
            .filter(|kind| pads[slot(*kind)].is_some())
            .collect()
    }

    /// Create the pad for `kind` if it does not exist yet.
    pub fn ensure_pad(&self, kind: StreamKind) {
        {
            let mut pads = self.pads.write();
            if pads[slot(kind)].is_some() {
                return;
            }
            pads[slot(kind)] = Some(PadState::default());
        }
        debug!("adding {} pad", kind);
        self.sink.pad_added(kind);
    }

    /// Set the caps of an existing pad.
    ///
    /// The first caps on a pad are followed by the sticky segment and, if
    /// already announced, the tags.
    pub fn set_caps(&self, kind: StreamKind, caps: Caps) {
        let first = {
            let mut pads = self.pads.write();
            let Some(pad) = pads[slot(kind)].as_mut() else {
                return;
            };
            pad.caps.replace(caps).is_none()
        };

        debug!("{} caps: {:?}", kind, caps);
        self.sink.caps(kind, &caps);

        if first {
            let (segment, tags_sent) = {
                let sticky = self.sticky.lock();
                (sticky.segment, sticky.tags_sent)
            };
            if let Some(segment) = segment {
                self.sink.event(kind, &StreamEvent::Segment(segment));
            }
            if tags_sent {
                self.sink.event(kind, &StreamEvent::Tags(TagList::default()));
            }
        }
    }

    pub fn caps(&self, kind: StreamKind) -> Option<Caps> {
        self.pads.read()[slot(kind)].as_ref().and_then(|pad| pad.caps)
    }

    /// Push a buffer on the pad for `kind`.
    pub fn push(&self, kind: StreamKind, buffer: OutputBuffer) -> Result<(), FlowError> {
        if self.flushing.load(Ordering::Acquire) {
            return Err(FlowError::Flushing);
        }
        if !self.has_pad(kind) {
            return Err(FlowError::NotLinked);
        }
        trace!(
            "pushing {} buffer pts={} offset={}..{}",
            kind, buffer.pts, buffer.offset, buffer.offset_end
        );
        self.sink.buffer(kind, buffer)
    }

    /// Send an event to every existing pad. Returns `true` if any pad took it.
    pub fn push_event(&self, event: StreamEvent) -> bool {
        match &event {
            StreamEvent::FlushStart => self.flushing.store(true, Ordering::Release),
            StreamEvent::FlushStop => self.flushing.store(false, Ordering::Release),
            StreamEvent::Segment(segment) => self.sticky.lock().segment = Some(*segment),
            StreamEvent::Tags(_) => self.sticky.lock().tags_sent = true,
            StreamEvent::Eos => {}
        }

        let mut handled = false;
        for kind in self.existing() {
            handled |= self.sink.event(kind, &event);
        }
        handled
    }

    /// Announce the container format once both pads exist, or on demand at
    /// the end of the stream when only one ever appeared.
    pub fn announce_tags(&self, force: bool) {
        let pads = self.existing();
        if pads.is_empty() || (!force && pads.len() < KINDS.len()) {
            return;
        }
        if self.sticky.lock().tags_sent {
            return;
        }
        self.push_event(StreamEvent::Tags(TagList::default()));
    }

    /// Refuse (or accept again) buffers without telling downstream.
    pub fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::Release);
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Drop both pads and all sticky state.
    pub fn remove_all(&self) {
        let removed = {
            let mut pads = self.pads.write();
            KINDS
                .into_iter()
                .filter(|kind| pads[slot(*kind)].take().is_some())
                .collect::<Vec<_>>()
        };
        for kind in removed {
            debug!("removing {} pad", kind);
            self.sink.pad_removed(kind);
        }
        *self.sticky.lock() = Sticky::default();
        self.flushing.store(false, Ordering::Release);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Record, Recorder};
    use super::*;

    fn segment(start: u64) -> SegmentEvent {
        SegmentEvent {
            update: false,
            rate: 1.0,
            format: Format::Time,
            start,
            stop: None,
            time: start,
        }
    }

    #[test]
    fn sticky_segment_follows_first_caps() {
        let recorder = Arc::new(Recorder::default());
        let outputs = Outputs::new(recorder.clone());

        outputs.push_event(StreamEvent::Segment(segment(5)));
        outputs.ensure_pad(StreamKind::Audio);
        outputs.set_caps(StreamKind::Audio, Caps::audio(48_000, 2));
        outputs.set_caps(StreamKind::Audio, Caps::audio(32_000, 2));

        assert_eq!(
            recorder.take(),
            vec![
                Record::Added(StreamKind::Audio),
                Record::Caps(StreamKind::Audio, Caps::audio(48_000, 2)),
                Record::Event(StreamKind::Audio, StreamEvent::Segment(segment(5))),
                Record::Caps(StreamKind::Audio, Caps::audio(32_000, 2)),
            ]
        );
    }

    #[test]
    fn push_without_pad_is_not_linked() {
        let outputs = Outputs::new(Arc::new(Recorder::default()));
        let buffer = OutputBuffer {
            data: Bytes::new(),
            pts: 0,
            duration: 0,
            offset: 0,
            offset_end: 1,
            discont: false,
        };
        assert!(matches!(
            outputs.push(StreamKind::Video, buffer.clone()),
            Err(FlowError::NotLinked)
        ));

        outputs.ensure_pad(StreamKind::Video);
        outputs.push_event(StreamEvent::FlushStart);
        assert!(matches!(
            outputs.push(StreamKind::Video, buffer.clone()),
            Err(FlowError::Flushing)
        ));
        outputs.push_event(StreamEvent::FlushStop);
        assert!(outputs.push(StreamKind::Video, buffer).is_ok());
    }

    #[test]
    fn tags_wait_for_both_pads() {
        let recorder = Arc::new(Recorder::default());
        let outputs = Outputs::new(recorder.clone());

        outputs.ensure_pad(StreamKind::Video);
        outputs.announce_tags(false);
        assert!(recorder.events(StreamKind::Video).is_empty());

        outputs.ensure_pad(StreamKind::Audio);
        outputs.announce_tags(false);
        outputs.announce_tags(true);
        let tags = StreamEvent::Tags(TagList::default());
        assert_eq!(recorder.events(StreamKind::Video), vec![tags.clone()]);
        assert_eq!(recorder.events(StreamKind::Audio), vec![tags]);
    }

    #[test]
    fn remove_all_resets_sticky_state() {
        let recorder = Arc::new(Recorder::default());
        let outputs = Outputs::new(recorder.clone());
        outputs.ensure_pad(StreamKind::Video);
        outputs.push_event(StreamEvent::Segment(segment(0)));
        outputs.remove_all();
        assert!(!outputs.has_pad(StreamKind::Video));

        recorder.take();
        outputs.ensure_pad(StreamKind::Video);
        outputs.set_caps(StreamKind::Video, Caps::video(576, (25, 1), (59, 54)));
        assert!(recorder.events(StreamKind::Video).is_empty());
    }
}

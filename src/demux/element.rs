//! The demuxer element: one sink, up to two lazily created sources.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::common::errors::{ConvertError, DemuxError, ErrorDomain, FlowError, SeekError};
use crate::configs::SchedulingPreference;
use crate::demux::codec::{DifCodec, DvCodec};
use crate::demux::core::{DemuxCore, Shared};
use crate::demux::output::{BusMessage, Downstream, Outputs, StreamEvent};
use crate::demux::pull::{PullScheduler, PullTask};
use crate::demux::push::{InputChunk, PushScheduler};
use crate::demux::segment::SeekEvent;
use crate::demux::types::{Format, StreamKind};
use crate::source::Upstream;

/// Scheduling mode chosen at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    Push,
    Pull,
}

pub(crate) enum SchedulingMode {
    Inactive,
    Push(PushScheduler),
    Pull(PullScheduler),
}

impl SchedulingMode {
    fn active(&self) -> Option<ActiveMode> {
        match self {
            Self::Inactive => None,
            Self::Push(_) => Some(ActiveMode::Push),
            Self::Pull(_) => Some(ActiveMode::Pull),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) shared: Arc<Shared>,
    /// The stream lock.
    pub(crate) core: Mutex<DemuxCore>,
    pub(crate) upstream: Arc<dyn Upstream>,
    mode: RwLock<SchedulingMode>,
}

impl Inner {
    fn handle_seek(&self, kind: StreamKind, seek: &SeekEvent) -> Result<(), SeekError> {
        let mode = self.mode.read();
        match &*mode {
            SchedulingMode::Inactive => Err(SeekError::Inactive),
            SchedulingMode::Push(push) => {
                push.handle_seek(self.upstream.as_ref(), &self.shared.params(), kind, seek)
            }
            SchedulingMode::Pull(pull) => pull.handle_seek(self, kind, seek),
        }
    }
}

/// DV system-stream demultiplexer.
///
/// Splits interleaved DV into a compressed video stream (one frame per
/// buffer) and a raw PCM audio stream. Upstream is either pulled from by an
/// internal task or pushes chunks through [`DvDemux::chain`].
pub struct DvDemux {
    inner: Arc<Inner>,
    bus: flume::Receiver<BusMessage>,
}

impl DvDemux {
    pub fn new(downstream: Arc<dyn Downstream>, upstream: Arc<dyn Upstream>) -> Self {
        Self::with_codec(downstream, upstream, Box::new(DifCodec::new()))
    }

    pub fn with_codec(
        downstream: Arc<dyn Downstream>,
        upstream: Arc<dyn Upstream>,
        codec: Box<dyn DvCodec>,
    ) -> Self {
        let (tx, bus) = flume::unbounded();
        let shared = Arc::new(Shared::new(Outputs::new(downstream), tx));
        let core = DemuxCore::new(shared.clone(), codec);

        Self {
            inner: Arc::new(Inner {
                shared,
                core: Mutex::new(core),
                upstream,
                mode: RwLock::new(SchedulingMode::Inactive),
            }),
            bus,
        }
    }

    /// Receiver for errors, warnings and segment messages.
    pub fn bus(&self) -> flume::Receiver<BusMessage> {
        self.bus.clone()
    }

    pub fn mode(&self) -> Option<ActiveMode> {
        self.inner.mode.read().active()
    }

    pub fn is_header_found(&self) -> bool {
        self.inner.shared.gate.is_found()
    }

    /// Start processing. An already active element is deactivated first.
    pub fn activate(&self, preference: SchedulingPreference) -> Result<ActiveMode, DemuxError> {
        self.deactivate();

        let mut mode = self.inner.mode.write();
        self.inner.core.lock().reset();

        let pull = match preference {
            SchedulingPreference::Auto => self.inner.upstream.supports_pull(),
            SchedulingPreference::Push => false,
            SchedulingPreference::Pull => {
                let supported = self.inner.upstream.supports_pull();
                if !supported {
                    warn!("upstream cannot be pulled from, falling back to push");
                }
                supported
            }
        };

        if !pull {
            *mode = SchedulingMode::Push(PushScheduler);
            info!("activated in push mode");
            return Ok(ActiveMode::Push);
        }

        let task = PullTask::spawn(Arc::downgrade(&self.inner))?;
        self.inner.core.lock().running = true;
        task.start();
        *mode = SchedulingMode::Pull(PullScheduler::new(task));
        info!("activated in pull mode");
        Ok(ActiveMode::Pull)
    }

    /// Stop processing, drop both outputs and forget any parked seek.
    pub fn deactivate(&self) {
        let mut mode = self.inner.mode.write();
        let previous = std::mem::replace(&mut *mode, SchedulingMode::Inactive);
        let shared = &self.inner.shared;

        match previous {
            SchedulingMode::Inactive => return,
            SchedulingMode::Push(_) => {}
            SchedulingMode::Pull(pull) => {
                shared.outputs.set_flushing(true);
                pull.shutdown();
            }
        }

        {
            let mut core = self.inner.core.lock();
            core.running = false;
            core.adapter.clear();
        }
        shared.outputs.remove_all();
        shared.gate.clear();
        debug!("deactivated");
    }

    /// Feed one chunk in push mode.
    ///
    /// Fatal errors are also posted on the bus and followed by EOS.
    pub fn chain(&self, chunk: InputChunk) -> Result<(), FlowError> {
        if self.mode() != Some(ActiveMode::Push) {
            return Err(FlowError::Flushing);
        }

        let (result, replay) = {
            let mut core = self.inner.core.lock();
            let result = core.chain(chunk);
            (result, core.replay_seek.take())
        };

        if let Some(seek) = replay {
            info!("performing seek received before the first frame");
            if let Err(e) = self.inner.handle_seek(StreamKind::Video, &seek) {
                warn!("initial seek failed: {}", e);
                self.inner.shared.post(BusMessage::Warning {
                    domain: ErrorDomain::Failed,
                    detail: format!("Error performing initial seek: {e}"),
                });
            }
        }

        if let Err(FlowError::Error(e)) = &result {
            error!("streaming stopped: {}", e);
            self.inner.shared.post_error(e);
            self.inner.shared.outputs.push_event(StreamEvent::Eos);
        }
        result
    }

    /// Handle an event arriving on the sink.
    pub fn sink_event(&self, event: StreamEvent) -> bool {
        if matches!(event, StreamEvent::FlushStart) {
            return self.inner.shared.outputs.push_event(event);
        }
        self.inner.core.lock().sink_event(event)
    }

    /// Element-level seek, expressed against the video stream. Parked until
    /// the first header has been parsed.
    pub fn send_seek(&self, seek: SeekEvent) -> Result<(), SeekError> {
        match self.inner.shared.gate.defer_seek(seek) {
            None => {
                info!("keeping the seek event for later");
                Ok(())
            }
            Some(seek) => self.inner.handle_seek(StreamKind::Video, &seek),
        }
    }

    /// Seek arriving on the output for `kind`.
    pub fn pad_seek(&self, kind: StreamKind, seek: SeekEvent) -> Result<(), SeekError> {
        self.inner.handle_seek(kind, &seek)
    }

    /// Current position of stream `kind`.
    pub fn query_position(&self, kind: StreamKind, format: Format) -> Result<u64, ConvertError> {
        let position = self.inner.shared.position.load(Ordering::Acquire);
        self.inner
            .shared
            .params()
            .src_convert(kind, Format::Time, position, format)
    }

    /// Duration of stream `kind`, or `None` while upstream's size is unknown.
    pub fn query_duration(
        &self,
        kind: StreamKind,
        format: Format,
    ) -> Result<Option<u64>, ConvertError> {
        let Some(size) = self.inner.upstream.size() else {
            return Ok(None);
        };
        let params = self.inner.shared.params();
        let time = params.sink_convert(Format::Bytes, size, Format::Time)?;
        params.src_convert(kind, Format::Time, time, format).map(Some)
    }

    /// Convert a value on the input side.
    pub fn convert_sink(&self, src: Format, value: u64, dst: Format) -> Result<u64, ConvertError> {
        self.inner.shared.params().sink_convert(src, value, dst)
    }

    /// Convert a value on the output for `kind`.
    pub fn convert_src(
        &self,
        kind: StreamKind,
        src: Format,
        value: u64,
        dst: Format,
    ) -> Result<u64, ConvertError> {
        self.inner.shared.params().src_convert(kind, src, value, dst)
    }
}

impl Drop for DvDemux {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::demux::constants::{PAL_FRAME_SIZE, SECOND};
    use crate::demux::output::testing::{Record, Recorder};
    use crate::demux::synth::FrameBuilder;
    use crate::demux::types::DvSystem;
    use crate::source::MemorySource;

    fn wait_for_eos(recorder: &Recorder, kind: StreamKind) {
        for _ in 0..500 {
            if recorder.events(kind).contains(&StreamEvent::Eos) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("no EOS on {kind}");
    }

    #[test]
    fn auto_picks_pull_for_random_access() {
        let recorder = Arc::new(Recorder::default());
        let stream = FrameBuilder::new(DvSystem::Pal).build_stream(2);
        let demux = DvDemux::new(recorder.clone(), Arc::new(MemorySource::new(stream)));

        assert_eq!(
            demux.activate(SchedulingPreference::Auto).unwrap(),
            ActiveMode::Pull
        );
        wait_for_eos(&recorder, StreamKind::Video);
        assert_eq!(recorder.buffers(StreamKind::Video).len(), 2);
        assert!(matches!(
            demux.chain(InputChunk::new(vec![0u8; 4])),
            Err(FlowError::Flushing)
        ));
    }

    #[test]
    fn pull_preference_falls_back_to_push() {
        let recorder = Arc::new(Recorder::default());
        let source = Arc::new(MemorySource::push_only(Vec::new()));
        let demux = DvDemux::new(recorder, source);
        assert_eq!(
            demux.activate(SchedulingPreference::Pull).unwrap(),
            ActiveMode::Push
        );
    }

    #[test]
    fn seek_while_inactive_fails() {
        let recorder = Arc::new(Recorder::default());
        let demux = DvDemux::new(recorder, Arc::new(MemorySource::new(Vec::new())));
        assert_eq!(
            demux.pad_seek(StreamKind::Video, SeekEvent::time(0, None)),
            Err(SeekError::Inactive)
        );
    }

    #[test]
    fn queries_follow_parameters() {
        let recorder = Arc::new(Recorder::default());
        let stream = FrameBuilder::new(DvSystem::Pal)
            .audio(48_000, 1_920)
            .build_stream(50);
        let source = Arc::new(MemorySource::push_only(stream.clone()));
        let demux = DvDemux::new(recorder, source);
        demux.activate(SchedulingPreference::Auto).unwrap();

        assert_eq!(
            demux.query_duration(StreamKind::Video, Format::Time),
            Err(ConvertError::FormatUnknown)
        );

        demux
            .chain(InputChunk::new(stream[..PAL_FRAME_SIZE * 25].to_vec()))
            .unwrap();
        assert_eq!(
            demux.query_position(StreamKind::Video, Format::Time),
            Ok(SECOND)
        );
        assert_eq!(
            demux.query_position(StreamKind::Video, Format::Default),
            Ok(25)
        );
        assert_eq!(
            demux.query_position(StreamKind::Audio, Format::Default),
            Ok(48_000)
        );
        assert_eq!(
            demux.query_duration(StreamKind::Video, Format::Time),
            Ok(Some(2 * SECOND))
        );
        assert_eq!(
            demux.convert_sink(Format::Time, SECOND, Format::Bytes),
            Ok(PAL_FRAME_SIZE as u64 * 25)
        );
        assert_eq!(
            demux.convert_src(StreamKind::Audio, Format::Default, 48_000, Format::Bytes),
            Ok(192_000)
        );
    }

    #[test]
    fn deactivate_removes_outputs() {
        let recorder = Arc::new(Recorder::default());
        let frame = FrameBuilder::new(DvSystem::Ntsc).build();
        let source = Arc::new(MemorySource::push_only(frame.clone()));
        let demux = DvDemux::new(recorder.clone(), source);
        demux.activate(SchedulingPreference::Push).unwrap();
        demux.chain(InputChunk::new(frame)).unwrap();

        demux.deactivate();
        assert_eq!(demux.mode(), None);
        assert!(!demux.is_header_found());
        assert!(recorder.take().contains(&Record::Removed(StreamKind::Video)));
    }
}

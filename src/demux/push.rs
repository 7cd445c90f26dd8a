//! Push scheduling: upstream hands over arbitrary chunks, the element
//! accumulates them into frames.

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::common::errors::{DemuxError, FlowError, SeekError};
use crate::common::types::ClockTime;
use crate::demux::constants::NTSC_FRAME_SIZE;
use crate::demux::convert::StreamParams;
use crate::demux::core::DemuxCore;
use crate::demux::output::StreamEvent;
use crate::demux::segment::{SeekEvent, Segment};
use crate::demux::types::{Format, StreamKind};
use crate::source::Upstream;

/// A chunk of the byte stream as delivered by upstream.
#[derive(Debug, Clone)]
pub struct InputChunk {
    pub data: Bytes,
    /// Presentation time of the chunk, if upstream knows it.
    pub pts: Option<ClockTime>,
    /// The chunk does not continue the previous one.
    pub discont: bool,
}

impl InputChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            discont: false,
        }
    }

    pub fn with_pts(mut self, pts: ClockTime) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn discontinuous(mut self) -> Self {
        self.discont = true;
        self
    }
}

impl DemuxCore {
    /// Accept one upstream chunk and demux every complete frame it finishes.
    pub(crate) fn chain(&mut self, chunk: InputChunk) -> Result<(), FlowError> {
        if chunk.discont {
            debug!(
                "discontinuity, dropping {} buffered bytes",
                self.adapter.available()
            );
            self.adapter.clear();
        }

        // FIXME: the frame counters are not realigned to the new time.
        if let Some(pts) = chunk.pts {
            self.set_position(pts);
        }

        self.adapter.push(&chunk.data);

        if self.frame_len.is_none() {
            self.frame_len = Some(NTSC_FRAME_SIZE);
        }
        self.flush_adapter()
    }

    /// Demux buffered frames for as long as a whole frame is available.
    pub(crate) fn flush_adapter(&mut self) -> Result<(), FlowError> {
        while let Some(len) = self
            .frame_len
            .filter(|len| self.adapter.available() >= *len)
        {
            let header = self.parse_buffered_header(len)?;

            if !self.shared().gate.is_found() {
                if let Some(seek) = self.shared().gate.mark_found() {
                    self.replay_seek = Some(seek);
                }
            }

            if self.adapter.available() < header.frame_size {
                // A PAL frame needs more than the probe.
                continue;
            }
            let frame = self
                .adapter
                .take(header.frame_size)
                .map_err(DemuxError::from)?;
            self.demux_frame(frame)?;
        }
        Ok(())
    }

    /// Handle a serialized event from upstream. Flush start is not
    /// serialized and never reaches here.
    pub(crate) fn sink_event(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::FlushStart | StreamEvent::Tags(_) => {
                self.shared().outputs.push_event(event)
            }
            StreamEvent::FlushStop => {
                self.adapter.clear();
                self.byte_segment = Segment::new(Format::Bytes);
                self.time_segment = Segment::new(Format::Time);
                self.sync_position();
                self.shared().outputs.push_event(event)
            }
            StreamEvent::Segment(segment) => match segment.format {
                Format::Bytes => {
                    debug!(
                        "byte segment {}..{:?} update {}",
                        segment.start, segment.stop, segment.update
                    );
                    self.byte_segment.set_newsegment(&segment);
                    if segment.update {
                        let close = self.time_segment.closing_update();
                        self.shared()
                            .outputs
                            .push_event(StreamEvent::Segment(close));
                    } else {
                        // Announced in time once the next frame goes out.
                        self.need_segment = true;
                    }
                    true
                }
                Format::Time => {
                    self.time_segment.set_newsegment(&segment);
                    self.sync_position();
                    self.shared()
                        .outputs
                        .push_event(StreamEvent::Segment(segment))
                }
                Format::Default => {
                    warn!("refusing segment in {:?} format", segment.format);
                    false
                }
            },
            StreamEvent::Eos => {
                match self.flush_adapter() {
                    Err(FlowError::Error(e)) => {
                        warn!("dropping trailing data: {}", e);
                    }
                    Err(e) => debug!("trailing frames not pushed: {}", e),
                    Ok(()) => {}
                }
                let outputs = &self.shared().outputs;
                outputs.announce_tags(true);
                let handled = outputs.push_event(StreamEvent::Eos);
                self.adapter.clear();
                handled
            }
        }
    }
}

/// Seek handling while upstream drives the data flow.
///
/// The element cannot reposition itself; it translates the request into
/// something upstream understands and forwards it.
#[derive(Debug, Default)]
pub(crate) struct PushScheduler;

impl PushScheduler {
    pub fn handle_seek(
        &self,
        upstream: &dyn Upstream,
        params: &StreamParams,
        kind: StreamKind,
        seek: &SeekEvent,
    ) -> Result<(), SeekError> {
        if seek.format == Format::Time && upstream.seek(seek) {
            debug!("upstream handled the time seek");
            return Ok(());
        }

        let start = params.convert_src_to_sink(kind, seek.format, seek.start, Format::Bytes)?;
        let stop = seek
            .stop
            .map(|stop| params.convert_src_to_sink(kind, seek.format, stop, Format::Bytes))
            .transpose()?;

        let byte_seek = SeekEvent {
            format: Format::Bytes,
            start,
            stop,
            ..seek.clone()
        };
        info!("forwarding byte seek {}..{:?} upstream", start, stop);
        if upstream.seek(&byte_seek) {
            Ok(())
        } else {
            Err(SeekError::Rejected)
        }
    }
}

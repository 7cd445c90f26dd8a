//! Demux/dispatch core.
//!
//! `DemuxCore` is the state guarded by the stream lock. Whoever holds the
//! lock (the pull task, or the caller pushing data) owns the decode loop.
//! The few pieces other threads need to see are kept in [`Shared`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::common::errors::{ConvertError, DemuxError, FlowError, HeaderError, SeekError};
use crate::common::types::ClockTime;
use crate::demux::adapter::Adapter;
use crate::demux::codec::DvCodec;
use crate::demux::constants::*;
use crate::demux::convert::StreamParams;
use crate::demux::header::{self, FrameHeader};
use crate::demux::output::{BusMessage, Caps, OutputBuffer, Outputs, StreamEvent};
use crate::demux::segment::{SeekEvent, Segment, SegmentEvent};
use crate::demux::types::{DvSystem, Format, StreamKind};

/// Header discovery flag plus the seek parked until it happens.
///
/// The flag is readable without locking for fast checks; storing a seek and
/// flipping the flag both happen under the same mutex so a seek can never
/// slip between "not found yet" and "found".
#[derive(Debug, Default)]
pub(crate) struct HeaderGate {
    found: AtomicBool,
    pending_seek: Mutex<Option<SeekEvent>>,
}

impl HeaderGate {
    pub fn is_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    /// Park `seek` if no header has been seen yet. Gives the seek back when
    /// it can be executed right away.
    pub fn defer_seek(&self, seek: SeekEvent) -> Option<SeekEvent> {
        let mut pending = self.pending_seek.lock();
        if self.found.load(Ordering::Acquire) {
            return Some(seek);
        }
        *pending = Some(seek);
        None
    }

    /// Record header discovery and hand out the parked seek, if any.
    pub fn mark_found(&self) -> Option<SeekEvent> {
        let mut pending = self.pending_seek.lock();
        self.found.store(true, Ordering::Release);
        pending.take()
    }

    /// Forget the discovery but keep a parked seek for the next run.
    pub fn rearm(&self) {
        let _pending = self.pending_seek.lock();
        self.found.store(false, Ordering::Release);
    }

    pub fn clear(&self) {
        let mut pending = self.pending_seek.lock();
        self.found.store(false, Ordering::Release);
        *pending = None;
    }
}

/// State visible outside the stream lock.
pub(crate) struct Shared {
    pub params: RwLock<StreamParams>,
    /// Time-segment position, for position queries.
    pub position: AtomicU64,
    pub gate: HeaderGate,
    pub outputs: Outputs,
    pub bus: flume::Sender<BusMessage>,
}

impl Shared {
    pub fn new(outputs: Outputs, bus: flume::Sender<BusMessage>) -> Self {
        Self {
            params: RwLock::new(StreamParams::default()),
            position: AtomicU64::new(0),
            gate: HeaderGate::default(),
            outputs,
            bus,
        }
    }

    pub fn params(&self) -> StreamParams {
        *self.params.read()
    }

    pub fn post(&self, message: BusMessage) {
        // Nobody listening is fine.
        let _ = self.bus.send(message);
    }

    pub fn post_error(&self, error: &DemuxError) {
        self.post(BusMessage::Error {
            domain: error.domain(),
            detail: error.to_string(),
        });
    }
}

pub(crate) struct DemuxCore {
    shared: Arc<Shared>,
    codec: Box<dyn DvCodec>,
    pub(crate) adapter: Adapter,

    pub(crate) frame_len: Option<usize>,
    fps_n: u32,
    fps_d: u32,
    height: u32,
    wide: bool,
    frequency: u32,
    channels: u32,

    pub(crate) video_offset: u64,
    pub(crate) audio_offset: u64,
    pub(crate) frame_offset: u64,

    pub(crate) byte_segment: Segment,
    pub(crate) time_segment: Segment,

    new_media: bool,
    frames_since_new_media: u32,

    pub(crate) need_segment: bool,
    pub(crate) pending_segment: Option<SegmentEvent>,
    /// Seek released by header discovery in push mode, forwarded once the
    /// current chunk is done.
    pub(crate) replay_seek: Option<SeekEvent>,
    pub(crate) running: bool,

    audio_scratch: Vec<Vec<i16>>,
}

impl DemuxCore {
    pub fn new(shared: Arc<Shared>, codec: Box<dyn DvCodec>) -> Self {
        Self {
            shared,
            codec,
            adapter: Adapter::new(),
            frame_len: None,
            fps_n: 0,
            fps_d: 0,
            height: 0,
            wide: false,
            frequency: 0,
            channels: 0,
            video_offset: 0,
            audio_offset: 0,
            frame_offset: 0,
            byte_segment: Segment::new(Format::Bytes),
            time_segment: Segment::new(Format::Time),
            new_media: false,
            frames_since_new_media: NEW_MEDIA_DEBOUNCE_FRAMES,
            need_segment: false,
            pending_segment: None,
            replay_seek: None,
            running: false,
            audio_scratch: vec![Vec::new(); MAX_AUDIO_CHANNELS],
        }
    }

    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Back to the state of a freshly created element.
    pub fn reset(&mut self) {
        self.codec.reset();
        self.adapter.clear();
        self.frame_len = None;
        self.fps_n = 0;
        self.fps_d = 0;
        self.height = 0;
        self.wide = false;
        self.frequency = 0;
        self.channels = 0;
        self.video_offset = 0;
        self.audio_offset = 0;
        self.frame_offset = 0;
        self.byte_segment = Segment::new(Format::Bytes);
        self.time_segment = Segment::new(Format::Time);
        self.new_media = false;
        self.frames_since_new_media = NEW_MEDIA_DEBOUNCE_FRAMES;
        self.need_segment = false;
        self.pending_segment = None;
        self.replay_seek = None;
        self.running = false;

        self.shared.gate.rearm();
        *self.shared.params.write() = StreamParams::default();
        self.sync_position();
    }

    pub fn params(&self) -> StreamParams {
        self.shared.params()
    }

    fn publish_params(&self) {
        let frequency = if self.frequency != 0 {
            self.frequency
        } else {
            self.codec.frequency()
        };
        let channels = if self.channels != 0 {
            self.channels
        } else {
            self.codec.channels()
        };

        *self.shared.params.write() = StreamParams {
            frame_len: self.frame_len.map(|len| len as u64),
            fps_n: self.fps_n.into(),
            fps_d: self.fps_d.into(),
            frequency: frequency.into(),
            channels: channels.into(),
        };
    }

    pub fn set_position(&mut self, position: ClockTime) {
        self.time_segment.position = position;
        self.sync_position();
    }

    pub fn sync_position(&self) {
        self.shared
            .position
            .store(self.time_segment.position, Ordering::Release);
    }

    /// Adopt a parsed header: frame length and framerate.
    pub fn apply_header(&mut self, header: FrameHeader) {
        if self.frame_len != Some(header.frame_size) {
            debug!(
                "{} stream, frame length {} bytes",
                header.system, header.frame_size
            );
        }
        let (fps_n, fps_d) = header.system.framerate();
        self.frame_len = Some(header.frame_size);
        self.fps_n = fps_n;
        self.fps_d = fps_d;
        self.publish_params();
    }

    pub fn parse_header(&mut self, data: &[u8]) -> Result<FrameHeader, HeaderError> {
        let header = self.codec.parse_header(data)?;
        self.apply_header(header);
        Ok(header)
    }

    /// Parse the header at the front of the accumulator without consuming it.
    pub fn parse_buffered_header(&mut self, len: usize) -> Result<FrameHeader, FlowError> {
        let probe = self.adapter.peek(len).map_err(DemuxError::from)?;
        let header = self.codec.parse_header(probe)?;
        self.apply_header(header);
        Ok(header)
    }

    /// Read the audio packs of the probe so conversions know the sample
    /// rate before the first audio buffer goes out.
    pub fn prime_audio_params(&mut self, data: &[u8]) {
        if let Err(e) = self.codec.parse_packs(data) {
            debug!("no audio parameters in probe: {}", e);
        }
        self.publish_params();
    }

    /// Store the stream duration given the upstream size in bytes.
    pub fn discover_duration(&mut self, size: Option<u64>) {
        let Some(size) = size else {
            return;
        };
        match self.params().sink_convert(Format::Bytes, size, Format::Time) {
            Ok(duration) => {
                debug!("duration {} ns ({} bytes)", duration, size);
                self.time_segment.duration = Some(duration);
            }
            Err(e) => debug!("cannot compute duration: {}", e),
        }
    }

    /// Announce the time segment derived from the byte segment.
    fn send_need_segment(&mut self) -> Result<(), DemuxError> {
        let params = self.params();
        let (start, stop) = params
            .convert_sink_pair(
                Format::Bytes,
                self.byte_segment.start,
                self.byte_segment.stop,
                Format::Time,
            )
            .map_err(DemuxError::Segment)?;

        self.time_segment.start = start;
        self.time_segment.stop = stop;
        self.time_segment.time = start;
        self.time_segment.rate = self.byte_segment.rate;
        self.set_position(start);

        self.frame_offset = params
            .src_convert(StreamKind::Video, Format::Time, start, Format::Default)
            .map_err(DemuxError::Segment)?;
        self.video_offset = self.frame_offset;
        self.audio_offset = params
            .src_convert(StreamKind::Audio, Format::Time, start, Format::Default)
            .unwrap_or(0);

        debug!("sending segment start {} stop {:?}", start, stop);
        self.shared
            .outputs
            .push_event(StreamEvent::Segment(SegmentEvent {
                update: false,
                rate: self.byte_segment.rate,
                format: Format::Time,
                start,
                stop,
                time: start,
            }));
        self.need_segment = false;
        Ok(())
    }

    /// Demux one complete frame into an audio and a video buffer.
    ///
    /// Returns `NotLinked` only when neither output has a consumer and `Eos`
    /// once the position passes the segment stop.
    pub fn demux_frame(&mut self, frame: Bytes) -> Result<(), FlowError> {
        if let Some(segment) = self.pending_segment.take() {
            debug!("sending pending segment from {}", segment.start);
            self.shared.outputs.push_event(StreamEvent::Segment(segment));
        }
        if self.need_segment {
            self.send_need_segment()?;
        }

        let params = self.params();
        let dif_sequences = self.codec.dif_sequences();

        if let Some(timecode) = header::get_timecode(&frame, dif_sequences) {
            let system = self.codec.system().unwrap_or(DvSystem::Ntsc);
            debug!(
                "timecode {} (frame {})",
                timecode,
                timecode.frame_number(system)
            );
        }

        let next_ts = params
            .frame_timestamp(self.frame_offset + 1)
            .map_err(DemuxError::Segment)?;
        let duration = next_ts.saturating_sub(self.time_segment.position);

        if let Err(e) = self.codec.parse_packs(&frame) {
            trace!("keeping previous stream parameters: {}", e);
        }

        self.new_media = header::is_new_media(&frame, dif_sequences)
            && self.frames_since_new_media >= NEW_MEDIA_DEBOUNCE_FRAMES;
        if self.new_media {
            info!("new recording starts at frame {}", self.frame_offset);
            self.frames_since_new_media = 0;
        } else {
            self.frames_since_new_media = self.frames_since_new_media.saturating_add(1);
        }

        let audio_unlinked = match self.demux_audio(&frame, duration) {
            Ok(()) => false,
            Err(FlowError::NotLinked) => true,
            Err(e) => return Err(e),
        };
        let video_unlinked = match self.demux_video(frame, duration) {
            Ok(()) => false,
            Err(FlowError::NotLinked) => true,
            Err(e) => return Err(e),
        };
        if audio_unlinked && video_unlinked {
            return Err(FlowError::NotLinked);
        }

        self.set_position(next_ts);
        self.frame_offset += 1;

        if self.time_segment.is_past_stop(next_ts) {
            return Err(FlowError::Eos);
        }
        Ok(())
    }

    /// Decode, interleave and push the frame's audio. Borrows the frame.
    fn demux_audio(&mut self, frame: &[u8], duration: ClockTime) -> Result<(), FlowError> {
        let samples = self.codec.decode_audio(frame, &mut self.audio_scratch);
        if samples == 0 {
            return Ok(());
        }

        let outputs = &self.shared.outputs;
        outputs.ensure_pad(StreamKind::Audio);

        let frequency = self.codec.frequency();
        let channels = self.codec.channels();
        if frequency != self.frequency || channels != self.channels {
            self.frequency = frequency;
            self.channels = channels;
            outputs.set_caps(StreamKind::Audio, Caps::audio(frequency, channels));
            outputs.announce_tags(false);
            self.publish_params();
        }

        let channels = (channels as usize).min(self.audio_scratch.len());
        let mut data = BytesMut::with_capacity(samples * channels * AUDIO_SAMPLE_BYTES as usize);
        for index in 0..samples {
            for channel in &self.audio_scratch[..channels] {
                data.put_i16_ne(channel.get(index).copied().unwrap_or(0));
            }
        }

        let offset = self.audio_offset;
        self.audio_offset += samples as u64;
        let buffer = OutputBuffer {
            data: data.freeze(),
            pts: self.time_segment.position,
            duration,
            offset,
            offset_end: self.audio_offset,
            discont: self.new_media,
        };
        self.shared.outputs.push(StreamKind::Audio, buffer)
    }

    /// Retag the frame as the video buffer. Takes ownership of the frame.
    fn demux_video(&mut self, frame: Bytes, duration: ClockTime) -> Result<(), FlowError> {
        let outputs = &self.shared.outputs;
        outputs.ensure_pad(StreamKind::Video);

        let height = self.codec.height();
        let wide = self.codec.is_wide();
        if height != self.height || wide != self.wide {
            self.height = height;
            self.wide = wide;
            let system = self.codec.system().unwrap_or(DvSystem::Ntsc);
            let caps = Caps::video(
                height,
                (self.fps_n, self.fps_d),
                system.pixel_aspect_ratio(wide),
            );
            outputs.set_caps(StreamKind::Video, caps);
            outputs.announce_tags(false);
        }

        let buffer = OutputBuffer {
            data: frame,
            pts: self.time_segment.position,
            duration,
            offset: self.video_offset,
            offset_end: self.video_offset + 1,
            discont: self.new_media,
        };
        let result = outputs.push(StreamKind::Video, buffer);
        self.video_offset += 1;
        result
    }

    /// Point the byte segment and the counters at `segment`, a time segment.
    ///
    /// Nothing is modified unless every conversion succeeds.
    fn do_seek(&mut self, segment: &Segment) -> Result<(), ConvertError> {
        let params = self.params();
        let to_bytes = |value: u64| {
            params.convert_src_to_sink(StreamKind::Video, Format::Time, value, Format::Bytes)
        };

        let start = to_bytes(segment.start)?;
        let stop = segment.stop.map(to_bytes).transpose()?;
        let position = to_bytes(segment.position)?;
        let time = to_bytes(segment.time)?;

        let video_offset =
            params.src_convert(StreamKind::Video, Format::Time, segment.start, Format::Default)?;
        let audio_offset = params
            .src_convert(StreamKind::Audio, Format::Time, segment.start, Format::Default)
            .unwrap_or_else(|e| {
                debug!("audio offset unknown, restarting at 0: {}", e);
                0
            });

        self.byte_segment.rate = segment.rate;
        self.byte_segment.flags = segment.flags;
        self.byte_segment.start = start;
        self.byte_segment.stop = stop;
        self.byte_segment.position = position;
        self.byte_segment.time = time;

        self.video_offset = video_offset;
        self.audio_offset = audio_offset;
        self.frame_offset = video_offset;
        Ok(())
    }

    /// Configure a pull-mode seek. `seek` must already be in time format and
    /// the task must be quiescent (the caller holds the stream lock).
    ///
    /// On success the new segment is stashed for the next `demux_frame`.
    pub fn configure_pull_seek(&mut self, seek: &SeekEvent) -> Result<(), SeekError> {
        let mut scratch = self.time_segment;
        scratch.set_seek(seek);
        debug!(
            "segment configured from {} to {:?}, position {}",
            scratch.start, scratch.stop, scratch.position
        );

        let result = self.do_seek(&scratch);

        let outputs = &self.shared.outputs;
        if seek.flags.flush {
            outputs.push_event(StreamEvent::FlushStop);
        } else if result.is_ok() && self.running {
            let close = self.time_segment.closing_update();
            debug!("closing running segment {}..{:?}", close.start, close.stop);
            outputs.push_event(StreamEvent::Segment(close));
        }
        result?;

        self.time_segment = scratch;
        self.sync_position();
        if scratch.flags.segment {
            self.shared.post(BusMessage::SegmentStart {
                format: Format::Time,
                position: scratch.position,
            });
        }

        self.pending_segment = Some(self.time_segment.announcement());
        self.need_segment = false;
        Ok(())
    }
}

/// Validate a seek and express it in time on the stream `kind`.
pub(crate) fn normalize_seek(
    params: &StreamParams,
    kind: StreamKind,
    seek: &SeekEvent,
) -> Result<SeekEvent, SeekError> {
    if seek.rate.is_nan() || seek.rate <= 0.0 {
        return Err(SeekError::UnsupportedRate(seek.rate));
    }

    let mut normalized = seek.clone();
    if seek.format != Format::Time {
        let (start, stop) =
            params.convert_pair(kind, seek.format, seek.start, seek.stop, Format::Time)?;
        normalized.format = Format::Time;
        normalized.start = start;
        normalized.stop = stop;
    }
    Ok(normalized)
}

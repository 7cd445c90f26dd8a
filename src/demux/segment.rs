//! Playback segments and seek requests.

use crate::common::types::ClockTime;
use crate::demux::types::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekFlags {
    /// Discard queued data downstream before repositioning.
    pub flush: bool,
    /// Report segment-done instead of EOS at the segment stop.
    pub segment: bool,
}

/// How a seek boundary is applied to the current segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekType {
    /// Keep the current value.
    None,
    /// Replace the current value.
    #[default]
    Set,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    pub rate: f64,
    pub format: Format,
    pub flags: SeekFlags,
    pub start_type: SeekType,
    pub start: u64,
    pub stop_type: SeekType,
    pub stop: Option<u64>,
}

impl SeekEvent {
    pub fn new(format: Format, start: u64, stop: Option<u64>) -> Self {
        Self {
            rate: 1.0,
            format,
            flags: SeekFlags::default(),
            start_type: SeekType::Set,
            start,
            stop_type: SeekType::Set,
            stop,
        }
    }

    pub fn time(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self::new(Format::Time, start, stop)
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn flushing(mut self) -> Self {
        self.flags.flush = true;
        self
    }

    pub fn segment_mode(mut self) -> Self {
        self.flags.segment = true;
        self
    }

    pub fn with_types(mut self, start_type: SeekType, stop_type: SeekType) -> Self {
        self.start_type = start_type;
        self.stop_type = stop_type;
        self
    }
}

/// Segment announcement sent ahead of the buffers it describes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentEvent {
    /// `true` closes or updates the running segment instead of opening one.
    pub update: bool,
    pub rate: f64,
    pub format: Format,
    pub start: u64,
    pub stop: Option<u64>,
    /// Stream time corresponding to `start`.
    pub time: u64,
}

/// A `(start, stop, position, rate, time)` range in one coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub format: Format,
    pub rate: f64,
    pub flags: SeekFlags,
    pub start: u64,
    pub stop: Option<u64>,
    pub time: u64,
    /// Last produced position.
    pub position: u64,
    pub duration: Option<u64>,
}

impl Segment {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            rate: 1.0,
            flags: SeekFlags::default(),
            start: 0,
            stop: None,
            time: 0,
            position: 0,
            duration: None,
        }
    }

    /// Apply a seek already expressed in this segment's format.
    ///
    /// The position jumps to the new start; the start is clamped to the
    /// duration when one is known.
    pub fn set_seek(&mut self, seek: &SeekEvent) {
        let mut start = match seek.start_type {
            SeekType::Set => seek.start,
            SeekType::None => self.start,
        };
        let stop = match seek.stop_type {
            SeekType::Set => seek.stop,
            SeekType::None => self.stop,
        };
        if let Some(duration) = self.duration {
            start = start.min(duration);
        }

        self.rate = seek.rate;
        self.flags = seek.flags;
        self.start = start;
        self.stop = stop;
        self.time = start;
        self.position = start;
    }

    /// Adopt an upstream segment announcement.
    pub fn set_newsegment(&mut self, event: &SegmentEvent) {
        self.rate = event.rate;
        self.start = event.start;
        self.stop = event.stop;
        self.time = event.time;
        self.position = event.start;
    }

    /// Where playback should report stopping: the stop, else the duration.
    pub fn effective_stop(&self) -> Option<u64> {
        self.stop.or(self.duration)
    }

    /// Announcement for the range from the current position onwards.
    pub fn announcement(&self) -> SegmentEvent {
        SegmentEvent {
            update: false,
            rate: self.rate,
            format: self.format,
            start: self.position,
            stop: self.effective_stop(),
            time: self.time,
        }
    }

    /// Update closing the running segment at the current position.
    pub fn closing_update(&self) -> SegmentEvent {
        SegmentEvent {
            update: true,
            rate: self.rate,
            format: self.format,
            start: self.start,
            stop: Some(self.position),
            time: self.time,
        }
    }

    /// Whether `position` lies past the configured stop.
    pub fn is_past_stop(&self, position: u64) -> bool {
        self.stop.is_some_and(|stop| position > stop)
    }
}

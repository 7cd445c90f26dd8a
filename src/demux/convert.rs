//! Unit-conversion engine.
//!
//! Two independent converters: the sink side works in container bytes and
//! time only, each source side additionally knows its "default" unit (frames
//! for video, samples for audio). All arithmetic is integer with a 128-bit
//! intermediate; nothing here touches floating point.
//!
//! Unit counts map to time rounding up and time maps back to unit counts
//! rounding down, so the timestamp of unit `n` always converts back to `n`.

use crate::common::errors::ConvertError;
use crate::demux::constants::{AUDIO_SAMPLE_BYTES, SECOND};
use crate::demux::types::{Format, StreamKind};

/// `val * num / den`, rounded down, without intermediate overflow.
///
/// A zero denominator means the parameters are not known yet. Results that do
/// not fit in 64 bits saturate.
pub fn scale(val: u64, num: u64, den: u64) -> Result<u64, ConvertError> {
    if den == 0 {
        return Err(ConvertError::FormatUnknown);
    }
    let wide = u128::from(val) * u128::from(num) / u128::from(den);
    Ok(u64::try_from(wide).unwrap_or(u64::MAX))
}

/// Same as [`scale`], rounded up.
pub fn scale_ceil(val: u64, num: u64, den: u64) -> Result<u64, ConvertError> {
    if den == 0 {
        return Err(ConvertError::FormatUnknown);
    }
    let wide = (u128::from(val) * u128::from(num)).div_ceil(u128::from(den));
    Ok(u64::try_from(wide).unwrap_or(u64::MAX))
}

/// Bytes per unit and units per second (`num / den`) of one stream.
#[derive(Debug, Clone, Copy)]
struct UnitRate {
    unit_bytes: u64,
    num: u64,
    den: u64,
}

impl UnitRate {
    fn new(unit_bytes: u64, num: u64, den: u64) -> Result<Self, ConvertError> {
        if unit_bytes == 0 || num == 0 || den == 0 {
            return Err(ConvertError::FormatUnknown);
        }
        Ok(Self {
            unit_bytes,
            num,
            den,
        })
    }

    fn units_to_time(&self, units: u64) -> Result<u64, ConvertError> {
        scale_ceil(units, SECOND * self.den, self.num)
    }

    fn time_to_units(&self, time: u64) -> Result<u64, ConvertError> {
        scale(time, self.num, self.den * SECOND)
    }
}

/// Snapshot of everything the conversions depend on.
///
/// The streaming side publishes a fresh copy whenever the header parser or
/// the audio decoder observe a change; queries read it without touching the
/// stream lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamParams {
    /// Bytes per DV frame; `None` until the first header is parsed.
    pub frame_len: Option<u64>,
    pub fps_n: u64,
    pub fps_d: u64,
    pub frequency: u64,
    pub channels: u64,
}

impl StreamParams {
    fn frame_len(&self) -> Result<u64, ConvertError> {
        match self.frame_len {
            Some(len) if len > 0 => Ok(len),
            _ => Err(ConvertError::FormatUnknown),
        }
    }

    fn video_rate(&self) -> Result<UnitRate, ConvertError> {
        UnitRate::new(self.frame_len()?, self.fps_n, self.fps_d)
    }

    /// Audio units are sample frames: one 16-bit sample per channel.
    fn audio_rate(&self) -> Result<UnitRate, ConvertError> {
        UnitRate::new(AUDIO_SAMPLE_BYTES * self.channels, self.frequency, 1)
    }

    /// Convert between container bytes and time.
    ///
    /// Bytes map to the start time of the frame containing them, and times
    /// map to the first byte of the frame they fall in.
    pub fn sink_convert(&self, src: Format, value: u64, dst: Format) -> Result<u64, ConvertError> {
        let rate = self.video_rate()?;
        if src == dst {
            return Ok(value);
        }

        match (src, dst) {
            (Format::Bytes, Format::Time) => rate.units_to_time(value / rate.unit_bytes),
            (Format::Time, Format::Bytes) => {
                let frame = rate.time_to_units(value)?;
                Ok(frame.saturating_mul(rate.unit_bytes))
            }
            _ => Err(ConvertError::Unsupported { from: src, to: dst }),
        }
    }

    /// Convert a value on one of the output streams.
    ///
    /// Zero converts to zero even while the rate parameters are unknown, so a
    /// position query at the very start always succeeds once a frame length
    /// is known.
    pub fn src_convert(
        &self,
        kind: StreamKind,
        src: Format,
        value: u64,
        dst: Format,
    ) -> Result<u64, ConvertError> {
        if src == dst {
            return Ok(value);
        }
        self.frame_len()?;
        if value == 0 {
            return Ok(0);
        }

        let rate = match kind {
            StreamKind::Video => self.video_rate()?,
            StreamKind::Audio => self.audio_rate()?,
        };
        match (src, dst) {
            (Format::Bytes, Format::Default) => Ok(value / rate.unit_bytes),
            (Format::Default, Format::Bytes) => Ok(value.saturating_mul(rate.unit_bytes)),
            (Format::Time, Format::Default) => rate.time_to_units(value),
            (Format::Default, Format::Time) => rate.units_to_time(value),
            (Format::Bytes, Format::Time) => {
                scale_ceil(value, SECOND * rate.den, rate.unit_bytes * rate.num)
            }
            (Format::Time, Format::Bytes) => {
                scale(value, rate.unit_bytes * rate.num, rate.den * SECOND)
            }
            _ => Err(ConvertError::Unsupported { from: src, to: dst }),
        }
    }

    /// Convert a `(start, stop)` range; an open stop stays open.
    pub fn convert_pair(
        &self,
        kind: StreamKind,
        src: Format,
        start: u64,
        stop: Option<u64>,
        dst: Format,
    ) -> Result<(u64, Option<u64>), ConvertError> {
        let start = self.src_convert(kind, src, start, dst)?;
        let stop = stop
            .map(|stop| self.src_convert(kind, src, stop, dst))
            .transpose()?;
        Ok((start, stop))
    }

    /// Same as [`convert_pair`](Self::convert_pair) on the sink side.
    pub fn convert_sink_pair(
        &self,
        src: Format,
        start: u64,
        stop: Option<u64>,
        dst: Format,
    ) -> Result<(u64, Option<u64>), ConvertError> {
        let start = self.sink_convert(src, start, dst)?;
        let stop = stop
            .map(|stop| self.sink_convert(src, stop, dst))
            .transpose()?;
        Ok((start, stop))
    }

    /// Map a value on an output stream into container space.
    ///
    /// Always routes through time: the per-stream byte space and the
    /// container byte space have no fixed ratio.
    pub fn convert_src_to_sink(
        &self,
        kind: StreamKind,
        src: Format,
        value: u64,
        dst: Format,
    ) -> Result<u64, ConvertError> {
        let time = self.src_convert(kind, src, value, Format::Time)?;
        self.sink_convert(Format::Time, time, dst)
    }

    /// Timestamp of the start of video frame `frame`.
    pub fn frame_timestamp(&self, frame: u64) -> Result<u64, ConvertError> {
        scale_ceil(frame, SECOND * self.fps_d, self.fps_n)
    }
}

//! Small shared vocabulary types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::demux::constants::*;

/// Coordinate space of a position or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Bytes,
    /// Frames for video, samples for audio.
    Default,
    /// Nanoseconds.
    Time,
}

/// Identity of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Television system of a DV frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DvSystem {
    /// 525 lines, 60 fields (29.97 fps).
    Ntsc,
    /// 625 lines, 50 fields (25 fps).
    Pal,
}

impl DvSystem {
    pub fn frame_size(self) -> usize {
        match self {
            Self::Ntsc => NTSC_FRAME_SIZE,
            Self::Pal => PAL_FRAME_SIZE,
        }
    }

    pub fn dif_sequences(self) -> usize {
        match self {
            Self::Ntsc => NTSC_DIF_SEQUENCES,
            Self::Pal => PAL_DIF_SEQUENCES,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            Self::Ntsc => NTSC_HEIGHT,
            Self::Pal => PAL_HEIGHT,
        }
    }

    /// `(numerator, denominator)` in frames per second.
    pub fn framerate(self) -> (u32, u32) {
        match self {
            Self::Ntsc => (NTSC_FRAMERATE_NUMERATOR, NTSC_FRAMERATE_DENOMINATOR),
            Self::Pal => (PAL_FRAMERATE_NUMERATOR, PAL_FRAMERATE_DENOMINATOR),
        }
    }

    pub fn pixel_aspect_ratio(self, wide: bool) -> (u32, u32) {
        match (self, wide) {
            (Self::Pal, false) => PAL_NORMAL_PAR,
            (Self::Pal, true) => PAL_WIDE_PAR,
            (Self::Ntsc, false) => NTSC_NORMAL_PAR,
            (Self::Ntsc, true) => NTSC_WIDE_PAR,
        }
    }

    pub(crate) fn min_audio_samples(self) -> &'static [usize; 3] {
        match self {
            Self::Ntsc => &NTSC_MIN_SAMPLES,
            Self::Pal => &PAL_MIN_SAMPLES,
        }
    }
}

impl fmt::Display for DvSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ntsc => f.write_str("NTSC"),
            Self::Pal => f.write_str("PAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_geometry() {
        assert_eq!(DvSystem::Ntsc.frame_size(), 120_000);
        assert_eq!(DvSystem::Pal.frame_size(), 144_000);
        assert_eq!(DvSystem::Pal.framerate(), (25, 1));
        assert_eq!(DvSystem::Ntsc.framerate(), (30_000, 1_001));
    }

    #[test]
    fn pixel_aspect_table() {
        assert_eq!(DvSystem::Pal.pixel_aspect_ratio(false), (59, 54));
        assert_eq!(DvSystem::Pal.pixel_aspect_ratio(true), (118, 81));
        assert_eq!(DvSystem::Ntsc.pixel_aspect_ratio(false), (10, 11));
        assert_eq!(DvSystem::Ntsc.pixel_aspect_ratio(true), (40, 33));
    }
}

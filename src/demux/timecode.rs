//! SMPTE timecode carried in the subcode section of a DV frame.

use std::fmt;

use crate::demux::types::DvSystem;

/// Frame numbers dropped at the start of each minute in 29.97 fps counting,
/// except for every tenth minute.
const DROP_FRAMES_PER_MINUTE: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmpteTimecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl SmpteTimecode {
    /// Decode the four BCD payload bytes of a timecode pack (frames, seconds,
    /// minutes, hours order). Flag bits above the tens digit are masked off.
    pub fn from_pack_payload(payload: [u8; 4]) -> Self {
        let bcd = |byte: u8, tens_mask: u8| ((byte >> 4) & tens_mask) * 10 + (byte & 0x0f);
        Self {
            frames: bcd(payload[0], 0x3),
            seconds: bcd(payload[1], 0x7),
            minutes: bcd(payload[2], 0x7),
            hours: bcd(payload[3], 0x3),
        }
    }

    /// Absolute frame count since 00:00:00:00.
    ///
    /// PAL counts 25 frames per second. NTSC uses drop-frame counting, so a
    /// label such as `00:01:00;00` does not exist and labels map back onto a
    /// gapless sequence.
    pub fn frame_number(&self, system: DvSystem) -> u64 {
        let hours = u64::from(self.hours);
        let minutes = u64::from(self.minutes);
        let seconds = u64::from(self.seconds);
        let frames = u64::from(self.frames);

        match system {
            DvSystem::Pal => ((hours * 60 + minutes) * 60 + seconds) * 25 + frames,
            DvSystem::Ntsc => {
                let total_minutes = hours * 60 + minutes;
                let nominal = (total_minutes * 60 + seconds) * 30 + frames;
                nominal - DROP_FRAMES_PER_MINUTE * (total_minutes - total_minutes / 10)
            }
        }
    }
}

impl fmt::Display for SmpteTimecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}

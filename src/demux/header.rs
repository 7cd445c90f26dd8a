//! Binary header parser.
//!
//! Reads the fixed DIF layout of a standard-definition DV frame: the header
//! block of sequence 0, subcode sync blocks for timecode and the AAUX/VAUX
//! packs. Every accessor bounds-checks against the slice it is given; a frame
//! that is too short simply yields "not found".

use crate::common::errors::HeaderError;
use crate::demux::constants::*;
use crate::demux::timecode::SmpteTimecode;
use crate::demux::types::DvSystem;

/// Section type of the first DIF block in every sequence.
const SECTION_HEADER: u8 = 0;

/// Subcode sync block carrying the timecode pack in the first subcode block.
const TIMECODE_SSYB: usize = 3;

/// Size of one subcode sync block (2 ID bytes, 1 reserved, 5 pack bytes).
const SSYB_SIZE: usize = 8;

/// Offset of the pack inside a subcode sync block.
const SSYB_PACK_OFFSET: usize = 3;

/// Size of one pack.
pub const PACK_SIZE: usize = 5;

/// VAUX source pack position inside the VAUX area of sequence 0.
const VAUX_SOURCE_OFFSET: usize = 5 * DIF_BLOCK_SIZE + 48;

/// VAUX source control pack directly follows the source pack.
const VAUX_SOURCE_CONTROL_OFFSET: usize = VAUX_SOURCE_OFFSET + PACK_SIZE;

/// Frame parameters read from the header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub system: DvSystem,
    pub frame_size: usize,
    pub dif_sequences: usize,
    pub height: u32,
    /// Application ID of the track (APT); used by the 16:9 detection.
    pub apt: u8,
}

/// Classify a probe block as 525/60 or 625/50 DV.
///
/// The block must hold at least [`NTSC_FRAME_SIZE`] bytes: the VAUX source
/// pack that confirms the profile lives in the body of the frame.
pub fn detect_format(data: &[u8]) -> Result<FrameHeader, HeaderError> {
    if data.len() < NTSC_FRAME_SIZE {
        return Err(HeaderError::TooShort {
            needed: NTSC_FRAME_SIZE,
            available: data.len(),
        });
    }

    let id = data[0];
    if id >> 5 != SECTION_HEADER {
        return Err(HeaderError::NotHeaderBlock(id));
    }

    let dsf = data[3] >> 7;
    let system = if dsf == 0 {
        DvSystem::Ntsc
    } else {
        DvSystem::Pal
    };

    // Only 25 Mbit/s SD is handled; DVCPRO50/HD announce themselves here.
    if data[VAUX_SOURCE_OFFSET] == PACK_VAUX_SOURCE {
        let stype = data[VAUX_SOURCE_OFFSET + 3] & 0x1f;
        if stype != 0 {
            return Err(HeaderError::UnsupportedProfile { dsf, stype });
        }
    }

    Ok(FrameHeader {
        system,
        frame_size: system.frame_size(),
        dif_sequences: system.dif_sequences(),
        height: system.height(),
        apt: data[4] & 0x07,
    })
}

/// Offset of subcode sync block `ssyb` in DIF sequence `seq`.
fn ssyb_offset(seq: usize, ssyb: usize) -> usize {
    seq * DIF_SEQUENCE_SIZE + DIF_BLOCK_SIZE + DIF_BLOCK_HEADER + ssyb * SSYB_SIZE
}

/// Offset of the AAUX pack in audio block `block` of DIF sequence `seq`.
pub(crate) fn aaux_pack_offset(seq: usize, block: usize) -> usize {
    seq * DIF_SEQUENCE_SIZE
        + (FIRST_AUDIO_BLOCK + AUDIO_BLOCK_STRIDE * block) * DIF_BLOCK_SIZE
        + DIF_BLOCK_HEADER
}

/// Audio block holding the AAUX source pack. Even sequences carry the pack
/// set in blocks 3..8, odd sequences in blocks 0..5.
fn aaux_source_block(seq: usize) -> usize {
    if seq % 2 == 0 { 3 } else { 0 }
}

fn aaux_source_control_block(seq: usize) -> usize {
    if seq % 2 == 0 { 4 } else { 1 }
}

fn pack_at(frame: &[u8], offset: usize) -> Option<&[u8]> {
    frame.get(offset..offset + PACK_SIZE)
}

/// Scan every DIF sequence for the AAUX pack with `pack_id`.
///
/// Only source (`0x50`) and source control (`0x51`) packs have a fixed
/// position; any other id returns `None`.
pub fn find_aaux_pack(frame: &[u8], dif_sequences: usize, pack_id: u8) -> Option<&[u8]> {
    let block: fn(usize) -> usize = match pack_id {
        PACK_AAUX_SOURCE => aaux_source_block,
        PACK_AAUX_SOURCE_CONTROL => aaux_source_control_block,
        _ => return None,
    };

    (0..dif_sequences)
        .filter_map(|seq| pack_at(frame, aaux_pack_offset(seq, block(seq))))
        .find(|pack| pack[0] == pack_id)
}

/// The VAUX source control pack of sequence 0, if present.
pub fn find_vaux_source_control(frame: &[u8]) -> Option<&[u8]> {
    pack_at(frame, VAUX_SOURCE_CONTROL_OFFSET).filter(|pack| pack[0] == PACK_VAUX_SOURCE_CONTROL)
}

/// First timecode pack found in the subcode area of any DIF sequence.
///
/// Absent timecode is normal; some encoders never write one.
pub fn get_timecode(frame: &[u8], dif_sequences: usize) -> Option<SmpteTimecode> {
    (0..dif_sequences).find_map(|seq| {
        let pack = pack_at(frame, ssyb_offset(seq, TIMECODE_SSYB) + SSYB_PACK_OFFSET)?;
        (pack[0] == PACK_TIMECODE)
            .then(|| SmpteTimecode::from_pack_payload([pack[1], pack[2], pack[3], pack[4]]))
    })
}

/// Whether the frame marks the start of a new recording.
///
/// Reports a candidate when the AAUX source control pack of any DIF sequence
/// has bit 7 of its third byte clear. The caller debounces.
pub fn is_new_media(frame: &[u8], dif_sequences: usize) -> bool {
    (0..dif_sequences).any(|seq| {
        pack_at(frame, aaux_pack_offset(seq, aaux_source_control_block(seq)))
            .is_some_and(|pack| pack[0] == PACK_AAUX_SOURCE_CONTROL && pack[2] & 0x80 == 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::synth::FrameBuilder;

    #[test]
    fn detects_both_systems() {
        let ntsc = FrameBuilder::new(DvSystem::Ntsc).build();
        let header = detect_format(&ntsc).unwrap();
        assert_eq!(header.system, DvSystem::Ntsc);
        assert_eq!(header.frame_size, 120_000);
        assert_eq!(header.height, 480);

        let pal = FrameBuilder::new(DvSystem::Pal).build();
        let header = detect_format(&pal).unwrap();
        assert_eq!(header.system, DvSystem::Pal);
        assert_eq!(header.frame_size, 144_000);
        assert_eq!(header.dif_sequences, 12);
    }

    #[test]
    fn pal_is_detected_from_ntsc_sized_block() {
        let pal = FrameBuilder::new(DvSystem::Pal).build();
        let header = detect_format(&pal[..NTSC_FRAME_SIZE]).unwrap();
        assert_eq!(header.system, DvSystem::Pal);
    }

    #[test]
    fn rejects_short_and_malformed_blocks() {
        assert_eq!(
            detect_format(&[0u8; 1000]),
            Err(HeaderError::TooShort {
                needed: NTSC_FRAME_SIZE,
                available: 1000
            })
        );

        let mut frame = FrameBuilder::new(DvSystem::Ntsc).build();
        frame[0] = 0x9f;
        assert_eq!(detect_format(&frame), Err(HeaderError::NotHeaderBlock(0x9f)));
    }

    #[test]
    fn rejects_high_bitrate_profiles() {
        let mut frame = FrameBuilder::new(DvSystem::Pal).build();
        frame[VAUX_SOURCE_OFFSET + 3] |= 0x04;
        assert!(matches!(
            detect_format(&frame),
            Err(HeaderError::UnsupportedProfile { dsf: 1, stype: 4 })
        ));
    }

    #[test]
    fn timecode_extraction() {
        let tc = SmpteTimecode {
            hours: 1,
            minutes: 2,
            seconds: 3,
            frames: 4,
        };
        let frame = FrameBuilder::new(DvSystem::Pal).timecode(tc).build();
        assert_eq!(get_timecode(&frame, 12), Some(tc));

        let frame = FrameBuilder::new(DvSystem::Pal).build();
        assert_eq!(get_timecode(&frame, 12), None);
        assert_eq!(get_timecode(&frame[..100], 12), None);
    }

    #[test]
    fn new_media_candidate() {
        let frame = FrameBuilder::new(DvSystem::Ntsc).new_media(true).build();
        assert!(is_new_media(&frame, 10));

        let frame = FrameBuilder::new(DvSystem::Ntsc).build();
        assert!(!is_new_media(&frame, 10));

        let frame = FrameBuilder::new(DvSystem::Pal).new_media(true).build();
        assert!(is_new_media(&frame, 12));
        assert!(!is_new_media(&frame, 0));
    }

    #[test]
    fn aaux_pack_lookup() {
        let frame = FrameBuilder::new(DvSystem::Pal)
            .audio(48_000, 1_920)
            .build();
        let pack = find_aaux_pack(&frame, 12, PACK_AAUX_SOURCE).unwrap();
        assert_eq!(pack[0], PACK_AAUX_SOURCE);
        assert!(find_aaux_pack(&frame, 12, PACK_TIMECODE).is_none());

        let silent = FrameBuilder::new(DvSystem::Pal).build();
        assert!(find_aaux_pack(&silent, 12, PACK_AAUX_SOURCE).is_none());
    }

    #[test]
    fn vaux_source_control_lookup() {
        let frame = FrameBuilder::new(DvSystem::Ntsc).wide(true).build();
        let pack = find_vaux_source_control(&frame).unwrap();
        assert_eq!(pack[2] & 0x07, 0x02);
    }
}

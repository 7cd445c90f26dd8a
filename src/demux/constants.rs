//! Central constants for the DV demuxer.
//!
//! Bitstream layout numbers follow IEC 61834 for standard-definition DV.

use crate::common::types::ClockTime;

/// Nanoseconds per second.
pub const SECOND: ClockTime = 1_000_000_000;

// ── DIF layout ───────────────────────────────────────────────────────────────

/// Size of one DIF block.
pub const DIF_BLOCK_SIZE: usize = 80;

/// DIF blocks per DIF sequence.
pub const DIF_BLOCKS_PER_SEQUENCE: usize = 150;

/// Size of one DIF sequence (150 blocks).
pub const DIF_SEQUENCE_SIZE: usize = DIF_BLOCK_SIZE * DIF_BLOCKS_PER_SEQUENCE;

/// Audio DIF blocks per DIF sequence; one every 16 blocks starting at block 6.
pub const AUDIO_BLOCKS_PER_SEQUENCE: usize = 9;

/// Block index of the first audio DIF block within a sequence.
pub const FIRST_AUDIO_BLOCK: usize = 6;

/// Distance in blocks between consecutive audio DIF blocks.
pub const AUDIO_BLOCK_STRIDE: usize = 16;

/// Offset of the first pack byte inside a DIF block (after the 3-byte ID).
pub const DIF_BLOCK_HEADER: usize = 3;

/// Offset of the first audio sample byte inside an audio DIF block.
pub const AUDIO_DATA_OFFSET: usize = 8;

// ── Systems ──────────────────────────────────────────────────────────────────

pub const NTSC_DIF_SEQUENCES: usize = 10;
pub const PAL_DIF_SEQUENCES: usize = 12;

/// 525/60 frame size. Also the probe size: PAL/NTSC discrimination reads
/// into the frame body, so at least this much must be available.
pub const NTSC_FRAME_SIZE: usize = NTSC_DIF_SEQUENCES * DIF_SEQUENCE_SIZE;

/// 625/50 frame size.
pub const PAL_FRAME_SIZE: usize = PAL_DIF_SEQUENCES * DIF_SEQUENCE_SIZE;

pub const FRAME_WIDTH: u32 = 720;
pub const NTSC_HEIGHT: u32 = 480;
pub const PAL_HEIGHT: u32 = 576;

pub const PAL_FRAMERATE_NUMERATOR: u32 = 25;
pub const PAL_FRAMERATE_DENOMINATOR: u32 = 1;
pub const NTSC_FRAMERATE_NUMERATOR: u32 = 30_000;
pub const NTSC_FRAMERATE_DENOMINATOR: u32 = 1_001;

// ── Pixel aspect ratios ──────────────────────────────────────────────────────

pub const PAL_NORMAL_PAR: (u32, u32) = (59, 54);
pub const PAL_WIDE_PAR: (u32, u32) = (118, 81);
pub const NTSC_NORMAL_PAR: (u32, u32) = (10, 11);
pub const NTSC_WIDE_PAR: (u32, u32) = (40, 33);

// ── Pack identifiers ─────────────────────────────────────────────────────────

pub const PACK_TIMECODE: u8 = 0x13;
pub const PACK_AAUX_SOURCE: u8 = 0x50;
pub const PACK_AAUX_SOURCE_CONTROL: u8 = 0x51;
pub const PACK_VAUX_SOURCE: u8 = 0x60;
pub const PACK_VAUX_SOURCE_CONTROL: u8 = 0x61;

// ── Audio ────────────────────────────────────────────────────────────────────

/// Upper bound of audio channels a DV frame can carry.
pub const MAX_AUDIO_CHANNELS: usize = 4;

/// Bytes per PCM sample in the audio output.
pub const AUDIO_SAMPLE_BYTES: u64 = 2;

/// Sample rates indexed by the AAUX `SMP` field.
pub const AUDIO_FREQUENCIES: [u32; 3] = [48_000, 44_100, 32_000];

/// Minimum samples per frame for 525/60, indexed like `AUDIO_FREQUENCIES`.
pub const NTSC_MIN_SAMPLES: [usize; 3] = [1_580, 1_452, 1_053];

/// Minimum samples per frame for 625/50, indexed like `AUDIO_FREQUENCIES`.
pub const PAL_MIN_SAMPLES: [usize; 3] = [1_896, 1_742, 1_264];

// ── Demuxer ──────────────────────────────────────────────────────────────────

/// A new-recording marker is honoured only after this many frames since the
/// previous one.
pub const NEW_MEDIA_DEBOUNCE_FRAMES: u32 = 3;

/// Value of the `container-format` tag.
pub const CONTAINER_FORMAT: &str = "DV";

/// Name of the pull-mode worker thread.
pub const PULL_TASK_NAME: &str = "dvdemux-pull";

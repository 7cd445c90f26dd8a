//! DV codec surface used by the demuxer.
//!
//! The demuxer only needs header classification, the ancillary packs and the
//! audio samples; video is passed through compressed. [`DifCodec`] covers
//! 25 Mbit/s SD DV with 16-bit linear audio.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

use crate::common::errors::HeaderError;
use crate::demux::constants::*;
use crate::demux::header::{self, FrameHeader};
use crate::demux::types::DvSystem;

/// Capabilities the demuxer needs from a DV decoder.
pub trait DvCodec: Send {
    /// Classify the probe block and remember its geometry.
    fn parse_header(&mut self, data: &[u8]) -> Result<FrameHeader, HeaderError>;

    /// Refresh audio and aspect parameters from the frame's packs. On error
    /// the previously known parameters stay in effect.
    fn parse_packs(&mut self, frame: &[u8]) -> Result<(), HeaderError>;

    /// Decode the frame's audio into one buffer per channel and return the
    /// number of samples per channel. Zero is a valid result.
    fn decode_audio(&mut self, frame: &[u8], out: &mut [Vec<i16>]) -> usize;

    /// Forget everything learned from previous frames.
    fn reset(&mut self);

    fn system(&self) -> Option<DvSystem>;
    fn dif_sequences(&self) -> usize;
    fn frequency(&self) -> u32;
    fn channels(&self) -> u32;
    fn height(&self) -> u32;
    fn is_wide(&self) -> bool;
}

/// Audio sample positions within a 525/60 frame, per DIF sequence and audio
/// block. The sample index of a byte pair is this value plus the pair index
/// times the system's audio stride.
const SHUFFLE_525: [[usize; AUDIO_BLOCKS_PER_SEQUENCE]; NTSC_DIF_SEQUENCES] = [
    [0, 30, 60, 20, 50, 80, 10, 40, 70],
    [6, 36, 66, 26, 56, 86, 16, 46, 76],
    [12, 42, 72, 2, 32, 62, 22, 52, 82],
    [18, 48, 78, 8, 38, 68, 28, 58, 88],
    [24, 54, 84, 14, 44, 74, 4, 34, 64],
    [1, 31, 61, 21, 51, 81, 11, 41, 71],
    [7, 37, 67, 27, 57, 87, 17, 47, 77],
    [13, 43, 73, 3, 33, 63, 23, 53, 83],
    [19, 49, 79, 9, 39, 69, 29, 59, 89],
    [25, 55, 85, 15, 45, 75, 5, 35, 65],
];

const SHUFFLE_625: [[usize; AUDIO_BLOCKS_PER_SEQUENCE]; PAL_DIF_SEQUENCES] = [
    [0, 36, 72, 26, 62, 98, 16, 52, 88],
    [6, 42, 78, 32, 68, 104, 22, 58, 94],
    [12, 48, 84, 2, 38, 74, 28, 64, 100],
    [18, 54, 90, 8, 44, 80, 34, 70, 106],
    [24, 60, 96, 14, 50, 86, 4, 40, 76],
    [30, 66, 102, 20, 56, 92, 10, 46, 82],
    [1, 37, 73, 27, 63, 99, 17, 53, 89],
    [7, 43, 79, 33, 69, 105, 23, 59, 95],
    [13, 49, 85, 3, 39, 75, 29, 65, 101],
    [19, 55, 91, 9, 45, 81, 35, 71, 107],
    [25, 61, 97, 15, 51, 87, 5, 41, 77],
    [31, 67, 103, 21, 57, 93, 11, 47, 83],
];

const STRIDE_525: usize = 90;
const STRIDE_625: usize = 108;

/// 16-bit pairs per audio DIF block.
pub(crate) const SAMPLES_PER_AUDIO_BLOCK: usize = (DIF_BLOCK_SIZE - AUDIO_DATA_OFFSET) / 2;

/// DV marks an unrecoverable sample with this code.
const AUDIO_ERROR_CODE: i16 = i16::MIN;

/// Interleaved sample index (channel = index % 2, sample = index / 2) of
/// byte pair `pair` in audio block `block` of DIF sequence `seq`.
pub(crate) fn shuffled_index(system: DvSystem, seq: usize, block: usize, pair: usize) -> usize {
    match system {
        DvSystem::Ntsc => SHUFFLE_525[seq][block] + pair * STRIDE_525,
        DvSystem::Pal => SHUFFLE_625[seq][block] + pair * STRIDE_625,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    Linear16,
    Nonlinear12,
    Other(u8),
}

impl From<u8> for Quantization {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Linear16,
            1 => Self::Nonlinear12,
            other => Self::Other(other),
        }
    }
}

/// Contents of the AAUX source pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSource {
    pub frequency: u32,
    pub quantization: Quantization,
    /// Samples per channel in this frame.
    pub samples: usize,
    pub channels: u32,
}

impl AudioSource {
    pub fn from_pack(pack: &[u8], system: DvSystem) -> Option<Self> {
        let af_size = usize::from(pack[1] & 0x3f);
        let stype = pack[3] & 0x1f;
        let freq_code = usize::from((pack[4] >> 3) & 0x07);
        let quantization = Quantization::from(pack[4] & 0x07);

        let frequency = *AUDIO_FREQUENCIES.get(freq_code)?;
        let samples = system.min_audio_samples()[freq_code] + af_size;
        let channels = match (quantization, stype) {
            (Quantization::Linear16, _) => 2,
            (_, 2) => 4,
            _ => 2,
        };

        Some(Self {
            frequency,
            quantization,
            samples,
            channels,
        })
    }
}

/// Built-in decoder for 25 Mbit/s standard-definition DV.
#[derive(Debug, Default)]
pub struct DifCodec {
    header: Option<FrameHeader>,
    audio: Option<AudioSource>,
    wide: bool,
    warned_quantization: bool,
}

impl DifCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_source(&self) -> Option<AudioSource> {
        self.audio
    }
}

impl DvCodec for DifCodec {
    fn parse_header(&mut self, data: &[u8]) -> Result<FrameHeader, HeaderError> {
        let header = header::detect_format(data)?;
        if self.header.map(|h| h.system) != Some(header.system) {
            debug!("DV system is {}", header.system);
        }
        self.header = Some(header);
        Ok(header)
    }

    fn parse_packs(&mut self, frame: &[u8]) -> Result<(), HeaderError> {
        let Some(hdr) = self.header else {
            return Err(HeaderError::MissingPack(PACK_AAUX_SOURCE));
        };

        if let Some(vsc) = header::find_vaux_source_control(frame) {
            let aspect = vsc[2] & 0x07;
            self.wide = aspect == 0x02 || (hdr.apt == 0 && aspect == 0x07);
        }

        let pack = header::find_aaux_pack(frame, hdr.dif_sequences, PACK_AAUX_SOURCE)
            .ok_or(HeaderError::MissingPack(PACK_AAUX_SOURCE))?;
        let source = AudioSource::from_pack(pack, hdr.system)
            .ok_or(HeaderError::MissingPack(PACK_AAUX_SOURCE))?;

        self.audio = Some(source);
        Ok(())
    }

    fn decode_audio(&mut self, frame: &[u8], out: &mut [Vec<i16>]) -> usize {
        let (Some(hdr), Some(source)) = (self.header, self.audio) else {
            return 0;
        };

        if source.quantization != Quantization::Linear16 {
            if !self.warned_quantization {
                warn!(
                    "{:?} audio quantization is not supported, audio will be dropped",
                    source.quantization
                );
                self.warned_quantization = true;
            }
            return 0;
        }

        let samples = source.samples;
        let channels = out.len().min(source.channels as usize);
        for channel in out.iter_mut().take(channels) {
            channel.clear();
            channel.resize(samples, 0);
        }

        let slots = samples * 2;
        for seq in 0..hdr.dif_sequences {
            for block in 0..AUDIO_BLOCKS_PER_SEQUENCE {
                let base = seq * DIF_SEQUENCE_SIZE
                    + (FIRST_AUDIO_BLOCK + block * AUDIO_BLOCK_STRIDE) * DIF_BLOCK_SIZE;
                let Some(data) = frame.get(base + AUDIO_DATA_OFFSET..base + DIF_BLOCK_SIZE) else {
                    return 0;
                };

                for (pair, bytes) in data.chunks_exact(2).enumerate() {
                    let index = shuffled_index(hdr.system, seq, block, pair);
                    if index >= slots {
                        continue;
                    }
                    let channel = index % 2;
                    if channel >= channels {
                        continue;
                    }
                    let sample = BigEndian::read_i16(bytes);
                    out[channel][index / 2] = if sample == AUDIO_ERROR_CODE { 0 } else { sample };
                }
            }
        }

        samples
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn system(&self) -> Option<DvSystem> {
        self.header.map(|h| h.system)
    }

    fn dif_sequences(&self) -> usize {
        self.header.map_or(0, |h| h.dif_sequences)
    }

    fn frequency(&self) -> u32 {
        self.audio.map_or(0, |a| a.frequency)
    }

    fn channels(&self) -> u32 {
        self.audio.map_or(0, |a| a.channels)
    }

    fn height(&self) -> u32 {
        self.header.map_or(0, |h| h.height)
    }

    fn is_wide(&self) -> bool {
        self.wide
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::synth::FrameBuilder;

    #[test]
    fn shuffle_tables_are_permutations() {
        for (system, seqs, stride) in [
            (DvSystem::Ntsc, NTSC_DIF_SEQUENCES, STRIDE_525),
            (DvSystem::Pal, PAL_DIF_SEQUENCES, STRIDE_625),
        ] {
            let mut seen = vec![false; seqs * AUDIO_BLOCKS_PER_SEQUENCE * SAMPLES_PER_AUDIO_BLOCK];
            for seq in 0..seqs {
                for block in 0..AUDIO_BLOCKS_PER_SEQUENCE {
                    for pair in 0..SAMPLES_PER_AUDIO_BLOCK {
                        let index = shuffled_index(system, seq, block, pair);
                        assert!(!seen[index], "{system} slot {index} used twice");
                        seen[index] = true;
                    }
                }
            }
            assert!(seen.iter().all(|&s| s));
            assert_eq!(seen.len(), stride * SAMPLES_PER_AUDIO_BLOCK);
        }
    }

    #[test]
    fn parses_audio_source_pack() {
        let frame = FrameBuilder::new(DvSystem::Pal).audio(48_000, 1_920).build();
        let mut codec = DifCodec::new();
        codec.parse_header(&frame).unwrap();
        codec.parse_packs(&frame).unwrap();

        assert_eq!(codec.frequency(), 48_000);
        assert_eq!(codec.channels(), 2);
        let source = codec.audio_source().unwrap();
        assert_eq!(source.samples, 1_920);
        assert_eq!(source.quantization, Quantization::Linear16);
    }

    #[test]
    fn missing_packs_keep_previous_parameters() {
        let with_audio = FrameBuilder::new(DvSystem::Ntsc).audio(32_000, 1_068).build();
        let silent = FrameBuilder::new(DvSystem::Ntsc).build();

        let mut codec = DifCodec::new();
        assert!(codec.parse_packs(&with_audio).is_err());
        codec.parse_header(&with_audio).unwrap();
        codec.parse_packs(&with_audio).unwrap();
        assert_eq!(
            codec.parse_packs(&silent),
            Err(HeaderError::MissingPack(PACK_AAUX_SOURCE))
        );
        assert_eq!(codec.frequency(), 32_000);
    }

    #[test]
    fn wide_flag_from_vaux() {
        let frame = FrameBuilder::new(DvSystem::Pal).wide(true).build();
        let mut codec = DifCodec::new();
        codec.parse_header(&frame).unwrap();
        let _ = codec.parse_packs(&frame);
        assert!(codec.is_wide());

        let frame = FrameBuilder::new(DvSystem::Pal).build();
        let _ = codec.parse_packs(&frame);
        assert!(!codec.is_wide());
    }

    #[test]
    fn decodes_shuffled_audio() {
        let frame = FrameBuilder::new(DvSystem::Ntsc)
            .audio(48_000, 1_602)
            .audio_pattern(|channel, index| (index as i16).wrapping_mul(3) - channel as i16 * 7)
            .build();

        let mut codec = DifCodec::new();
        codec.parse_header(&frame).unwrap();
        codec.parse_packs(&frame).unwrap();

        let mut out = vec![Vec::new(), Vec::new()];
        assert_eq!(codec.decode_audio(&frame, &mut out), 1_602);
        for (channel, samples) in out.iter().enumerate() {
            assert_eq!(samples.len(), 1_602);
            for (index, &sample) in samples.iter().enumerate() {
                assert_eq!(sample, (index as i16).wrapping_mul(3) - channel as i16 * 7);
            }
        }
    }

    #[test]
    fn error_code_samples_become_silence() {
        let frame = FrameBuilder::new(DvSystem::Pal)
            .audio(48_000, 1_920)
            .audio_pattern(|_, _| i16::MIN)
            .build();

        let mut codec = DifCodec::new();
        codec.parse_header(&frame).unwrap();
        codec.parse_packs(&frame).unwrap();

        let mut out = vec![Vec::new(), Vec::new()];
        assert_eq!(codec.decode_audio(&frame, &mut out), 1_920);
        assert!(out.iter().flatten().all(|&s| s == 0));
    }

    #[test]
    fn nonlinear_audio_is_dropped() {
        let mut frame = FrameBuilder::new(DvSystem::Ntsc).audio(32_000, 1_068).build();
        // switch every source pack to 12-bit
        for seq in 0..NTSC_DIF_SEQUENCES {
            let block = if seq % 2 == 0 { 3 } else { 0 };
            frame[header::aaux_pack_offset(seq, block) + 4] |= 0x01;
        }

        let mut codec = DifCodec::new();
        codec.parse_header(&frame).unwrap();
        codec.parse_packs(&frame).unwrap();

        let mut out = vec![Vec::new(), Vec::new()];
        assert_eq!(codec.decode_audio(&frame, &mut out), 0);
        assert_eq!(codec.frequency(), 32_000);
    }
}

//! Synthetic DV frame writer.
//!
//! Produces structurally valid 25 Mbit/s SD frames: header, subcode, VAUX and
//! audio DIF blocks carry real packs, video blocks are zero-filled. Handy for
//! exercising pipelines without capture hardware.

use byteorder::{BigEndian, ByteOrder};

use crate::demux::codec::{SAMPLES_PER_AUDIO_BLOCK, shuffled_index};
use crate::demux::constants::*;
use crate::demux::header::{PACK_SIZE, aaux_pack_offset};
use crate::demux::timecode::SmpteTimecode;
use crate::demux::types::DvSystem;

const SECTION_HEADER: u8 = 0;
const SECTION_SUBCODE: u8 = 1;
const SECTION_VAUX: u8 = 2;
const SECTION_AUDIO: u8 = 3;
const SECTION_VIDEO: u8 = 4;

const NO_INFO_PACK: [u8; PACK_SIZE] = [0xff; PACK_SIZE];

#[derive(Debug, Clone, Copy)]
struct AudioSpec {
    freq_code: u8,
    af_size: u8,
    samples: usize,
}

#[derive(Debug, Clone)]
pub struct FrameBuilder {
    system: DvSystem,
    timecode: Option<SmpteTimecode>,
    new_media: bool,
    wide: bool,
    audio: Option<AudioSpec>,
    pattern: fn(usize, usize) -> i16,
}

impl FrameBuilder {
    pub fn new(system: DvSystem) -> Self {
        Self {
            system,
            timecode: None,
            new_media: false,
            wide: false,
            audio: None,
            pattern: |_, _| 0,
        }
    }

    pub fn timecode(mut self, timecode: SmpteTimecode) -> Self {
        self.timecode = Some(timecode);
        self
    }

    /// Clear the REC ST bit of the AAUX source control packs.
    pub fn new_media(mut self, new_media: bool) -> Self {
        self.new_media = new_media;
        self
    }

    pub fn wide(mut self, wide: bool) -> Self {
        self.wide = wide;
        self
    }

    /// Carry two channels of 16-bit audio at `frequency`.
    ///
    /// `samples` is clamped to what the AAUX source pack can express for the
    /// system; an unknown frequency leaves the frame silent.
    pub fn audio(mut self, frequency: u32, samples: usize) -> Self {
        self.audio = AUDIO_FREQUENCIES
            .iter()
            .position(|&f| f == frequency)
            .map(|code| {
                let min = self.system.min_audio_samples()[code];
                let af_size = samples.saturating_sub(min).min(0x3f);
                AudioSpec {
                    freq_code: code as u8,
                    af_size: af_size as u8,
                    samples: min + af_size,
                }
            });
        self
    }

    /// Sample value for `(channel, index)`; silence by default.
    pub fn audio_pattern(mut self, pattern: fn(usize, usize) -> i16) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut frame = vec![0u8; self.system.frame_size()];
        for seq in 0..self.system.dif_sequences() {
            self.write_sequence(&mut frame, seq);
        }
        frame
    }

    /// `count` identical frames back to back.
    pub fn build_stream(&self, count: usize) -> Vec<u8> {
        self.build().repeat(count)
    }

    fn dsf(&self) -> u8 {
        match self.system {
            DvSystem::Ntsc => 0,
            DvSystem::Pal => 1,
        }
    }

    fn write_sequence(&self, frame: &mut [u8], seq: usize) {
        let base = seq * DIF_SEQUENCE_SIZE;
        let mut audio_block = 0;
        let mut video_block = 0u8;

        for block in 0..DIF_BLOCKS_PER_SEQUENCE {
            let at = base + block * DIF_BLOCK_SIZE;
            let dif = &mut frame[at..at + DIF_BLOCK_SIZE];
            match block {
                0 => {
                    write_id(dif, SECTION_HEADER, seq, 0);
                    dif[3] = (self.dsf() << 7) | 0x3f;
                    dif[4] = 0xf8;
                    dif[5..8].fill(0x78);
                    dif[8..].fill(0xff);
                }
                1 | 2 => {
                    write_id(dif, SECTION_SUBCODE, seq, (block - 1) as u8);
                    dif[3..].fill(0xff);
                    if block == 1 {
                        if let Some(tc) = self.timecode {
                            dif[DIF_BLOCK_HEADER + 3 * 8 + 3..][..PACK_SIZE]
                                .copy_from_slice(&timecode_pack(tc));
                        }
                    }
                }
                3..=5 => {
                    write_id(dif, SECTION_VAUX, seq, (block - 3) as u8);
                    dif[3..].fill(0xff);
                    if block == 5 {
                        dif[48..53].copy_from_slice(&[
                            PACK_VAUX_SOURCE,
                            0xff,
                            0xff,
                            0xc0 | (self.dsf() << 5),
                            0xff,
                        ]);
                        let aspect = if self.wide { 0x02 } else { 0x00 };
                        dif[53..58].copy_from_slice(&[
                            PACK_VAUX_SOURCE_CONTROL,
                            0xff,
                            0xf8 | aspect,
                            0xff,
                            0xff,
                        ]);
                    }
                }
                b if b >= FIRST_AUDIO_BLOCK
                    && (b - FIRST_AUDIO_BLOCK) % AUDIO_BLOCK_STRIDE == 0 =>
                {
                    write_id(dif, SECTION_AUDIO, seq, audio_block as u8);
                    dif[DIF_BLOCK_HEADER..AUDIO_DATA_OFFSET].copy_from_slice(&NO_INFO_PACK);
                    audio_block += 1;
                }
                _ => {
                    write_id(dif, SECTION_VIDEO, seq, video_block);
                    video_block = video_block.wrapping_add(1);
                }
            }
        }

        self.write_aaux(frame, seq);
    }

    fn write_aaux(&self, frame: &mut [u8], seq: usize) {
        let (source_block, control_block) = if seq % 2 == 0 { (3, 4) } else { (0, 1) };

        let rec_start = if self.new_media { 0x7f } else { 0xff };
        let control = [PACK_AAUX_SOURCE_CONTROL, 0x33, rec_start, 0xfc, 0xff];
        let at = aaux_pack_offset(seq, control_block);
        frame[at..at + PACK_SIZE].copy_from_slice(&control);

        let Some(audio) = self.audio else {
            return;
        };

        let source = [
            PACK_AAUX_SOURCE,
            0xc0 | audio.af_size,
            0x30,
            0xc0 | (self.dsf() << 5),
            0xc0 | (audio.freq_code << 3),
        ];
        let at = aaux_pack_offset(seq, source_block);
        frame[at..at + PACK_SIZE].copy_from_slice(&source);

        let slots = audio.samples * 2;
        for block in 0..AUDIO_BLOCKS_PER_SEQUENCE {
            let at = seq * DIF_SEQUENCE_SIZE
                + (FIRST_AUDIO_BLOCK + block * AUDIO_BLOCK_STRIDE) * DIF_BLOCK_SIZE
                + AUDIO_DATA_OFFSET;
            for pair in 0..SAMPLES_PER_AUDIO_BLOCK {
                let index = shuffled_index(self.system, seq, block, pair);
                if index >= slots {
                    continue;
                }
                let sample = (self.pattern)(index % 2, index / 2);
                BigEndian::write_i16(&mut frame[at + pair * 2..at + pair * 2 + 2], sample);
            }
        }
    }
}

fn write_id(dif: &mut [u8], section: u8, seq: usize, block: u8) {
    dif[0] = (section << 5) | 0x1f;
    dif[1] = ((seq as u8) << 4) | 0x07;
    dif[2] = block;
}

fn timecode_pack(tc: SmpteTimecode) -> [u8; PACK_SIZE] {
    let bcd = |v: u8| ((v / 10) << 4) | (v % 10);
    [
        PACK_TIMECODE,
        bcd(tc.frames),
        bcd(tc.seconds),
        bcd(tc.minutes),
        bcd(tc.hours),
    ]
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::demux::types::Format;

/// Coarse classification attached to every fatal error posted on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorDomain {
    /// The byte stream could not be interpreted as DV.
    Decode,
    /// Streaming stopped for a reason unrelated to the bitstream itself.
    Failed,
}

/// Precondition failures of the frame accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("insufficient data: need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },
}

/// The probe block could not be classified as PAL or NTSC DV.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("probe block too small: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },
    #[error("first DIF block is not a header block (id {0:#04x})")]
    NotHeaderBlock(u8),
    #[error("unsupported DV profile (dsf {dsf}, stype {stype:#04x})")]
    UnsupportedProfile { dsf: u8, stype: u8 },
    #[error("pack {0:#04x} not found in any DIF sequence")]
    MissingPack(u8),
}

/// Unit conversion could not be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("stream parameters are not known yet")]
    FormatUnknown,
    #[error("cannot convert {from:?} to {to:?}")]
    Unsupported { from: Format, to: Format },
}

/// Fatal stream errors. Any of these stops streaming and is paired with EOS.
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("error parsing DV header: {0}")]
    Header(#[from] HeaderError),
    #[error("error reading buffer: needed {needed} bytes, got {got}")]
    ShortRead { needed: usize, got: usize },
    #[error("segment conversion failed: {0}")]
    Segment(ConvertError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("upstream read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("downstream refused data: {0}")]
    Downstream(String),
}

impl DemuxError {
    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::Header(_) | Self::Segment(_) | Self::Adapter(_) => ErrorDomain::Decode,
            Self::ShortRead { .. } | Self::Io(_) | Self::Downstream(_) => ErrorDomain::Failed,
        }
    }
}

/// Result of pushing data through the element, per frame or per output.
///
/// Everything except `Error` is a normal control-flow outcome.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The output has no consumer attached.
    #[error("not linked")]
    NotLinked,
    /// A flush is in progress; data is being discarded.
    #[error("flushing")]
    Flushing,
    /// End of stream or end of the configured segment.
    #[error("end of stream")]
    Eos,
    #[error(transparent)]
    Error(#[from] DemuxError),
}

impl FlowError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<HeaderError> for FlowError {
    fn from(e: HeaderError) -> Self {
        Self::Error(DemuxError::Header(e))
    }
}

/// Request-level seek failures. Streaming is not affected by these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeekError {
    #[error("negative or zero playback rate {0} is not supported")]
    UnsupportedRate(f64),
    #[error("seek position could not be converted: {0}")]
    Convert(#[from] ConvertError),
    #[error("element is not active")]
    Inactive,
    #[error("upstream refused the seek")]
    Rejected,
}

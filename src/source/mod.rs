//! Upstream byte sources.

use bytes::Bytes;

use crate::common::errors::FlowError;
use crate::demux::segment::SeekEvent;

pub mod file;
pub mod memory;

pub use file::FileSource;
pub use memory::MemorySource;

/// Whatever feeds the demuxer.
///
/// Random-access sources let the demuxer pull; anything else has to push
/// chunks itself and can at most be asked to reposition.
pub trait Upstream: Send + Sync {
    /// Whether [`pull_range`](Self::pull_range) can be used.
    fn supports_pull(&self) -> bool;

    /// Read up to `len` bytes at `offset`.
    ///
    /// Returns `FlowError::Eos` when `offset` is at or past the end. A short
    /// result means the end was reached inside the range.
    fn pull_range(&self, offset: u64, len: usize) -> Result<Bytes, FlowError>;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Ask the source to reposition. Returns `false` if it cannot.
    fn seek(&self, _seek: &SeekEvent) -> bool {
        false
    }
}

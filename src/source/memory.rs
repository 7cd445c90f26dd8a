use bytes::Bytes;
use parking_lot::Mutex;

use crate::common::errors::FlowError;
use crate::demux::segment::SeekEvent;
use crate::demux::types::Format;
use crate::source::Upstream;

/// In-memory stream. Seekable unless built with [`MemorySource::push_only`].
#[derive(Debug)]
pub struct MemorySource {
    data: Bytes,
    pullable: bool,
    seeks: Mutex<Vec<SeekEvent>>,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pullable: true,
            seeks: Mutex::new(Vec::new()),
        }
    }

    /// A source that only supports push scheduling.
    pub fn push_only(data: impl Into<Bytes>) -> Self {
        Self {
            pullable: false,
            ..Self::new(data)
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Seek requests received so far, oldest first.
    pub fn seeks(&self) -> Vec<SeekEvent> {
        self.seeks.lock().clone()
    }
}

impl Upstream for MemorySource {
    fn supports_pull(&self) -> bool {
        self.pullable
    }

    fn pull_range(&self, offset: u64, len: usize) -> Result<Bytes, FlowError> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= self.data.len() {
            return Err(FlowError::Eos);
        }
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    /// Accepts byte seeks only, like a plain file would.
    fn seek(&self, seek: &SeekEvent) -> bool {
        self.seeks.lock().push(seek.clone());
        seek.format == Format::Bytes
    }
}

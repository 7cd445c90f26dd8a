use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::common::errors::{DemuxError, FlowError};
use crate::demux::segment::SeekEvent;
use crate::demux::types::Format;
use crate::source::Upstream;

struct FileState {
    file: File,
    /// Next offset handed out by `next_chunk`.
    cursor: u64,
    /// Set by a seek; the next chunk starts a new run of data.
    discont: bool,
}

/// Random-access file source.
pub struct FileSource {
    state: Mutex<FileState>,
    size: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        info!("Opened {} ({} bytes)", path.display(), size);

        Ok(Self {
            state: Mutex::new(FileState {
                file,
                cursor: 0,
                discont: false,
            }),
            size,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn read_at(state: &mut FileState, offset: u64, len: usize) -> io::Result<Bytes> {
        state.file.seek(SeekFrom::Start(offset))?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            match state.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    /// Sequential read for push scheduling: the next `len` bytes after the
    /// previous chunk, plus whether a seek happened in between.
    ///
    /// Returns `None` at end of file.
    pub fn next_chunk(&self, len: usize) -> io::Result<Option<(Bytes, bool)>> {
        let mut state = self.state.lock();
        if state.cursor >= self.size {
            return Ok(None);
        }
        let offset = state.cursor;
        let data = Self::read_at(&mut state, offset, len)?;
        state.cursor += data.len() as u64;
        let discont = std::mem::take(&mut state.discont);
        Ok(Some((data, discont)))
    }
}

impl Upstream for FileSource {
    fn supports_pull(&self) -> bool {
        true
    }

    fn pull_range(&self, offset: u64, len: usize) -> Result<Bytes, FlowError> {
        if offset >= self.size {
            return Err(FlowError::Eos);
        }
        let mut state = self.state.lock();
        Self::read_at(&mut state, offset, len).map_err(|e| FlowError::Error(DemuxError::Io(e)))
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn seek(&self, seek: &SeekEvent) -> bool {
        if seek.format != Format::Bytes {
            return false;
        }
        let mut state = self.state.lock();
        debug!("repositioning push cursor to {}", seek.start);
        state.cursor = seek.start.min(self.size);
        state.discont = true;
        true
    }
}

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Byte-addressable input handed to the backend.
///
/// `is_data_available` backs the backend's availability queries; fully
/// present sources keep the default.
pub trait ByteSource: Send + Sync {
    fn len(&self) -> u64;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_data_available(&self, offset: u64, len: u64) -> bool {
        offset.saturating_add(len) <= self.len()
    }
}

/// Reads the complete source into memory, failing if any byte is missing.
pub fn read_to_vec(source: &dyn ByteSource) -> io::Result<Vec<u8>> {
    let len = usize::try_from(source.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "source too large"))?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let read = source.read_at(filled as u64, &mut buf[filled..])?;
        if read == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        filled += read;
    }
    Ok(buf)
}

#[derive(Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= self.data.len() {
            return Ok(0);
        }
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }
}

/// Random-access file source; reads are seek + read under a lock.
pub struct FileSource {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat {:?}", path))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

/// Append-only buffer that collects a streamed document.
///
/// Its length is the announced total size once known; only the prefix that
/// has actually arrived is reported as available.
#[derive(Default)]
pub struct StreamBuffer {
    state: Mutex<StreamBufferState>,
}

#[derive(Default)]
struct StreamBufferState {
    data: BytesMut,
    total: Option<u64>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &[u8]) {
        self.state.lock().data.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> u64 {
        self.state.lock().data.len() as u64
    }

    pub fn total(&self) -> Option<u64> {
        self.state.lock().total
    }

    pub fn set_total(&self, total: u64) {
        self.state.lock().total = Some(total);
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        state
            .total
            .map_or(false, |total| state.data.len() as u64 >= total)
    }
}

impl ByteSource for StreamBuffer {
    fn len(&self) -> u64 {
        let state = self.state.lock();
        state.total.unwrap_or(state.data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.lock();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= state.data.len() {
            return Ok(0);
        }
        let count = buf.len().min(state.data.len() - start);
        buf[..count].copy_from_slice(&state.data[start..start + count]);
        Ok(count)
    }

    fn is_data_available(&self, offset: u64, len: u64) -> bool {
        offset.saturating_add(len) <= self.buffered()
    }
}

/// What a sequential source announced about itself when loading started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Total size, when a header already provided it.
    pub content_length: Option<u64>,
    /// Whether a size may still arrive later, as with a network reply whose
    /// headers are pending.
    pub network_reply: bool,
}

impl StreamInfo {
    pub fn with_length(content_length: u64) -> Self {
        Self {
            content_length: Some(content_length),
            network_reply: true,
        }
    }

    pub fn network_reply() -> Self {
        Self {
            content_length: None,
            network_reply: true,
        }
    }
}

#[derive(Clone)]
pub enum Source {
    RandomAccess(Arc<dyn ByteSource>),
    Streaming(StreamInfo),
}

impl Source {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Source::RandomAccess(Arc::new(MemorySource::new(data)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Source::RandomAccess(Arc::new(FileSource::open(path)?)))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::RandomAccess(source) => f
                .debug_tuple("RandomAccess")
                .field(&source.len())
                .finish(),
            Source::Streaming(info) => f.debug_tuple("Streaming").field(info).finish(),
        }
    }
}

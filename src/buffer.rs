//! Shared read-only byte buffers and the streaming I/O descriptor used by
//! the hash pipeline.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// A reference-counted, read-only view of a file's bytes.
///
/// A buffer is shared between the owning [`crate::BinFile`], any extracted
/// sub-binary descriptors and the scan workers; it is released when the
/// last holder drops it. Scanning and hashing never mutate it.
#[derive(Debug, Clone)]
pub struct SharedBuf {
    data: Arc<Vec<u8>>,
}

impl SharedBuf {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow `size` bytes starting at `offset`, clipped to the buffer end.
    pub fn slice(&self, offset: u64, size: u64) -> &[u8] {
        let len = self.data.len() as u64;
        let start = offset.min(len);
        let end = offset.saturating_add(size).min(len);
        &self.data[start as usize..end as usize]
    }

    /// Copy bytes starting at `offset` into `out`, returning how many were
    /// available. Reads past the end are clipped, not an error.
    pub fn read_at(&self, offset: u64, out: &mut [u8]) -> usize {
        let src = self.slice(offset, out.len() as u64);
        out[..src.len()].copy_from_slice(src);
        src.len()
    }
}

/// The seek/read/size capability the hash pipeline streams through.
pub trait IoDesc: Send + Sync + std::fmt::Debug {
    /// Total length in bytes.
    fn size(&self) -> u64;
    /// Position the cursor at an absolute offset.
    fn seek(&mut self, offset: u64) -> io::Result<u64>;
    /// Read into `out`, returning the number of bytes read.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize>;
}

/// An [`IoDesc`] backed by a file on disk.
#[derive(Debug)]
pub struct FileDesc {
    file: File,
    size: u64,
}

impl FileDesc {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl IoDesc for FileDesc {
    fn size(&self) -> u64 {
        self.size
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.file.seek(SeekFrom::Start(offset))
    }

    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.file.read(out)
    }
}

/// An in-memory [`IoDesc`], mainly useful for buffers opened without a
/// backing file and for tests.
#[derive(Debug)]
pub struct MemDesc {
    data: Vec<u8>,
    pos: u64,
}

impl MemDesc {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl IoDesc for MemDesc {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.pos = offset.min(self.data.len() as u64);
        Ok(self.pos)
    }

    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let start = self.pos as usize;
        let n = out.len().min(self.data.len().saturating_sub(start));
        out[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::error::ReadResult;

/// Random-access byte source for a document.
///
/// On-disk documents are memory-mapped; in-memory documents own their
/// buffer. Either way the reader sees one contiguous `&[u8]` it can seek
/// freely in.
pub enum ByteSource {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl ByteSource {
    /// Map a file from disk.
    pub fn open(path: &Path) -> ReadResult<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the engine never writes to
        // an open source file (append saves go through a separate handle).
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self::Mapped(map))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Owned(bytes)
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(v) => v,
            Self::Mapped(m) => m,
        }
    }
}

impl Deref for ByteSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Owned(_) => "owned",
            Self::Mapped(_) => "mapped",
        };
        write!(f, "ByteSource({kind}, {} bytes)", self.len())
    }
}

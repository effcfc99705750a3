use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Backing storage of a container.
///
/// The engine assumes exclusive ownership of the storage for the whole
/// session and issues blocking random-access reads and writes.
pub trait Storage {
    /// Read exactly `buf.len()` bytes at given offset.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes at given offset, extending the storage if needed.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Returns current length in bytes.
    fn len(&mut self) -> Result<u64>;

    /// Returns whether the storage holds no byte.
    #[inline]
    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Persist all written data.
    fn sync(&mut self) -> Result<()>;
}

/// File-backed storage.
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Create a new file and fail if it already exists.
    #[inline]
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(FileStorage { file })
    }

    /// Open an existing file for reading and writing.
    #[inline]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileStorage { file })
    }
}

impl Storage for FileStorage {
    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    #[inline]
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    #[inline]
    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[inline]
    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// In-memory storage, mainly for tests and scratch containers.
#[derive(Debug, Default, Clone)]
pub struct MemStorage {
    data: Vec<u8>,
}

impl MemStorage {
    #[inline]
    pub fn new() -> Self {
        MemStorage::default()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Storage for MemStorage {
    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        match self.data.get(start..start + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                Ok(())
            }
            None => Err(Error::IOError(std::io::ErrorKind::UnexpectedEof)),
        }
    }

    #[inline]
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    #[inline]
    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    #[inline]
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

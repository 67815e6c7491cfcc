//! I/O backend interface: `open/close/size/read/write/
//! truncate` over a named resource, with two reference implementations
//! (stdio and mmap) that must produce byte-identical files for the same
//! inputs.

use crate::constants::io_id;
use crate::error::{BcError, BcResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A backend-agnostic handle to an open frame file. Implementations may
/// return a borrowed view into a memory-mapped region from `read` instead of
/// copying (`is_allocation_necessary() == false`); callers that need an
/// owned buffer use `read_owned`.
pub trait IoBackend: Send {
    fn id(&self) -> u8;
    fn size(&self) -> BcResult<u64>;
    fn read_owned(&mut self, offset: u64, len: usize) -> BcResult<Vec<u8>>;
    fn write(&mut self, offset: u64, data: &[u8]) -> BcResult<()>;
    fn truncate(&mut self, len: u64) -> BcResult<()>;
    fn flush(&mut self) -> BcResult<()>;
    /// If false, the backend may return zero-copy views (not exposed by this
    /// trait object directly; concrete backends offer `as_slice()` instead).
    fn is_allocation_necessary(&self) -> bool {
        true
    }
}

fn strip_uri(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

/// Stdio-based file backend.
pub struct StdioBackend {
    path: PathBuf,
    file: File,
}

impl StdioBackend {
    pub fn open_create(path: impl AsRef<Path>) -> BcResult<Self> {
        let path = PathBuf::from(strip_uri(path.as_ref().to_str().unwrap_or_default()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| BcError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(StdioBackend { path, file })
    }

    pub fn open_existing(path: impl AsRef<Path>) -> BcResult<Self> {
        let path = PathBuf::from(strip_uri(path.as_ref().to_str().unwrap_or_default()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| BcError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(StdioBackend { path, file })
    }
}

impl IoBackend for StdioBackend {
    fn id(&self) -> u8 {
        io_id::STDIO
    }

    fn size(&self) -> BcResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| BcError::FileRead {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn read_owned(&mut self, offset: u64, len: usize) -> BcResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|source| BcError::FileRead {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(buf)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> BcResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(data))
            .map_err(|source| BcError::FileWrite {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn truncate(&mut self, len: u64) -> BcResult<()> {
        self.file
            .set_len(len)
            .map_err(|source| BcError::FileTruncate {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn flush(&mut self) -> BcResult<()> {
        self.file.flush().map_err(|source| BcError::FileWrite {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Memory-mapped file backend. The mapping is dropped
/// and recreated whenever a write extends the file past the current
/// mapping, since `memmap2` (unlike Linux's raw `mremap`) has no in-place
/// grow primitive. Callers never cache raw pointers across calls, since this
/// trait's `&mut self` API only exposes offsets into the region, so a
/// remap never invalidates anything held by the caller.
pub struct MmapBackend {
    path: PathBuf,
    file: File,
    map: Option<MmapMut>,
}

impl MmapBackend {
    pub fn open_create(path: impl AsRef<Path>) -> BcResult<Self> {
        let path = PathBuf::from(strip_uri(path.as_ref().to_str().unwrap_or_default()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| BcError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(MmapBackend {
            path,
            file,
            map: None,
        })
    }

    pub fn open_existing(path: impl AsRef<Path>) -> BcResult<Self> {
        let path = PathBuf::from(strip_uri(path.as_ref().to_str().unwrap_or_default()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| BcError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(MmapBackend {
            path,
            file,
            map: None,
        })
    }

    fn remap(&mut self) -> BcResult<()> {
        self.map = None;
        let len = self.size()?;
        if len == 0 {
            return Ok(());
        }
        let map = unsafe {
            MmapOptions::new()
                .len(len as usize)
                .map_mut(&self.file)
                .map_err(|source| BcError::FileRead {
                    path: self.path.display().to_string(),
                    source,
                })?
        };
        self.map = Some(map);
        Ok(())
    }
}

impl IoBackend for MmapBackend {
    fn id(&self) -> u8 {
        io_id::MMAP
    }

    fn size(&self) -> BcResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| BcError::FileRead {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn read_owned(&mut self, offset: u64, len: usize) -> BcResult<Vec<u8>> {
        if self.map.is_none() {
            self.remap()?;
        }
        let map = self
            .map
            .as_ref()
            .ok_or_else(|| BcError::FileRead {
                path: self.path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty mapping"),
            })?;
        let start = offset as usize;
        map.get(start..start + len)
            .map(|s| s.to_vec())
            .ok_or_else(|| BcError::FileRead {
                path: self.path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read past EOF"),
            })
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> BcResult<()> {
        let needed = offset + data.len() as u64;
        if needed > self.size()? {
            self.file
                .set_len(needed)
                .map_err(|source| BcError::FileTruncate {
                    path: self.path.display().to_string(),
                    source,
                })?;
        }
        self.remap()?;
        let map = self.map.as_mut().ok_or_else(|| BcError::FileWrite {
            path: self.path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty mapping"),
        })?;
        let start = offset as usize;
        map[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> BcResult<()> {
        self.map = None;
        self.file
            .set_len(len)
            .map_err(|source| BcError::FileTruncate {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn flush(&mut self) -> BcResult<()> {
        if let Some(map) = &self.map {
            map.flush().map_err(|source| BcError::FileWrite {
                path: self.path.display().to_string(),
                source,
            })?;
        }
        self.file.sync_all().map_err(|source| BcError::FileWrite {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn is_allocation_necessary(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_and_mmap_produce_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let stdio_path = dir.path().join("stdio.bin");
        let mmap_path = dir.path().join("mmap.bin");

        let mut stdio = StdioBackend::open_create(&stdio_path).unwrap();
        stdio.write(0, b"hello ").unwrap();
        stdio.write(6, b"world").unwrap();
        stdio.flush().unwrap();

        let mut mmap = MmapBackend::open_create(&mmap_path).unwrap();
        mmap.write(0, b"hello ").unwrap();
        mmap.write(6, b"world").unwrap();
        mmap.flush().unwrap();

        let a = std::fs::read(&stdio_path).unwrap();
        let b = std::fs::read(&mmap_path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, b"hello world");
    }

    #[test]
    fn strips_file_uri_prefix() {
        assert_eq!(strip_uri("file:///tmp/x.b2frame"), "/tmp/x.b2frame");
        assert_eq!(strip_uri("/tmp/x.b2frame"), "/tmp/x.b2frame");
    }
}

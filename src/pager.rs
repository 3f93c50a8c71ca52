//! Positional page I/O over the host file.
//!
//! # File geometry
//!
//! ```text
//! [ metadata prologue (4096 B) ] [ page 0 ] [ page 1 ] ... [ page N-1 ]
//! ```
//!
//! Page addressing is zero-based and **excludes** the prologue: page `i`
//! starts at byte `4096 + i * 4096`.  On open the file length must satisfy
//! `len >= 4096` and `(len - 4096) % 4096 == 0`; anything else is a format
//! violation.
//!
//! # Locking
//!
//! The pager takes a non-blocking OS-level exclusive lock on the host file
//! and holds it for its whole lifetime.  A second opener fails immediately
//! with [`Error::Lock`] — single-writer access is a format guarantee, not a
//! convention.
//!
//! # Durability
//!
//! Writes go straight to the file; `sync()` flushes them to stable storage.
//! The engine calls `sync()` at the end of every public mutating operation
//! and on close, close paths included after a failed operation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::secretbox::PAGE_SIZE;

pub struct Pager {
    file: File,
    pages: u32,
}

impl Pager {
    /// Create a new host file holding only the (zeroed) metadata prologue.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::lock(&file)?;
        file.set_len(PAGE_SIZE as u64)?;
        debug!(path = %path.display(), "created archive file");
        Ok(Self { file, pages: 0 })
    }

    /// Open an existing host file and validate its length.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::lock(&file)?;

        let len = file.metadata()?.len();
        if len < PAGE_SIZE as u64 || (len - PAGE_SIZE as u64) % PAGE_SIZE as u64 != 0 {
            return Err(Error::Format(format!(
                "File length {len} is not a whole number of {PAGE_SIZE}-byte pages"
            )));
        }
        let pages = ((len - PAGE_SIZE as u64) / PAGE_SIZE as u64) as u32;
        debug!(path = %path.display(), pages, "opened archive file");
        Ok(Self { file, pages })
    }

    fn lock(file: &File) -> Result<()> {
        file.try_lock_exclusive().map_err(|_| Error::Lock)
    }

    /// Number of pages after the prologue.
    pub fn page_count(&self) -> u32 {
        self.pages
    }

    fn offset(&self, idx: u32) -> Result<u64> {
        if idx >= self.pages {
            return Err(Error::Bounds(format!(
                "Page {idx} out of range (have {})",
                self.pages
            )));
        }
        Ok(PAGE_SIZE as u64 * (idx as u64 + 1))
    }

    pub fn read(&mut self, idx: u32) -> Result<[u8; PAGE_SIZE]> {
        let offset = self.offset(idx)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut page = [0u8; PAGE_SIZE];
        self.file.read_exact(&mut page)?;
        Ok(page)
    }

    pub fn write(&mut self, idx: u32, page: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = self.offset(idx)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page).map_err(|_| Error::Write(idx))
    }

    /// Append one page and return its index.
    pub fn append(&mut self, page: &[u8; PAGE_SIZE]) -> Result<u32> {
        let idx = self.pages;
        self.file.seek(SeekFrom::End(0))?;
        self.file
            .write_all(page)
            .map_err(|_| Error::NoSpace)?;
        self.pages += 1;
        Ok(idx)
    }

    /// Read the 4096-byte metadata prologue.
    pub fn meta(&mut self) -> Result<[u8; PAGE_SIZE]> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut page = [0u8; PAGE_SIZE];
        self.file.read_exact(&mut page)?;
        Ok(page)
    }

    /// Overwrite the metadata prologue.
    pub fn set_meta(&mut self, page: &[u8; PAGE_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(page).map_err(|_| Error::Write(0))
    }

    /// Flush all writes to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_read_write_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ar7");
        let mut pager = Pager::create(&path).unwrap();

        let page = [0xA5u8; PAGE_SIZE];
        assert_eq!(pager.append(&page).unwrap(), 0);
        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.read(0).unwrap(), page);

        let other = [0x5Au8; PAGE_SIZE];
        pager.write(0, &other).unwrap();
        assert_eq!(pager.read(0).unwrap(), other);
    }

    #[test]
    fn prologue_is_not_a_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ar7");
        let mut pager = Pager::create(&path).unwrap();
        pager.append(&[1u8; PAGE_SIZE]).unwrap();
        pager.set_meta(&[2u8; PAGE_SIZE]).unwrap();
        assert_eq!(pager.read(0).unwrap(), [1u8; PAGE_SIZE]);
        assert_eq!(pager.meta().unwrap(), [2u8; PAGE_SIZE]);
    }

    #[test]
    fn out_of_range_read_is_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ar7");
        let mut pager = Pager::create(&path).unwrap();
        assert!(matches!(pager.read(0), Err(Error::Bounds(_))));
    }

    #[test]
    fn uneven_length_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ar7");
        {
            let pager = Pager::create(&path).unwrap();
            drop(pager);
        }
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(PAGE_SIZE as u64 + 100).unwrap();
        drop(file);
        assert!(matches!(Pager::open(&path), Err(Error::Format(_))));
    }

    #[test]
    fn second_opener_fails_with_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ar7");
        let _first = Pager::create(&path).unwrap();
        assert!(matches!(Pager::open(&path), Err(Error::Lock)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ar7");
        drop(Pager::create(&path).unwrap());
        assert!(Pager::open(&path).is_ok());
    }
}

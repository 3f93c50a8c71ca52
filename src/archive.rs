//! High-level [`Archive`] API — the primary embedding surface.
//!
//! ```no_run
//! use archive7::{Archive, ArchiveOptions, DeleteMode};
//!
//! let secret = [0u8; 32];
//! let mut ar = Archive::setup("vault.ar7".as_ref(), &secret, ArchiveOptions::default())?;
//! ar.mkdir("/docs")?;
//! ar.mkfile("/docs/hello.txt", b"Hello, world!")?;
//! ar.close()?;
//!
//! let mut ar = Archive::open("vault.ar7".as_ref(), &secret, DeleteMode::Erase)?;
//! assert_eq!(ar.load("/docs/hello.txt")?, b"Hello, world!");
//! # Ok::<(), archive7::Error>(())
//! ```
//!
//! Paths are absolute, `/`-separated, resolved through the path tree.  Every
//! mutating operation finishes with a meta save and an fsync, so a crash
//! between operations loses at most the operation in flight — there is no
//! write-ahead log and no partial-operation recovery.

use std::io::SeekFrom;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::entry::{Entry, EntryKind};
use crate::error::{Error, Result};
use crate::fs::{AccessMode, DeleteMode, EntryPatch, FsManager};
use crate::header::{ArchiveHeader, HEADER_SIZE};
use crate::query::Query;

/// Identity fields for a fresh archive.  Everything defaults to nil/empty.
#[derive(Debug, Default, Clone)]
pub struct ArchiveOptions {
    pub owner: Uuid,
    pub node: Uuid,
    pub domain: Uuid,
    pub title: String,
    pub kind: u8,
    pub role: u8,
    pub usage: u8,
}

pub struct Archive {
    fs: FsManager,
    header: ArchiveHeader,
    delete_mode: DeleteMode,
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Create a new archive file keyed by `secret`.
    pub fn setup(path: &Path, secret: &[u8; 32], options: ArchiveOptions) -> Result<Self> {
        let mut fs = FsManager::setup(path, secret)?;

        let mut header =
            ArchiveHeader::new(options.owner, options.domain, options.node, options.title);
        header.kind = options.kind;
        header.role = options.role;
        header.usage = options.usage;
        let packed = header.pack()?;
        fs.streams().meta_payload_mut()[..HEADER_SIZE].copy_from_slice(&packed);
        fs.flush()?;

        info!(path = %path.display(), id = %header.id, "archive created");
        Ok(Self {
            fs,
            header,
            delete_mode: DeleteMode::Erase,
        })
    }

    /// Open an existing archive.  `delete_mode` is the default for
    /// [`remove`](Archive::remove).
    pub fn open(path: &Path, secret: &[u8; 32], delete_mode: DeleteMode) -> Result<Self> {
        let mut fs = FsManager::open(path, secret)?;
        let header = ArchiveHeader::unpack(fs.streams().meta_payload())?;
        info!(path = %path.display(), id = %header.id, "archive opened");
        Ok(Self {
            fs,
            header,
            delete_mode,
        })
    }

    /// The archive's identity header.
    pub fn stats(&self) -> ArchiveHeader {
        self.header.clone()
    }

    // ── Path plumbing ────────────────────────────────────────────────────────

    /// Split an absolute path into its parent directory path and final name.
    fn split_path(path: &str) -> Result<(&str, &str)> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Error::Argument(format!("Path {path:?} names no entry")));
        }
        match trimmed.rfind('/') {
            Some(at) => Ok((&trimmed[..at], &trimmed[at + 1..])),
            None => Err(Error::Argument(format!("Path {path:?} is not absolute"))),
        }
    }

    fn resolve_parent(&mut self, path: &str) -> Result<(Uuid, String)> {
        let (dir, name) = Self::split_path(path)?;
        let parent = self
            .fs
            .resolve_path(dir, true)?
            .ok_or(Error::ParentNotFound)?;
        Ok((parent, name.to_string()))
    }

    fn resolve_existing(&mut self, path: &str, follow_links: bool) -> Result<Uuid> {
        self.fs
            .resolve_path(path, follow_links)?
            .ok_or(Error::FileNotFound)
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    /// Create a directory.  The parent must already exist.
    pub fn mkdir(&mut self, path: &str) -> Result<Uuid> {
        let (parent, name) = self.resolve_parent(path)?;
        let id = self.fs.create_entry(Entry::dir(Uuid::new_v4(), parent, &name))?;
        self.fs.flush()?;
        Ok(id)
    }

    /// Create a file with `data` as its contents.
    pub fn mkfile(&mut self, path: &str, data: &[u8]) -> Result<Uuid> {
        let (parent, name) = self.resolve_parent(path)?;
        let id = self.fs.create_entry(Entry::file(Uuid::new_v4(), parent, &name))?;
        self.write_contents(id, data)?;
        Ok(id)
    }

    /// Create a link pointing at the entry `target` resolves to.
    pub fn mklink(&mut self, path: &str, target: &str) -> Result<Uuid> {
        let target_id = self
            .fs
            .resolve_path(target, false)?
            .ok_or(Error::LinkTargetMissing)?;
        let (parent, name) = self.resolve_parent(path)?;
        let id = self
            .fs
            .create_entry(Entry::link(Uuid::new_v4(), parent, &name, target_id))?;
        self.fs.flush()?;
        Ok(id)
    }

    // ── Contents ─────────────────────────────────────────────────────────────

    fn write_contents(&mut self, id: Uuid, data: &[u8]) -> Result<()> {
        {
            let mut fo = self.fs.open_file(id, AccessMode::ReadWrite)?;
            fo.truncate(Some(0))?;
            fo.write(data)?;
            fo.close()?;
        }
        let mut entry = self.fs.entry(id)?;
        entry.size = data.len() as u64;
        entry.length = data.len() as u64;
        entry.modified = chrono::Utc::now().timestamp();
        self.fs.save_entry(&entry)?;
        self.fs.flush()
    }

    /// Whole-file read, following links.
    pub fn load(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self.resolve_existing(path, true)?;
        let entry = self.fs.entry(id)?;
        if entry.kind != EntryKind::File {
            return Err(Error::Argument(format!("{path:?} is not a file")));
        }
        let mut fo = self.fs.open_file(id, AccessMode::Read)?;
        let length = fo.len();
        fo.seek(SeekFrom::Start(0))?;
        let data = fo.read(length as usize)?;
        fo.close()?;
        Ok(data)
    }

    /// Whole-file overwrite of an existing file.
    pub fn save(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let id = self.resolve_existing(path, true)?;
        let entry = self.fs.entry(id)?;
        if entry.kind != EntryKind::File {
            return Err(Error::Argument(format!("{path:?} is not a file")));
        }
        self.write_contents(id, data)
    }

    /// The entry record behind `path` (links are not followed).
    pub fn info(&mut self, path: &str) -> Result<Entry> {
        let id = self.resolve_existing(path, false)?;
        self.fs.entry(id)
    }

    // ── Reorganization ───────────────────────────────────────────────────────

    /// Rename an entry in place.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        let id = self.resolve_existing(path, false)?;
        self.fs.change_name(id, new_name)?;
        self.fs.flush()
    }

    /// Move an entry under another directory.
    pub fn move_entry(&mut self, path: &str, new_parent: &str) -> Result<()> {
        let id = self.resolve_existing(path, false)?;
        let parent = self
            .fs
            .resolve_path(new_parent, true)?
            .ok_or(Error::ParentNotFound)?;
        self.fs.change_parent(id, parent)?;
        self.fs.flush()
    }

    /// Remove an entry using the archive's default delete mode.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.remove_with_mode(path, self.delete_mode)
    }

    pub fn remove_with_mode(&mut self, path: &str, mode: DeleteMode) -> Result<()> {
        let id = self.resolve_existing(path, false)?;
        self.fs.delete_entry(id, mode)?;
        self.fs.flush()
    }

    /// Patch entry attributes (owner, deleted flag, user, group, perms).
    pub fn update(&mut self, path: &str, patch: EntryPatch) -> Result<()> {
        let id = self.resolve_existing(path, false)?;
        self.fs.update_entry(id, patch)?;
        self.fs.flush()
    }

    // ── Enumeration ──────────────────────────────────────────────────────────

    /// Depth-first listing of everything beneath `path`.
    pub fn walk(&mut self, path: &str) -> Result<Vec<(Entry, String)>> {
        let id = self.resolve_existing(path, true)?;
        self.fs.walk(id)?.collect()
    }

    /// Scan the entry tree for records matching `query`.
    pub fn search(&mut self, query: &Query) -> Result<Vec<Entry>> {
        let mut found = Vec::new();
        let tree = self.fs.entries_tree();
        tree.scan(self.fs.streams(), |_, raw| {
            let entry = Entry::unpack(raw)?;
            if query.matches(&entry) {
                found.push(entry);
            }
            Ok(())
        })?;
        Ok(found)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Persist the meta block and fsync.
    pub fn flush(&mut self) -> Result<()> {
        self.fs.flush()
    }

    /// Flush and release the archive; the host-file lock drops here.
    pub fn close(self) -> Result<()> {
        info!(id = %self.header.id, "archive closed");
        self.fs.close()
    }
}

// ── Async facade ─────────────────────────────────────────────────────────────

/// Serialized asynchronous wrapper around [`Archive`].
///
/// Every method locks one `tokio::sync::Mutex` for its whole body: calls
/// observe program order and never interleave.  This is a mutual-exclusion
/// wrapper, not parallelism — the engine underneath stays single-writer.
#[cfg(feature = "async")]
pub struct AsyncArchive {
    inner: std::sync::Arc<tokio::sync::Mutex<Archive>>,
}

#[cfg(feature = "async")]
impl AsyncArchive {
    pub fn new(archive: Archive) -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(archive)),
        }
    }

    pub async fn setup(
        path: std::path::PathBuf,
        secret: [u8; 32],
        options: ArchiveOptions,
    ) -> Result<Self> {
        Ok(Self::new(Archive::setup(&path, &secret, options)?))
    }

    pub async fn open(
        path: std::path::PathBuf,
        secret: [u8; 32],
        delete_mode: DeleteMode,
    ) -> Result<Self> {
        Ok(Self::new(Archive::open(&path, &secret, delete_mode)?))
    }

    pub async fn stats(&self) -> ArchiveHeader {
        self.inner.lock().await.stats()
    }

    pub async fn mkdir(&self, path: &str) -> Result<Uuid> {
        self.inner.lock().await.mkdir(path)
    }

    pub async fn mkfile(&self, path: &str, data: &[u8]) -> Result<Uuid> {
        self.inner.lock().await.mkfile(path, data)
    }

    pub async fn mklink(&self, path: &str, target: &str) -> Result<Uuid> {
        self.inner.lock().await.mklink(path, target)
    }

    pub async fn load(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.lock().await.load(path)
    }

    pub async fn save(&self, path: &str, data: &[u8]) -> Result<()> {
        self.inner.lock().await.save(path, data)
    }

    pub async fn info(&self, path: &str) -> Result<Entry> {
        self.inner.lock().await.info(path)
    }

    pub async fn rename(&self, path: &str, new_name: &str) -> Result<()> {
        self.inner.lock().await.rename(path, new_name)
    }

    pub async fn move_entry(&self, path: &str, new_parent: &str) -> Result<()> {
        self.inner.lock().await.move_entry(path, new_parent)
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.inner.lock().await.remove(path)
    }

    pub async fn remove_with_mode(&self, path: &str, mode: DeleteMode) -> Result<()> {
        self.inner.lock().await.remove_with_mode(path, mode)
    }

    pub async fn walk(&self, path: &str) -> Result<Vec<(Entry, String)>> {
        self.inner.lock().await.walk(path)
    }

    pub async fn search(&self, query: &Query) -> Result<Vec<Entry>> {
        self.inner.lock().await.search(query)
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.lock().await.flush()
    }

    /// Close the archive.  Fails when another handle still shares it.
    pub async fn close(self) -> Result<()> {
        match std::sync::Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().close(),
            Err(_) => Err(Error::Argument("Archive handle is still shared".into())),
        }
    }
}

#[cfg(feature = "async")]
impl Clone for AsyncArchive {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

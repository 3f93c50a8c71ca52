//! Filesystem manager — the three registries and their mutation API.
//!
//! Three B+Trees rooted in reserved streams carry the whole hierarchy:
//!
//! | Tree     | Key                     | Value                    |
//! |----------|-------------------------|--------------------------|
//! | entries  | entry uuid              | 406-byte entry record    |
//! | paths    | `uuid5(parent, name)`   | `(kind, entry uuid)`     |
//! | listings | directory uuid          | set of child uuids       |
//!
//! The path tree enforces name uniqueness per directory; the listing tree
//! makes children enumerable without scanning.  Every mutation validates its
//! preconditions against the trees before touching any of them, so a
//! returned error means the registries still agree.
//!
//! The root directory is fixed at `uuid(int = 0)`, named `root`, its own
//! parent, and present in the path tree — entry count and path count stay
//! equal for the whole life of the archive.

use std::path::Path;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::entry::{Entry, EntryKind, ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::manager::{StreamManager, ENTRIES, LISTINGS, PATHS};
use crate::stream::FileObject;
use crate::tree::{MultiTree, SimpleTree};

/// The fixed root directory id.
pub const ROOT_ID: Uuid = Uuid::nil();

/// Path-tree value: kind tag plus entry uuid.
const PATH_VALUE_SIZE: usize = 17;

/// Access discipline for an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// How much of a deleted entry goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Flag the entry deleted, keep everything.
    Soft = 1,
    /// Flag the entry deleted and release its data stream.
    Hard = 2,
    /// Remove the entry from every registry and release its stream.
    Erase = 3,
}

/// Partial update for [`FsManager::update_entry`]; `None` fields are left
/// untouched.
#[derive(Debug, Default, Clone)]
pub struct EntryPatch {
    pub owner: Option<Uuid>,
    pub modified: Option<i64>,
    pub deleted: Option<bool>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub perms: Option<u16>,
}

/// The path-tree key for `name` under `parent`.
pub fn path_key(parent: Uuid, name: &str) -> Uuid {
    Uuid::new_v5(&parent, name.as_bytes())
}

fn path_value(kind: EntryKind, id: Uuid) -> [u8; PATH_VALUE_SIZE] {
    let mut buf = [0u8; PATH_VALUE_SIZE];
    buf[0] = kind.tag();
    buf[1..17].copy_from_slice(id.as_bytes());
    buf
}

fn parse_path_value(raw: &[u8]) -> Result<(EntryKind, Uuid)> {
    if raw.len() < PATH_VALUE_SIZE {
        return Err(Error::Format("Path record truncated".into()));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&raw[1..17]);
    Ok((EntryKind::from_tag(raw[0])?, Uuid::from_bytes(bytes)))
}

fn now() -> i64 {
    Utc::now().timestamp()
}

// ── FsManager ────────────────────────────────────────────────────────────────

pub struct FsManager {
    mgr: StreamManager,
    entries: SimpleTree,
    paths: SimpleTree,
    listings: MultiTree,
}

impl FsManager {
    pub fn setup(path: &Path, secret: &[u8; 32]) -> Result<Self> {
        let mut mgr = StreamManager::setup(path, secret)?;
        let entries = SimpleTree::create(&mut mgr, ENTRIES, ENTRY_SIZE as u32)?;
        let paths = SimpleTree::create(&mut mgr, PATHS, PATH_VALUE_SIZE as u32)?;
        let listings = MultiTree::create(&mut mgr, LISTINGS)?;
        let mut fs = Self {
            mgr,
            entries,
            paths,
            listings,
        };

        let root = Entry::dir(ROOT_ID, ROOT_ID, "root");
        let mut entries = fs.entries;
        entries.insert(&mut fs.mgr, ROOT_ID, &root.pack()?)?;
        fs.entries = entries;
        let mut paths = fs.paths;
        paths.insert(
            &mut fs.mgr,
            path_key(ROOT_ID, "root"),
            &path_value(EntryKind::Dir, ROOT_ID),
        )?;
        fs.paths = paths;
        let mut listings = fs.listings;
        listings.insert(&mut fs.mgr, ROOT_ID)?;
        fs.listings = listings;

        fs.mgr.flush()?;
        Ok(fs)
    }

    pub fn open(path: &Path, secret: &[u8; 32]) -> Result<Self> {
        let mut mgr = StreamManager::open(path, secret)?;
        let entries = SimpleTree::open(&mut mgr, ENTRIES, ENTRY_SIZE as u32)?;
        let paths = SimpleTree::open(&mut mgr, PATHS, PATH_VALUE_SIZE as u32)?;
        let listings = MultiTree::open(&mut mgr, LISTINGS)?;
        Ok(Self {
            mgr,
            entries,
            paths,
            listings,
        })
    }

    pub fn streams(&mut self) -> &mut StreamManager {
        &mut self.mgr
    }

    pub fn flush(&mut self) -> Result<()> {
        self.mgr.flush()
    }

    pub fn close(self) -> Result<()> {
        self.mgr.close()
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Fetch an entry record by id.
    pub fn entry(&mut self, id: Uuid) -> Result<Entry> {
        let entries = self.entries;
        match entries.get(&mut self.mgr, id)? {
            Some(raw) => Entry::unpack(&raw),
            None => Err(Error::KeyMissing(id)),
        }
    }

    /// Name lookup in one directory via the path tree.
    pub fn lookup(&mut self, parent: Uuid, name: &str) -> Result<Option<(EntryKind, Uuid)>> {
        let paths = self.paths;
        match paths.get(&mut self.mgr, path_key(parent, name))? {
            Some(raw) => Ok(Some(parse_path_value(&raw)?)),
            None => Ok(None),
        }
    }

    /// The children of a directory, in listing order.
    pub fn listing(&mut self, dir: Uuid) -> Result<Vec<Uuid>> {
        let listings = self.listings;
        listings
            .items(&mut self.mgr, dir)?
            .ok_or(Error::KeyMissing(dir))
    }

    /// Walk an absolute path component by component.  `None` when any
    /// component is missing.  With `follow_links` a link component is
    /// replaced by its target entry (which must exist) before the walk
    /// continues beneath it.
    pub fn resolve_path(&mut self, path: &str, follow_links: bool) -> Result<Option<Uuid>> {
        let mut current = ROOT_ID;
        for part in path.split('/').filter(|part| !part.is_empty()) {
            let Some((kind, id)) = self.lookup(current, part)? else {
                return Ok(None);
            };
            current = if kind == EntryKind::Link && follow_links {
                let link = self.entry(id)?;
                let entries = self.entries;
                if link.stream.is_nil()
                    || entries.get(&mut self.mgr, link.stream)?.is_none()
                {
                    return Err(Error::LinkTargetMissing);
                }
                link.stream
            } else {
                id
            };
        }
        Ok(Some(current))
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Write an entry record straight back to the entry tree.
    pub(crate) fn save_entry(&mut self, entry: &Entry) -> Result<()> {
        let entries = self.entries;
        entries.update(&mut self.mgr, entry.id, &entry.pack()?)
    }

    pub(crate) fn entries_tree(&self) -> SimpleTree {
        self.entries
    }

    /// Insert a fully formed entry into all three registries.
    pub fn create_entry(&mut self, entry: Entry) -> Result<Uuid> {
        if entry.name.is_empty() {
            return Err(Error::Argument("Entry name is empty".into()));
        }
        let parent = self
            .entry(entry.parent)
            .map_err(|_| Error::ParentNotFound)?;
        if parent.kind != EntryKind::Dir {
            return Err(Error::ParentNotFound);
        }
        let key = path_key(entry.parent, &entry.name);
        let paths = self.paths;
        if paths.get(&mut self.mgr, key)?.is_some() {
            return Err(Error::DuplicateKey(key));
        }
        if entry.kind == EntryKind::Link {
            let target = self
                .entry(entry.stream)
                .map_err(|_| Error::LinkTargetMissing)?;
            if target.kind == EntryKind::Link {
                return Err(Error::LinkToLink);
            }
        }

        let id = entry.id;
        let mut entries = self.entries;
        entries.insert(&mut self.mgr, id, &entry.pack()?)?;
        self.entries = entries;
        let mut paths = self.paths;
        paths.insert(&mut self.mgr, key, &path_value(entry.kind, id))?;
        self.paths = paths;
        let mut listings = self.listings;
        listings.update(&mut self.mgr, entry.parent, &[id], &[])?;
        if entry.kind == EntryKind::Dir {
            listings.insert(&mut self.mgr, id)?;
        }
        self.listings = listings;
        debug!(%id, parent = %entry.parent, name = %entry.name, "entry created");
        Ok(id)
    }

    /// Apply the provided fields only; perms are clamped to `0o777`.
    pub fn update_entry(&mut self, id: Uuid, patch: EntryPatch) -> Result<()> {
        let mut entry = self.entry(id)?;
        if let Some(owner) = patch.owner {
            entry.owner = owner;
        }
        if let Some(modified) = patch.modified {
            entry.modified = modified;
        }
        if let Some(deleted) = patch.deleted {
            entry.deleted = deleted;
        }
        if let Some(user) = patch.user {
            entry.user = user;
        }
        if let Some(group) = patch.group {
            entry.group = group;
        }
        if let Some(perms) = patch.perms {
            entry.perms = perms & crate::entry::PERM_MASK;
        }
        self.save_entry(&entry)
    }

    /// Delete an entry.  A directory must be empty in every mode; the root
    /// is never deletable.
    pub fn delete_entry(&mut self, id: Uuid, mode: DeleteMode) -> Result<()> {
        if id == ROOT_ID {
            return Err(Error::Argument("Can't delete the root directory".into()));
        }
        let mut entry = self.entry(id)?;
        if entry.kind == EntryKind::Dir && !self.listing(id)?.is_empty() {
            return Err(Error::DirectoryNotEmpty);
        }

        match mode {
            DeleteMode::Soft => {
                entry.deleted = true;
                entry.modified = now();
                self.save_entry(&entry)?;
            }
            DeleteMode::Hard => {
                if entry.kind == EntryKind::File && !entry.stream.is_nil() {
                    self.mgr.del_stream(entry.stream)?;
                }
                entry.deleted = true;
                entry.stream = Uuid::nil();
                entry.size = 0;
                entry.length = 0;
                entry.modified = now();
                self.save_entry(&entry)?;
            }
            DeleteMode::Erase => {
                if entry.kind == EntryKind::File && !entry.stream.is_nil() {
                    self.mgr.del_stream(entry.stream)?;
                }
                let mut paths = self.paths;
                paths.delete(&mut self.mgr, path_key(entry.parent, &entry.name))?;
                self.paths = paths;
                let mut listings = self.listings;
                if entry.kind == EntryKind::Dir {
                    listings.delete(&mut self.mgr, id)?;
                }
                listings.update(&mut self.mgr, entry.parent, &[], &[id])?;
                self.listings = listings;
                let mut entries = self.entries;
                entries.delete(&mut self.mgr, id)?;
                self.entries = entries;
            }
        }
        debug!(%id, ?mode, "entry deleted");
        Ok(())
    }

    /// Re-key the path tree for a new name.
    pub fn change_name(&mut self, id: Uuid, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Argument("Entry name is empty".into()));
        }
        let mut entry = self.entry(id)?;
        let new_key = path_key(entry.parent, name);
        let paths = self.paths;
        if paths.get(&mut self.mgr, new_key)?.is_some() {
            return Err(Error::DuplicateKey(new_key));
        }
        let mut paths = self.paths;
        paths.delete(&mut self.mgr, path_key(entry.parent, &entry.name))?;
        paths.insert(&mut self.mgr, new_key, &path_value(entry.kind, id))?;
        self.paths = paths;
        entry.name = name.to_string();
        entry.modified = now();
        self.save_entry(&entry)
    }

    /// Move an entry under another directory, re-keying the path tree and
    /// adjusting both listing sets.
    pub fn change_parent(&mut self, id: Uuid, new_parent: Uuid) -> Result<()> {
        let mut entry = self.entry(id)?;
        let parent = self
            .entry(new_parent)
            .map_err(|_| Error::ParentNotFound)?;
        if parent.kind != EntryKind::Dir {
            return Err(Error::NotADirectory);
        }
        // a directory must not end up inside its own subtree
        let mut cursor = new_parent;
        loop {
            if cursor == id {
                return Err(Error::Argument(
                    "Can't move a directory into itself".into(),
                ));
            }
            if cursor == ROOT_ID {
                break;
            }
            cursor = self.entry(cursor)?.parent;
        }
        let new_key = path_key(new_parent, &entry.name);
        let paths = self.paths;
        if paths.get(&mut self.mgr, new_key)?.is_some() {
            return Err(Error::DuplicateKey(new_key));
        }

        let mut paths = self.paths;
        paths.delete(&mut self.mgr, path_key(entry.parent, &entry.name))?;
        paths.insert(&mut self.mgr, new_key, &path_value(entry.kind, id))?;
        self.paths = paths;
        let mut listings = self.listings;
        listings.update(&mut self.mgr, entry.parent, &[], &[id])?;
        listings.update(&mut self.mgr, new_parent, &[id], &[])?;
        self.listings = listings;
        entry.parent = new_parent;
        entry.modified = now();
        self.save_entry(&entry)
    }

    /// Open a file entry's data stream.  The stream is allocated on first
    /// open; the returned handle exclusively borrows the manager, so a
    /// second open cannot exist while it lives.
    pub fn open_file(&mut self, id: Uuid, mode: AccessMode) -> Result<FileObject<'_>> {
        let mut entry = self.entry(id)?;
        if entry.kind != EntryKind::File {
            return Err(Error::Argument(format!("Entry {id} is not a file")));
        }
        if entry.stream.is_nil() {
            let desc = self.mgr.new_stream()?;
            entry.stream = desc.identity;
            entry.modified = now();
            self.save_entry(&entry)?;
        }
        let mut file = FileObject::open(&mut self.mgr, entry.stream)?;
        if mode == AccessMode::Read {
            file.set_read_only();
        }
        Ok(file)
    }

    /// Absolute path of an entry, reconstructed through its ancestors.
    pub fn entry_path(&mut self, id: Uuid) -> Result<String> {
        if id == ROOT_ID {
            return Ok("/".to_string());
        }
        let mut names = Vec::new();
        let mut cursor = id;
        while cursor != ROOT_ID {
            let entry = self.entry(cursor)?;
            names.push(entry.name);
            cursor = entry.parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Depth-first iterator over everything beneath `dir`.
    pub fn walk(&mut self, dir: Uuid) -> Result<Walk<'_>> {
        let base = self.entry_path(dir)?;
        let children = self.listing(dir)?;
        let stack: Vec<(Uuid, String)> = children
            .into_iter()
            .rev()
            .map(|child| (child, base.clone()))
            .collect();
        Ok(Walk { fs: self, stack })
    }
}

// ── Walk ─────────────────────────────────────────────────────────────────────

/// Depth-first traversal yielding `(entry, absolute path)`.  A child whose
/// record is missing from the entry tree yields a synthetic `Err`-kind entry
/// named `<error>` instead of aborting the walk.
pub struct Walk<'a> {
    fs: &'a mut FsManager,
    stack: Vec<(Uuid, String)>,
}

impl Iterator for Walk<'_> {
    type Item = Result<(Entry, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, parent_path) = self.stack.pop()?;
        let entries = self.fs.entries;
        let entry = match entries.get(&mut self.fs.mgr, id) {
            Ok(Some(raw)) => match Entry::unpack(&raw) {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err)),
            },
            Ok(None) => Entry::error(id, ROOT_ID),
            Err(err) => return Some(Err(err)),
        };

        let path = if parent_path.ends_with('/') {
            format!("{parent_path}{}", entry.name)
        } else {
            format!("{parent_path}/{}", entry.name)
        };

        if entry.kind == EntryKind::Dir {
            let listings = self.fs.listings;
            match listings.items(&mut self.fs.mgr, entry.id) {
                Ok(Some(children)) => {
                    for child in children.into_iter().rev() {
                        self.stack.push((child, path.clone()));
                    }
                }
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
        Some(Ok((entry, path)))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

//! B+Trees paged through a stream.
//!
//! Two flavours share one skeleton: [`SimpleTree`] maps a uuid key to one
//! fixed-size value, [`MultiTree`] maps a uuid key to a set of 16-byte items
//! spilled into an overflow chain.  Pages are `DATA_SIZE` bytes so one tree
//! page occupies exactly one block of the backing stream; page 0 is the tree
//! meta, node pages start at 1.
//!
//! # Tree meta (21 bytes at page 0, big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   kind        's' simple, 'm' multi
//!    1      4   root        root page, -1 when the tree is empty
//!    5      4   empty       head of the recycled-page stack, -1 = none
//!    9      4   order       max records per leaf
//!   13      4   ref_order   max references per interior node
//!   17      4   value_size  record value bytes
//! ```
//!
//! # Shape rules
//!
//! A tree that fits one node is a single `Start` leaf.  A full leaf splits
//! at the midpoint and promotes the least key of the new right leaf; a full
//! reference node splits around its median reference.  The root split grows
//! the height, converting the `Start` into plain leaves under a fresh
//! `Root`.  Leaves are chained through their header `next` in key order.
//!
//! Delete removes the record and stops — no merging, no redistribution.
//! Under-full and even empty leaves are tolerated; searches handle them.
//!
//! Recycled pages become `Empty` nodes on a per-tree stack rooted in the
//! meta; `new_page` pops the stack before extending the stream.

mod node;

use std::io::SeekFrom;

use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

use crate::block::DATA_SIZE;
use crate::error::{Error, Result};
use crate::manager::StreamManager;
use crate::stream::FileObject;

use node::{
    search_records, Node, Record, Reference, SearchResult, ITEM_SIZE, NODE_HEADER_SIZE,
    RECORD_OVERHEAD, REFERENCE_SIZE,
};

/// Tree pages are exactly one block payload.
pub const TREE_PAGE_SIZE: usize = DATA_SIZE;

pub(crate) const TREE_META_SIZE: usize = 21;

const KIND_SIMPLE: u8 = b's';
const KIND_MULTI: u8 = b'm';

/// Items one overflow node can hold.
const ITEMS_PER_NODE: usize = (TREE_PAGE_SIZE - NODE_HEADER_SIZE) / ITEM_SIZE;

fn leaf_order(value_size: u32) -> u32 {
    ((TREE_PAGE_SIZE - NODE_HEADER_SIZE) / (RECORD_OVERHEAD + value_size as usize)) as u32
}

fn reference_order() -> u32 {
    ((TREE_PAGE_SIZE - NODE_HEADER_SIZE) / REFERENCE_SIZE) as u32
}

// ── Core ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct TreeCore {
    slot: usize,
    kind: u8,
    root: i32,
    empty: i32,
    order: u32,
    ref_order: u32,
    value_size: u32,
}

impl TreeCore {
    fn create(mgr: &mut StreamManager, slot: usize, kind: u8, value_size: u32) -> Result<Self> {
        let core = Self {
            slot,
            kind,
            root: -1,
            empty: -1,
            order: leaf_order(value_size),
            ref_order: reference_order(),
            value_size,
        };
        if core.order < 2 {
            return Err(Error::Argument(format!(
                "Value size {value_size} leaves no room for records"
            )));
        }
        let mut fo = FileObject::open_internal(mgr, slot)?;
        let mut page = vec![0u8; TREE_PAGE_SIZE];
        core.pack_meta(&mut page);
        fo.write(&page)?;
        fo.close()?;
        Ok(core)
    }

    fn open(mgr: &mut StreamManager, slot: usize, kind: u8, value_size: u32) -> Result<Self> {
        let mut fo = FileObject::open_internal(mgr, slot)?;
        let raw = fo.read(TREE_META_SIZE)?;
        fo.close()?;
        if raw.len() < TREE_META_SIZE {
            return Err(Error::Format("Tree meta page truncated".into()));
        }
        let core = Self {
            slot,
            kind: raw[0],
            root: BigEndian::read_i32(&raw[1..5]),
            empty: BigEndian::read_i32(&raw[5..9]),
            order: BigEndian::read_u32(&raw[9..13]),
            ref_order: BigEndian::read_u32(&raw[13..17]),
            value_size: BigEndian::read_u32(&raw[17..21]),
        };
        if core.kind != kind {
            return Err(Error::Format(format!(
                "Tree kind {:?} where {:?} was expected",
                core.kind as char, kind as char
            )));
        }
        if core.value_size != value_size
            || core.order != leaf_order(value_size)
            || core.ref_order != reference_order()
        {
            return Err(Error::Format(format!(
                "Tree geometry mismatch (value size {} vs {value_size})",
                core.value_size
            )));
        }
        Ok(core)
    }

    fn pack_meta(&self, buf: &mut [u8]) {
        buf[0] = self.kind;
        BigEndian::write_i32(&mut buf[1..5], self.root);
        BigEndian::write_i32(&mut buf[5..9], self.empty);
        BigEndian::write_u32(&mut buf[9..13], self.order);
        BigEndian::write_u32(&mut buf[13..17], self.ref_order);
        BigEndian::write_u32(&mut buf[17..21], self.value_size);
    }

    fn write_meta(&self, fo: &mut FileObject<'_>) -> Result<()> {
        let mut buf = [0u8; TREE_META_SIZE];
        self.pack_meta(&mut buf);
        self.seek_to(fo, 0)?;
        fo.write(&buf)?;
        Ok(())
    }

    // ── Page I/O ─────────────────────────────────────────────────────────────

    fn seek_to(&self, fo: &mut FileObject<'_>, offset: u64) -> Result<()> {
        let landed = fo.seek(SeekFrom::Start(offset))?;
        if landed != offset {
            return Err(Error::Bounds(format!(
                "Tree offset {offset} beyond stream end {}",
                fo.len()
            )));
        }
        Ok(())
    }

    fn read_node(&self, fo: &mut FileObject<'_>, page: i32) -> Result<Node> {
        if page < 0 {
            return Err(Error::Bounds("Tree page -1 is not addressable".into()));
        }
        self.seek_to(fo, page as u64 * TREE_PAGE_SIZE as u64)?;
        let raw = fo.read(TREE_PAGE_SIZE)?;
        if raw.len() != TREE_PAGE_SIZE {
            return Err(Error::Bounds(format!("Tree page {page} truncated")));
        }
        Node::unpack(&raw, self.value_size as usize)
    }

    fn write_node(&self, fo: &mut FileObject<'_>, page: i32, node: &Node) -> Result<()> {
        let raw = node.pack(self.value_size as usize, TREE_PAGE_SIZE)?;
        self.seek_to(fo, page as u64 * TREE_PAGE_SIZE as u64)?;
        fo.write(&raw)?;
        Ok(())
    }

    /// Pop the empty stack, or extend the stream by one zeroed page.
    fn new_page(&mut self, fo: &mut FileObject<'_>) -> Result<i32> {
        if self.empty >= 0 {
            let page = self.empty;
            match self.read_node(fo, page)? {
                Node::Empty { next } => {
                    self.empty = next;
                    self.write_meta(fo)?;
                    Ok(page)
                }
                other => Err(Error::Format(format!(
                    "Empty-list points at a live {:?} node",
                    other.kind() as char
                ))),
            }
        } else {
            let len = fo.len();
            let page = (len / TREE_PAGE_SIZE as u64) as i32;
            self.seek_to(fo, len)?;
            fo.write(&vec![0u8; TREE_PAGE_SIZE])?;
            Ok(page)
        }
    }

    fn recycle_page(&mut self, fo: &mut FileObject<'_>, page: i32) -> Result<()> {
        self.write_node(fo, page, &Node::Empty { next: self.empty })?;
        self.empty = page;
        self.write_meta(fo)
    }

    // ── Search ───────────────────────────────────────────────────────────────

    /// The child to descend into for `key`.
    fn descend(refs: &[Reference], key: Uuid) -> i32 {
        if key < refs[0].key {
            return refs[0].before;
        }
        let mut child = refs[0].after;
        for reference in refs {
            if reference.key <= key {
                child = reference.after;
            } else {
                break;
            }
        }
        child
    }

    /// Walk from the root to the leaf responsible for `key`, collecting the
    /// reference nodes passed on the way (root first).
    fn locate(
        &self,
        fo: &mut FileObject<'_>,
        key: Uuid,
    ) -> Result<(i32, Node, Vec<(i32, Node)>)> {
        let mut path = Vec::new();
        let mut page = self.root;
        loop {
            let node = self.read_node(fo, page)?;
            let child = match &node {
                Node::Start { .. } | Node::Leaf { .. } => None,
                Node::Root { refs } | Node::Structure { refs } => {
                    Some(Self::descend(refs, key))
                }
                other => {
                    return Err(Error::Format(format!(
                        "Unexpected {:?} node in a search path",
                        other.kind() as char
                    )))
                }
            };
            match child {
                None => return Ok((page, node, path)),
                Some(next) => {
                    path.push((page, node));
                    page = next;
                }
            }
        }
    }

    fn get_record(&self, fo: &mut FileObject<'_>, key: Uuid) -> Result<Option<Record>> {
        if self.root < 0 {
            return Ok(None);
        }
        let (_, leaf, _) = self.locate(fo, key)?;
        let records = match &leaf {
            Node::Start { records } | Node::Leaf { records, .. } => records,
            _ => unreachable!("locate returns leaves"),
        };
        Ok(match search_records(records, key) {
            SearchResult::Found(at) => Some(records[at].clone()),
            SearchResult::NotFound(_) => None,
        })
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    fn insert_record(&mut self, fo: &mut FileObject<'_>, record: Record) -> Result<()> {
        if self.root < 0 {
            let page = self.new_page(fo)?;
            self.write_node(fo, page, &Node::Start { records: vec![record] })?;
            self.root = page;
            return self.write_meta(fo);
        }

        let key = record.key;
        let (leaf_page, leaf, path) = self.locate(fo, key)?;
        let (was_start, next, mut records) = match leaf {
            Node::Start { records } => (true, -1, records),
            Node::Leaf { next, records } => (false, next, records),
            _ => unreachable!("locate returns leaves"),
        };

        match search_records(&records, key) {
            SearchResult::Found(_) => return Err(Error::DuplicateKey(key)),
            SearchResult::NotFound(at) => records.insert(at, record),
        }

        if records.len() <= self.order as usize {
            let node = if was_start {
                Node::Start { records }
            } else {
                Node::Leaf { next, records }
            };
            return self.write_node(fo, leaf_page, &node);
        }

        // Split at the midpoint; the least key of the right half moves up.
        let mid = records.len() / 2;
        let right_records = records.split_off(mid);
        let promote = right_records[0].key;
        let right_page = self.new_page(fo)?;
        self.write_node(fo, right_page, &Node::Leaf { next, records: right_records })?;
        self.write_node(fo, leaf_page, &Node::Leaf { next: right_page, records })?;
        self.promote(fo, path, leaf_page, right_page, promote)
    }

    /// Insert the reference `left |key| right` into the parent chain,
    /// splitting interior nodes upward as far as necessary.
    fn promote(
        &mut self,
        fo: &mut FileObject<'_>,
        mut path: Vec<(i32, Node)>,
        left: i32,
        right: i32,
        key: Uuid,
    ) -> Result<()> {
        let Some((page, node)) = path.pop() else {
            // The split node was the root: grow the height.
            let root_page = self.new_page(fo)?;
            let root = Node::Root {
                refs: vec![Reference { before: left, after: right, key }],
            };
            self.write_node(fo, root_page, &root)?;
            self.root = root_page;
            return self.write_meta(fo);
        };

        let (was_root, mut refs) = match node {
            Node::Root { refs } => (true, refs),
            Node::Structure { refs } => (false, refs),
            _ => unreachable!("path holds reference nodes"),
        };

        let at = refs
            .iter()
            .position(|reference| key < reference.key)
            .unwrap_or(refs.len());
        refs.insert(at, Reference { before: left, after: right, key });
        if at + 1 < refs.len() {
            refs[at + 1].before = right;
        }

        if refs.len() <= self.ref_order as usize {
            let node = if was_root {
                Node::Root { refs }
            } else {
                Node::Structure { refs }
            };
            return self.write_node(fo, page, &node);
        }

        // Split around the median reference, which moves up a level.
        let mid = refs.len() / 2;
        let mut right_refs = refs.split_off(mid);
        let median = right_refs.remove(0);
        let right_page = self.new_page(fo)?;
        self.write_node(fo, right_page, &Node::Structure { refs: right_refs })?;
        self.write_node(fo, page, &Node::Structure { refs })?;
        self.promote(fo, path, page, right_page, median.key)
    }

    /// Remove and return the record for `key`.  The leaf is left as-is
    /// otherwise — no rebalancing.
    fn take_record(&mut self, fo: &mut FileObject<'_>, key: Uuid) -> Result<Record> {
        if self.root < 0 {
            return Err(Error::KeyMissing(key));
        }
        let (leaf_page, leaf, _) = self.locate(fo, key)?;
        let (was_start, next, mut records) = match leaf {
            Node::Start { records } => (true, -1, records),
            Node::Leaf { next, records } => (false, next, records),
            _ => unreachable!("locate returns leaves"),
        };
        let record = match search_records(&records, key) {
            SearchResult::Found(at) => records.remove(at),
            SearchResult::NotFound(_) => return Err(Error::KeyMissing(key)),
        };
        let node = if was_start {
            Node::Start { records }
        } else {
            Node::Leaf { next, records }
        };
        self.write_node(fo, leaf_page, &node)?;
        Ok(record)
    }

    /// Replace the stored record for `key` (page and value) in place.
    fn replace_record(
        &self,
        fo: &mut FileObject<'_>,
        key: Uuid,
        page: i32,
        value: Vec<u8>,
    ) -> Result<()> {
        if self.root < 0 {
            return Err(Error::KeyMissing(key));
        }
        let (leaf_page, leaf, _) = self.locate(fo, key)?;
        let (was_start, next, mut records) = match leaf {
            Node::Start { records } => (true, -1, records),
            Node::Leaf { next, records } => (false, next, records),
            _ => unreachable!("locate returns leaves"),
        };
        match search_records(&records, key) {
            SearchResult::Found(at) => {
                records[at].page = page;
                records[at].value = value;
            }
            SearchResult::NotFound(_) => return Err(Error::KeyMissing(key)),
        }
        let node = if was_start {
            Node::Start { records }
        } else {
            Node::Leaf { next, records }
        };
        self.write_node(fo, leaf_page, &node)
    }

    /// Visit every record in key order, following the leaf chain.
    fn scan_records(
        &self,
        fo: &mut FileObject<'_>,
        visit: &mut dyn FnMut(&Record) -> Result<()>,
    ) -> Result<()> {
        if self.root < 0 {
            return Ok(());
        }
        let mut page = self.root;
        loop {
            match self.read_node(fo, page)? {
                Node::Start { .. } | Node::Leaf { .. } => break,
                Node::Root { refs } | Node::Structure { refs } => page = refs[0].before,
                other => {
                    return Err(Error::Format(format!(
                        "Unexpected {:?} node in a search path",
                        other.kind() as char
                    )))
                }
            }
        }
        loop {
            let (next, records) = match self.read_node(fo, page)? {
                Node::Start { records } => (-1, records),
                Node::Leaf { next, records } => (next, records),
                other => {
                    return Err(Error::Format(format!(
                        "Leaf chain hit a {:?} node",
                        other.kind() as char
                    )))
                }
            };
            for record in &records {
                visit(record)?;
            }
            if next < 0 {
                return Ok(());
            }
            page = next;
        }
    }
}

// ── SimpleTree ───────────────────────────────────────────────────────────────

/// Key → fixed-size value index.
#[derive(Debug, Clone, Copy)]
pub struct SimpleTree {
    core: TreeCore,
}

impl Default for SimpleTree {
    /// Placeholder for two-phase construction; never usable as a tree.
    fn default() -> Self {
        Self {
            core: TreeCore {
                slot: 0,
                kind: KIND_SIMPLE,
                root: -1,
                empty: -1,
                order: 0,
                ref_order: 0,
                value_size: 0,
            },
        }
    }
}

impl SimpleTree {
    pub(crate) fn create(
        mgr: &mut StreamManager,
        slot: usize,
        value_size: u32,
    ) -> Result<Self> {
        Ok(Self {
            core: TreeCore::create(mgr, slot, KIND_SIMPLE, value_size)?,
        })
    }

    pub(crate) fn open(mgr: &mut StreamManager, slot: usize, value_size: u32) -> Result<Self> {
        Ok(Self {
            core: TreeCore::open(mgr, slot, KIND_SIMPLE, value_size)?,
        })
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.core.value_size as usize {
            return Err(Error::Argument(format!(
                "Value is {} bytes, tree holds {}",
                value.len(),
                self.core.value_size
            )));
        }
        Ok(())
    }

    pub fn get(&self, mgr: &mut StreamManager, key: Uuid) -> Result<Option<Vec<u8>>> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let found = self.core.get_record(&mut fo, key)?;
        fo.close()?;
        Ok(found.map(|record| record.value))
    }

    /// Insert a new key.  An existing key is a [`Error::DuplicateKey`].
    pub fn insert(&mut self, mgr: &mut StreamManager, key: Uuid, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = self.core.insert_record(
            &mut fo,
            Record { page: -1, key, value: value.to_vec() },
        );
        fo.close()?;
        outcome
    }

    /// Replace the value of an existing key.
    pub fn update(&self, mgr: &mut StreamManager, key: Uuid, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = self.core.replace_record(&mut fo, key, -1, value.to_vec());
        fo.close()?;
        outcome
    }

    /// Remove a key.  Leaves are not rebalanced.
    pub fn delete(&mut self, mgr: &mut StreamManager, key: Uuid) -> Result<()> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = self.core.take_record(&mut fo, key).map(|_| ());
        fo.close()?;
        outcome
    }

    /// Visit every `(key, value)` pair in key order.
    pub fn scan(
        &self,
        mgr: &mut StreamManager,
        mut visit: impl FnMut(Uuid, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = self
            .core
            .scan_records(&mut fo, &mut |record| visit(record.key, &record.value));
        fo.close()?;
        outcome
    }

    /// All keys in ascending order.
    pub fn keys(&self, mgr: &mut StreamManager) -> Result<Vec<Uuid>> {
        let mut keys = Vec::new();
        self.scan(mgr, |key, _| {
            keys.push(key);
            Ok(())
        })?;
        Ok(keys)
    }
}

// ── MultiTree ────────────────────────────────────────────────────────────────

/// Key → set-of-items index.  The record stores the item count; the items
/// live in a chain of overflow nodes headed by the record's page field.
#[derive(Debug, Clone, Copy)]
pub struct MultiTree {
    core: TreeCore,
}

impl MultiTree {
    pub(crate) fn create(mgr: &mut StreamManager, slot: usize) -> Result<Self> {
        Ok(Self {
            core: TreeCore::create(mgr, slot, KIND_MULTI, 4)?,
        })
    }

    pub(crate) fn open(mgr: &mut StreamManager, slot: usize) -> Result<Self> {
        Ok(Self {
            core: TreeCore::open(mgr, slot, KIND_MULTI, 4)?,
        })
    }

    /// Register a key with an empty item set.
    pub fn insert(&mut self, mgr: &mut StreamManager, key: Uuid) -> Result<()> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = self.core.insert_record(
            &mut fo,
            Record { page: -1, key, value: vec![0u8; 4] },
        );
        fo.close()?;
        outcome
    }

    /// The item set for `key`, or `None` when the key is not registered.
    pub fn items(&self, mgr: &mut StreamManager, key: Uuid) -> Result<Option<Vec<Uuid>>> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = match self.core.get_record(&mut fo, key)? {
            Some(record) => {
                let count = BigEndian::read_u32(&record.value);
                Some(self.read_chain(&mut fo, record.page, count)?)
            }
            None => None,
        };
        fo.close()?;
        Ok(outcome)
    }

    /// Merge `insertions` into the set and drop `deletions`.  The old chain
    /// is recycled wholesale and a fresh one is built in a single pass.
    pub fn update(
        &mut self,
        mgr: &mut StreamManager,
        key: Uuid,
        insertions: &[Uuid],
        deletions: &[Uuid],
    ) -> Result<()> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = (|| {
            let record = self
                .core
                .get_record(&mut fo, key)?
                .ok_or(Error::KeyMissing(key))?;
            let count = BigEndian::read_u32(&record.value);
            let existing = self.read_chain(&mut fo, record.page, count)?;

            let mut items: Vec<Uuid> = existing
                .into_iter()
                .filter(|item| !deletions.contains(item))
                .collect();
            for item in insertions {
                if !deletions.contains(item) && !items.contains(item) {
                    items.push(*item);
                }
            }

            self.recycle_chain(&mut fo, record.page)?;
            let head = self.build_chain(&mut fo, &items)?;
            let mut value = vec![0u8; 4];
            BigEndian::write_u32(&mut value, items.len() as u32);
            self.core.replace_record(&mut fo, key, head, value)
        })();
        fo.close()?;
        outcome
    }

    /// Unregister a key, recycling its whole chain.
    pub fn delete(&mut self, mgr: &mut StreamManager, key: Uuid) -> Result<()> {
        let mut fo = FileObject::open_internal(mgr, self.core.slot)?;
        let outcome = (|| {
            let record = self.core.take_record(&mut fo, key)?;
            self.recycle_chain(&mut fo, record.page)
        })();
        fo.close()?;
        outcome
    }

    fn read_chain(&self, fo: &mut FileObject<'_>, head: i32, count: u32) -> Result<Vec<Uuid>> {
        let mut items = Vec::with_capacity(count as usize);
        let mut page = head;
        while page >= 0 && (items.len() as u32) < count {
            match self.core.read_node(fo, page)? {
                Node::Items { next, items: chunk } => {
                    items.extend(chunk);
                    page = next;
                }
                other => {
                    return Err(Error::Format(format!(
                        "Item chain hit a {:?} node",
                        other.kind() as char
                    )))
                }
            }
        }
        if items.len() as u32 != count {
            return Err(Error::Format(format!(
                "Item chain holds {} items, record says {count}",
                items.len()
            )));
        }
        Ok(items)
    }

    fn recycle_chain(&mut self, fo: &mut FileObject<'_>, head: i32) -> Result<()> {
        let mut page = head;
        while page >= 0 {
            let next = match self.core.read_node(fo, page)? {
                Node::Items { next, .. } => next,
                other => {
                    return Err(Error::Format(format!(
                        "Item chain hit a {:?} node",
                        other.kind() as char
                    )))
                }
            };
            self.core.recycle_page(fo, page)?;
            page = next;
        }
        Ok(())
    }

    /// Chain `items` into fresh overflow nodes, back to front so each node
    /// can link the one after it.  Returns the head page, -1 for no items.
    fn build_chain(&mut self, fo: &mut FileObject<'_>, items: &[Uuid]) -> Result<i32> {
        let mut next = -1;
        for chunk in items.chunks(ITEMS_PER_NODE).rev() {
            let page = self.core.new_page(fo)?;
            self.core
                .write_node(fo, page, &Node::Items { next, items: chunk.to_vec() })?;
            next = page;
        }
        Ok(next)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ENTRIES, PATHS};
    use tempfile::tempdir;

    fn fresh() -> (tempfile::TempDir, StreamManager) {
        let dir = tempdir().unwrap();
        let mgr = StreamManager::setup(&dir.path().join("t.ar7"), &[4u8; 32]).unwrap();
        (dir, mgr)
    }

    fn value(fill: u8) -> Vec<u8> {
        vec![fill; 16]
    }

    #[test]
    fn insert_get_update_delete() {
        let (_dir, mut mgr) = fresh();
        let mut tree = SimpleTree::create(&mut mgr, ENTRIES, 16).unwrap();
        let key = Uuid::new_v4();

        assert!(tree.get(&mut mgr, key).unwrap().is_none());
        tree.insert(&mut mgr, key, &value(1)).unwrap();
        assert_eq!(tree.get(&mut mgr, key).unwrap().unwrap(), value(1));

        assert!(matches!(
            tree.insert(&mut mgr, key, &value(2)),
            Err(Error::DuplicateKey(_))
        ));

        tree.update(&mut mgr, key, &value(3)).unwrap();
        assert_eq!(tree.get(&mut mgr, key).unwrap().unwrap(), value(3));

        tree.delete(&mut mgr, key).unwrap();
        assert!(tree.get(&mut mgr, key).unwrap().is_none());
        assert!(matches!(
            tree.delete(&mut mgr, key),
            Err(Error::KeyMissing(_))
        ));
    }

    #[test]
    fn many_keys_iterate_in_ascending_order() {
        let (_dir, mut mgr) = fresh();
        let mut tree = SimpleTree::create(&mut mgr, ENTRIES, 16).unwrap();

        let mut keys: Vec<Uuid> = (0..2_000u32)
            .map(|i| Uuid::from_u128((i as u128).wrapping_mul(0x9E37_79B9_7F4A_7C15) << 32))
            .collect();
        for key in &keys {
            tree.insert(&mut mgr, *key, key.as_bytes()).unwrap();
        }

        let scanned = tree.keys(&mut mgr).unwrap();
        keys.sort();
        assert_eq!(scanned, keys);
        for pair in scanned.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        for key in &keys {
            assert_eq!(
                tree.get(&mut mgr, *key).unwrap().unwrap(),
                key.as_bytes().to_vec()
            );
        }
    }

    #[test]
    fn delete_leaves_underfull_leaf() {
        let (_dir, mut mgr) = fresh();
        let mut tree = SimpleTree::create(&mut mgr, ENTRIES, 16).unwrap();

        // enough keys to force several splits
        let keys: Vec<Uuid> = (1..=600u128).map(Uuid::from_u128).collect();
        for key in &keys {
            tree.insert(&mut mgr, *key, &value(7)).unwrap();
        }
        // drain a contiguous run, emptying at least one leaf completely
        for key in &keys[..300] {
            tree.delete(&mut mgr, *key).unwrap();
        }
        // the tree stays searchable and ordered without any rebalance
        let remaining = tree.keys(&mut mgr).unwrap();
        assert_eq!(remaining, keys[300..].to_vec());
        assert!(tree.get(&mut mgr, keys[0]).unwrap().is_none());
        assert_eq!(
            tree.get(&mut mgr, keys[400]).unwrap().unwrap(),
            value(7)
        );
    }

    #[test]
    fn deleted_key_can_be_reinserted() {
        let (_dir, mut mgr) = fresh();
        let mut tree = SimpleTree::create(&mut mgr, ENTRIES, 16).unwrap();
        let key = Uuid::new_v4();
        tree.insert(&mut mgr, key, &value(1)).unwrap();
        tree.delete(&mut mgr, key).unwrap();
        tree.insert(&mut mgr, key, &value(2)).unwrap();
        assert_eq!(tree.get(&mut mgr, key).unwrap().unwrap(), value(2));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ar7");
        let keys: Vec<Uuid> = (0..500u128).map(|i| Uuid::from_u128(i * 7 + 1)).collect();
        {
            let mut mgr = StreamManager::setup(&path, &[4u8; 32]).unwrap();
            let mut tree = SimpleTree::create(&mut mgr, ENTRIES, 16).unwrap();
            for key in &keys {
                tree.insert(&mut mgr, *key, &value(9)).unwrap();
            }
            mgr.close().unwrap();
        }
        let mut mgr = StreamManager::open(&path, &[4u8; 32]).unwrap();
        let tree = SimpleTree::open(&mut mgr, ENTRIES, 16).unwrap();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(tree.keys(&mut mgr).unwrap(), sorted);
    }

    #[test]
    fn hundred_thousand_random_keys_reopen_and_iterate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.ar7");
        let mut keys: Vec<Uuid> = (0..100_000).map(|_| Uuid::new_v4()).collect();
        {
            let mut mgr = StreamManager::setup(&path, &[4u8; 32]).unwrap();
            let mut tree = SimpleTree::create(&mut mgr, PATHS, 17).unwrap();
            let payload = [6u8; 17];
            for key in &keys {
                tree.insert(&mut mgr, *key, &payload).unwrap();
            }
            mgr.close().unwrap();
        }
        let mut mgr = StreamManager::open(&path, &[4u8; 32]).unwrap();
        let tree = SimpleTree::open(&mut mgr, PATHS, 17).unwrap();
        let scanned = tree.keys(&mut mgr).unwrap();
        keys.sort();
        assert_eq!(scanned.len(), keys.len());
        assert_eq!(scanned, keys);
        for pair in scanned.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn recycled_pages_are_reused_before_growth() {
        let (_dir, mut mgr) = fresh();
        let mut tree = MultiTree::create(&mut mgr, ENTRIES).unwrap();
        let key = Uuid::new_v4();
        tree.insert(&mut mgr, key).unwrap();

        // grow a chain, shrink it, grow again — the stream must not expand
        // the second time because the empty stack feeds the new chain
        let items: Vec<Uuid> = (1..=500u128).map(Uuid::from_u128).collect();
        tree.update(&mut mgr, key, &items, &[]).unwrap();
        let len_after_grow = mgr.internal(ENTRIES).length;
        tree.update(&mut mgr, key, &[], &items).unwrap();
        tree.update(&mut mgr, key, &items, &[]).unwrap();
        assert_eq!(mgr.internal(ENTRIES).length, len_after_grow);
    }

    #[test]
    fn multi_tree_set_semantics() {
        let (_dir, mut mgr) = fresh();
        let mut tree = MultiTree::create(&mut mgr, ENTRIES).unwrap();
        let key = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(tree.items(&mut mgr, key).unwrap().is_none());
        tree.insert(&mut mgr, key).unwrap();
        assert_eq!(tree.items(&mut mgr, key).unwrap().unwrap(), Vec::<Uuid>::new());

        tree.update(&mut mgr, key, &[a, b], &[]).unwrap();
        tree.update(&mut mgr, key, &[b, c], &[a]).unwrap();
        assert_eq!(tree.items(&mut mgr, key).unwrap().unwrap(), vec![b, c]);

        tree.delete(&mut mgr, key).unwrap();
        assert!(tree.items(&mut mgr, key).unwrap().is_none());
    }

    #[test]
    fn multi_tree_long_chain_round_trip() {
        let (_dir, mut mgr) = fresh();
        let mut tree = MultiTree::create(&mut mgr, ENTRIES).unwrap();
        let key = Uuid::new_v4();
        tree.insert(&mut mgr, key).unwrap();

        // more items than one overflow node holds
        let items: Vec<Uuid> = (1..=700u128).map(Uuid::from_u128).collect();
        tree.update(&mut mgr, key, &items, &[]).unwrap();
        assert_eq!(tree.items(&mut mgr, key).unwrap().unwrap(), items);
    }
}

//! Stream manager — block allocation, recycling, and the stream registry.
//!
//! # Meta block
//!
//! The metadata prologue holds one sealed block (`page = -1`, nil stream).
//! Its payload carries the archive header at offset 0 and the reserved
//! internal-stream descriptors packed at the tail:
//!
//! ```text
//! data offset 3740 = 4020 - 56 × SPECIAL_STREAM_COUNT
//!   slot 0  TRASH      free-block stack
//!   slot 1  INDEX      stream-index B+Tree
//!   slot 2  ENTRIES    entry B+Tree
//!   slot 3  PATHS      path B+Tree
//!   slot 4  LISTINGS   listing multi-B+Tree
//! ```
//!
//! Reserved stream ids are `uuid(int = slot)`; everything else is a user
//! stream registered in the INDEX tree.
//!
//! # Free-block stack
//!
//! The TRASH stream's chain *is* the stack: `recycle` relinks a block to the
//! tail, `reuse` pops it back.  `new_block` always asks the stack first and
//! only then grows the file, so deleted data keeps feeding allocations.
//!
//! # Route cache
//!
//! Chains are walked link by link, which is O(distance).  The manager memos
//! `block index → page` per stream while walking, so repeat seeks (the
//! B+Trees produce many) hit the page directly.  The cache is advisory:
//! entries are trimmed whenever a chain shrinks.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::block::{Block, DATA_SIZE};
use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::secretbox::SecretBox;
use crate::stream::{StreamDescriptor, DESCRIPTOR_SIZE};
use crate::tree::SimpleTree;

/// Number of reserved internal streams.
pub const SPECIAL_STREAM_COUNT: usize = 5;

pub const TRASH: usize = 0;
pub const STREAM_INDEX: usize = 1;
pub const ENTRIES: usize = 2;
pub const PATHS: usize = 3;
pub const LISTINGS: usize = 4;

/// Byte offset of the descriptor table inside the meta block payload.
pub const DESCRIPTOR_OFFSET: usize = DATA_SIZE - DESCRIPTOR_SIZE * SPECIAL_STREAM_COUNT;

/// The reserved uuid of internal stream `slot`.
pub fn internal_id(slot: usize) -> Uuid {
    Uuid::from_u128(slot as u128)
}

fn is_internal_id(id: Uuid) -> bool {
    (id.as_u128()) < SPECIAL_STREAM_COUNT as u128
}

pub struct StreamManager {
    pager: Pager,
    cipher: SecretBox,
    meta: Block,
    internal: [StreamDescriptor; SPECIAL_STREAM_COUNT],
    index: SimpleTree,
    routes: HashMap<Uuid, Vec<i32>>,
}

impl StreamManager {
    // ── Construction ─────────────────────────────────────────────────────────

    /// Create a fresh archive file: meta block, reserved streams (one block
    /// each, the trash starts empty), and the stream-index tree.
    pub fn setup(path: &Path, secret: &[u8; 32]) -> Result<Self> {
        let pager = Pager::create(path)?;
        let cipher = SecretBox::new(secret);
        let meta = Block::new(-1, Uuid::nil(), 0);

        let mut internal = [StreamDescriptor::new(Uuid::nil()); SPECIAL_STREAM_COUNT];
        for (slot, desc) in internal.iter_mut().enumerate() {
            desc.identity = internal_id(slot);
        }

        let mut mgr = Self {
            pager,
            cipher,
            meta,
            internal,
            index: SimpleTree::default(),
            routes: HashMap::new(),
        };

        for slot in STREAM_INDEX..SPECIAL_STREAM_COUNT {
            let block = mgr.new_block(internal_id(slot), 0)?;
            let desc = &mut mgr.internal[slot];
            desc.begin = block.page;
            desc.end = block.page;
            desc.count = 1;
        }

        mgr.index = SimpleTree::create(&mut mgr, STREAM_INDEX, DESCRIPTOR_SIZE as u32)?;
        mgr.save_meta()?;
        mgr.pager.sync()?;
        debug!(path = %path.display(), "archive set up");
        Ok(mgr)
    }

    /// Open an existing archive: unseal the meta block, load the reserved
    /// descriptors, attach the stream-index tree.
    pub fn open(path: &Path, secret: &[u8; 32]) -> Result<Self> {
        let mut pager = Pager::open(path)?;
        let cipher = SecretBox::new(secret);

        let sealed = pager.meta()?;
        let raw = cipher.decrypt(&sealed)?;
        let meta = Block::unpack(-1, &raw)?;

        let mut internal = [StreamDescriptor::new(Uuid::nil()); SPECIAL_STREAM_COUNT];
        for (slot, desc) in internal.iter_mut().enumerate() {
            let at = DESCRIPTOR_OFFSET + slot * DESCRIPTOR_SIZE;
            *desc = StreamDescriptor::unpack(&meta.data[at..at + DESCRIPTOR_SIZE])?;
            if desc.identity != internal_id(slot) {
                return Err(Error::Format(format!(
                    "Reserved stream slot {slot} carries id {}",
                    desc.identity
                )));
            }
        }

        let mut mgr = Self {
            pager,
            cipher,
            meta,
            internal,
            index: SimpleTree::default(),
            routes: HashMap::new(),
        };
        mgr.index = SimpleTree::open(&mut mgr, STREAM_INDEX, DESCRIPTOR_SIZE as u32)?;
        debug!(path = %path.display(), pages = mgr.pager.page_count(), "archive opened");
        Ok(mgr)
    }

    // ── Block operations ─────────────────────────────────────────────────────

    /// Total pages in the archive.
    pub fn page_count(&self) -> u32 {
        self.pager.page_count()
    }

    /// Allocate a block for `stream` at chain position `index`: the trash
    /// stack is asked first, then the file grows by one sealed page.
    pub fn new_block(&mut self, stream: Uuid, index: u32) -> Result<Block> {
        if let Some(mut block) = self.reuse()? {
            block.reset(stream, index);
            self.save_block(&mut block)?;
            trace!(page = block.page, %stream, "block reused from trash");
            return Ok(block);
        }
        let page = self.pager.page_count() as i32;
        let mut block = Block::new(page, stream, index);
        let sealed = self.cipher.encrypt(&block.pack())?;
        self.pager.append(&sealed)?;
        trace!(page, %stream, "block appended");
        Ok(block)
    }

    /// Read, unseal, and validate the block at `page`.
    pub fn load_block(&mut self, page: i32) -> Result<Block> {
        if page < 0 {
            return Err(Error::Bounds(format!("Page {page} is not addressable")));
        }
        let sealed = self.pager.read(page as u32)?;
        let raw = self.cipher.decrypt(&sealed)?;
        Block::unpack(page, &raw)
    }

    /// Seal and write a block back to its own page.
    pub fn save_block(&mut self, block: &mut Block) -> Result<()> {
        if block.page < 0 {
            return Err(Error::Bounds("Block has no assigned page".into()));
        }
        let sealed = self.cipher.encrypt(&block.pack())?;
        self.pager.write(block.page as u32, &sealed)
    }

    // ── Free-block stack ─────────────────────────────────────────────────────

    /// Push a block onto the trash stack.  The payload is zeroed so released
    /// data does not survive in the free list.
    pub fn recycle(&mut self, mut block: Block) -> Result<()> {
        let trash = self.internal[TRASH];
        block.reset(internal_id(TRASH), trash.count);
        block.previous = trash.end;

        if trash.end >= 0 {
            let mut tail = self.load_block(trash.end)?;
            tail.next = block.page;
            self.save_block(&mut tail)?;
        } else {
            self.internal[TRASH].begin = block.page;
        }
        self.internal[TRASH].end = block.page;
        self.internal[TRASH].count += 1;
        trace!(page = block.page, "block recycled");
        self.save_block(&mut block)
    }

    /// Pop a block off the trash stack; `None` when the stack is empty.
    pub fn reuse(&mut self) -> Result<Option<Block>> {
        let trash = self.internal[TRASH];
        if trash.count == 0 {
            return Ok(None);
        }
        let mut block = self.load_block(trash.end)?;
        let previous = block.previous;
        if previous >= 0 {
            let mut before = self.load_block(previous)?;
            before.next = -1;
            self.save_block(&mut before)?;
        } else {
            self.internal[TRASH].begin = -1;
        }
        self.internal[TRASH].end = previous;
        self.internal[TRASH].count -= 1;
        block.reset(Uuid::nil(), 0);
        Ok(Some(block))
    }

    // ── Stream registry ──────────────────────────────────────────────────────

    /// Allocate a fresh one-block user stream and register it in the INDEX
    /// tree.
    pub fn new_stream(&mut self) -> Result<StreamDescriptor> {
        let id = Uuid::new_v4();
        let block = self.new_block(id, 0)?;
        let mut desc = StreamDescriptor::new(id);
        desc.begin = block.page;
        desc.end = block.page;
        desc.count = 1;

        let mut index = self.index;
        index.insert(self, id, &desc.pack())?;
        self.index = index;
        debug!(%id, "stream registered");
        Ok(desc)
    }

    /// Look a user stream up in the INDEX tree.  Reserved ids are refused.
    pub fn open_stream(&mut self, id: Uuid) -> Result<StreamDescriptor> {
        if is_internal_id(id) {
            return Err(Error::Argument(format!("Stream id {id} is reserved")));
        }
        let index = self.index;
        match index.get(self, id)? {
            Some(value) => StreamDescriptor::unpack(&value),
            None => Err(Error::KeyMissing(id)),
        }
    }

    /// Write a user stream's descriptor back to the INDEX tree.
    pub fn close_stream(&mut self, desc: &StreamDescriptor) -> Result<()> {
        let index = self.index;
        index.update(self, desc.identity, &desc.pack())
    }

    /// Recycle every block of a user stream and unregister it.
    pub fn del_stream(&mut self, id: Uuid) -> Result<()> {
        let desc = self.open_stream(id)?;
        let mut page = desc.begin;
        while page >= 0 {
            let block = self.load_block(page)?;
            page = block.next;
            self.recycle(block)?;
        }
        let mut index = self.index;
        index.delete(self, id)?;
        self.index = index;
        self.routes.remove(&id);
        debug!(%id, blocks = desc.count, "stream deleted");
        Ok(())
    }

    // ── Reserved descriptors and meta ────────────────────────────────────────

    pub(crate) fn internal(&self, slot: usize) -> StreamDescriptor {
        self.internal[slot]
    }

    pub(crate) fn set_internal(&mut self, slot: usize, desc: StreamDescriptor) {
        self.internal[slot] = desc;
    }

    /// The meta block payload (archive header plus implementation-defined
    /// space up to the descriptor table).
    pub fn meta_payload(&self) -> &[u8; DATA_SIZE] {
        &self.meta.data
    }

    pub fn meta_payload_mut(&mut self) -> &mut [u8; DATA_SIZE] {
        &mut self.meta.data
    }

    /// Pack the reserved descriptors into the meta block and seal it into
    /// the prologue.
    pub fn save_meta(&mut self) -> Result<()> {
        for (slot, desc) in self.internal.iter().enumerate() {
            let at = DESCRIPTOR_OFFSET + slot * DESCRIPTOR_SIZE;
            self.meta.data[at..at + DESCRIPTOR_SIZE].copy_from_slice(&desc.pack());
        }
        let sealed = self.cipher.encrypt(&self.meta.pack())?;
        self.pager.set_meta(&sealed)
    }

    /// Persist the meta block and flush everything to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.save_meta()?;
        self.pager.sync()
    }

    /// Flush and release the archive.  The host-file lock drops with the
    /// pager.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    // ── Route cache ──────────────────────────────────────────────────────────

    pub(crate) fn route(&self, id: Uuid, index: u32) -> Option<i32> {
        self.routes
            .get(&id)
            .and_then(|pages| pages.get(index as usize))
            .copied()
            .filter(|page| *page >= 0)
    }

    pub(crate) fn route_learn(&mut self, id: Uuid, index: u32, page: i32) {
        let pages = self.routes.entry(id).or_default();
        if pages.len() <= index as usize {
            pages.resize(index as usize + 1, -1);
        }
        pages[index as usize] = page;
    }

    pub(crate) fn route_trim(&mut self, id: Uuid, len: u32) {
        if let Some(pages) = self.routes.get_mut(&id) {
            pages.truncate(len as usize);
        }
    }
}

//! Streams — logical byte sequences chained through blocks.
//!
//! # Descriptor (56-byte slot, numeric fields big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0     16   identity     stream uuid
//!   16      4   begin        head page index, -1 = none
//!   20      4   end          tail page index, -1 = none
//!   24      4   count        blocks in the chain
//!   28      8   length       bytes in use
//!   36      2   compression  passthrough, no codec in the engine
//!   38     18   reserved
//! ```
//!
//! # Cursor model
//!
//! A [`Stream`] owns exactly one "hot" block plus a dirty flag; moving the
//! cursor saves the hot block first when it changed.  A [`FileObject`] adds
//! a byte position on top and **exclusively borrows the manager for its
//! lifetime** — the borrow checker guarantees a stream is never open twice.
//!
//! Seek is the single soft failure in the engine: a target beyond EOF or an
//! unloadable block leaves the cursor exactly where it was.

use std::io::SeekFrom;

use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

use crate::block::{Block, DATA_SIZE};
use crate::error::{Error, Result};
use crate::manager::StreamManager;

/// Reserved slot size of one packed descriptor.
pub const DESCRIPTOR_SIZE: usize = 56;

// ── Descriptor ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub identity: Uuid,
    pub begin: i32,
    pub end: i32,
    pub count: u32,
    pub length: u64,
    pub compression: u16,
}

impl StreamDescriptor {
    /// A descriptor for a stream that owns no blocks yet.
    pub fn new(identity: Uuid) -> Self {
        Self {
            identity,
            begin: -1,
            end: -1,
            count: 0,
            length: 0,
            compression: 0,
        }
    }

    pub fn pack(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[0..16].copy_from_slice(self.identity.as_bytes());
        BigEndian::write_i32(&mut buf[16..20], self.begin);
        BigEndian::write_i32(&mut buf[20..24], self.end);
        BigEndian::write_u32(&mut buf[24..28], self.count);
        BigEndian::write_u64(&mut buf[28..36], self.length);
        BigEndian::write_u16(&mut buf[36..38], self.compression);
        buf
    }

    pub fn unpack(raw: &[u8]) -> Result<Self> {
        if raw.len() < 38 {
            return Err(Error::Format(format!(
                "Stream descriptor truncated at {} bytes",
                raw.len()
            )));
        }
        let mut identity = [0u8; 16];
        identity.copy_from_slice(&raw[0..16]);
        Ok(Self {
            identity: Uuid::from_bytes(identity),
            begin: BigEndian::read_i32(&raw[16..20]),
            end: BigEndian::read_i32(&raw[20..24]),
            count: BigEndian::read_u32(&raw[24..28]),
            length: BigEndian::read_u64(&raw[28..36]),
            compression: BigEndian::read_u16(&raw[36..38]),
        })
    }
}

// ── Stream ───────────────────────────────────────────────────────────────────

/// Where a stream's descriptor is written back on close.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StreamKind {
    /// One of the reserved engine streams; the descriptor lives in the meta
    /// block tail at this slot.
    Internal(usize),
    /// A user stream registered in the stream-index tree.
    Dynamic,
}

pub struct Stream {
    pub(crate) desc: StreamDescriptor,
    kind: StreamKind,
    block: Block,
    changed: bool,
}

impl Stream {
    /// Open a stream on its head block.  A stream must own at least one
    /// block to be opened.
    pub(crate) fn open(
        mgr: &mut StreamManager,
        desc: StreamDescriptor,
        kind: StreamKind,
    ) -> Result<Self> {
        if desc.begin < 0 || desc.count == 0 {
            return Err(Error::Bounds(format!(
                "Stream {} has no blocks",
                desc.identity
            )));
        }
        let block = mgr.load_block(desc.begin)?;
        mgr.route_learn(desc.identity, 0, desc.begin);
        Ok(Self {
            desc,
            kind,
            block,
            changed: false,
        })
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        self.desc
    }

    /// Index of the hot block within the stream.
    pub fn index(&self) -> u32 {
        self.block.index
    }

    pub(crate) fn data(&self) -> &[u8; DATA_SIZE] {
        &self.block.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8; DATA_SIZE] {
        self.changed = true;
        &mut self.block.data
    }

    /// Persist the hot block when dirty (or unconditionally with `force`).
    pub fn save(&mut self, mgr: &mut StreamManager, force: bool) -> Result<()> {
        if self.changed || force {
            mgr.save_block(&mut self.block)?;
            self.changed = false;
        }
        Ok(())
    }

    /// Move to the following block.  Returns `false` at the tail.
    pub fn next(&mut self, mgr: &mut StreamManager) -> Result<bool> {
        if self.block.next < 0 {
            return Ok(false);
        }
        self.save(mgr, false)?;
        let block = mgr.load_block(self.block.next)?;
        mgr.route_learn(self.desc.identity, block.index, block.page);
        self.block = block;
        Ok(true)
    }

    /// Move to the preceding block.  Returns `false` at the head.
    pub fn previous(&mut self, mgr: &mut StreamManager) -> Result<bool> {
        if self.block.previous < 0 {
            return Ok(false);
        }
        self.save(mgr, false)?;
        let block = mgr.load_block(self.block.previous)?;
        mgr.route_learn(self.desc.identity, block.index, block.page);
        self.block = block;
        Ok(true)
    }

    /// Seek the hot block to `index`, by direct page lookup when the route
    /// is already known, otherwise by walking the chain.
    pub fn wind(&mut self, mgr: &mut StreamManager, index: u32) -> Result<()> {
        if index >= self.desc.count {
            return Err(Error::Bounds(format!(
                "Block index {index} out of stream range (count {})",
                self.desc.count
            )));
        }
        if index == self.block.index {
            return Ok(());
        }
        if let Some(page) = mgr.route(self.desc.identity, index) {
            self.save(mgr, false)?;
            let block = mgr.load_block(page)?;
            debug_assert_eq!(block.index, index);
            self.block = block;
            return Ok(());
        }
        while self.block.index < index {
            if !self.next(mgr)? {
                return Err(Error::Bounds(format!("Chain ends before index {index}")));
            }
        }
        while self.block.index > index {
            if !self.previous(mgr)? {
                return Err(Error::Bounds(format!("Chain starts after index {index}")));
            }
        }
        Ok(())
    }

    /// Seek the hot block to the tail.
    pub fn end(&mut self, mgr: &mut StreamManager) -> Result<()> {
        self.wind(mgr, self.desc.count - 1)
    }

    /// Append a fresh block after the tail.  The hot block must be the tail.
    pub fn extend(&mut self, mgr: &mut StreamManager) -> Result<()> {
        if self.block.next >= 0 {
            return Err(Error::Bounds("Extend is only valid at the tail".into()));
        }
        let mut fresh = mgr.new_block(self.desc.identity, self.block.index + 1)?;
        fresh.previous = self.block.page;
        mgr.save_block(&mut fresh)?;

        self.block.next = fresh.page;
        self.changed = true;
        self.save(mgr, true)?;

        mgr.route_learn(self.desc.identity, fresh.index, fresh.page);
        self.desc.end = fresh.page;
        self.desc.count += 1;
        self.block = fresh;
        self.changed = false;
        Ok(())
    }

    /// Append a caller-supplied block to the tail; the block is relinked and
    /// renumbered for this stream.
    pub fn push(&mut self, mgr: &mut StreamManager, mut block: Block) -> Result<()> {
        self.end(mgr)?;
        block.index = self.desc.count;
        block.previous = self.block.page;
        block.next = -1;
        block.stream = self.desc.identity;
        mgr.save_block(&mut block)?;

        self.block.next = block.page;
        self.changed = true;
        self.save(mgr, true)?;

        mgr.route_learn(self.desc.identity, block.index, block.page);
        self.desc.end = block.page;
        self.desc.count += 1;
        self.block = block;
        self.changed = false;
        Ok(())
    }

    /// Detach and return the tail block.  A stream never drops below one
    /// block — the cursor model needs a hot block to stand on.
    pub fn pop(&mut self, mgr: &mut StreamManager) -> Result<Block> {
        if self.desc.count <= 1 {
            return Err(Error::Bounds(
                "Can't pop the last block of a stream".into(),
            ));
        }
        self.end(mgr)?;
        self.save(mgr, false)?;
        let tail = self.block.clone();

        let mut before = mgr.load_block(tail.previous)?;
        before.next = -1;
        mgr.save_block(&mut before)?;

        mgr.route_trim(self.desc.identity, tail.index);
        self.desc.end = before.page;
        self.desc.count -= 1;
        self.block = before;
        self.changed = false;
        Ok(tail)
    }

    /// Cut the stream down to `length` bytes, recycling every block past the
    /// new tail.
    pub fn truncate(&mut self, mgr: &mut StreamManager, length: u64) -> Result<()> {
        let tail_index = if length == 0 {
            0
        } else {
            ((length - 1) / DATA_SIZE as u64) as u32
        };
        while self.desc.count > tail_index + 1 {
            let block = self.pop(mgr)?;
            mgr.recycle(block)?;
        }
        self.desc.length = length;
        Ok(())
    }

    /// Save the hot block and write the descriptor back to its registry.
    pub(crate) fn close(&mut self, mgr: &mut StreamManager) -> Result<()> {
        self.save(mgr, false)?;
        match self.kind {
            StreamKind::Internal(slot) => {
                mgr.set_internal(slot, self.desc);
                Ok(())
            }
            StreamKind::Dynamic => mgr.close_stream(&self.desc),
        }
    }
}

// ── FileObject ───────────────────────────────────────────────────────────────

/// File-like byte cursor over one stream.
///
/// Holds the manager exclusively until [`close`](FileObject::close) — while
/// a file object lives no other engine operation can run, which is exactly
/// the single-writer discipline the format requires.
pub struct FileObject<'m> {
    mgr: &'m mut StreamManager,
    stream: Stream,
    position: u64,
    read_only: bool,
}

impl<'m> FileObject<'m> {
    /// Open a registered user stream.
    pub fn open(mgr: &'m mut StreamManager, id: Uuid) -> Result<Self> {
        let desc = mgr.open_stream(id)?;
        let stream = Stream::open(mgr, desc, StreamKind::Dynamic)?;
        Ok(Self {
            mgr,
            stream,
            position: 0,
            read_only: false,
        })
    }

    /// Open one of the reserved engine streams.
    pub(crate) fn open_internal(mgr: &'m mut StreamManager, slot: usize) -> Result<Self> {
        let desc = mgr.internal(slot);
        let stream = Stream::open(mgr, desc, StreamKind::Internal(slot))?;
        Ok(Self {
            mgr,
            stream,
            position: 0,
            read_only: false,
        })
    }

    /// Demote the handle to read-only: writes and truncation are refused.
    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
    }

    pub fn len(&self) -> u64 {
        self.stream.desc.length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        self.stream.desc
    }

    /// Block index holding `position`; a position at an exact block boundary
    /// parks at the end of the last block when the chain is exhausted.
    fn block_of(&self, position: u64) -> u32 {
        let index = (position / DATA_SIZE as u64) as u32;
        index.min(self.stream.desc.count.saturating_sub(1))
    }

    /// Move the cursor.  A target outside `[0, len]` or a block that cannot
    /// be loaded leaves the cursor unchanged; the (old) position is returned
    /// either way.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.len() as i128;
        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => len + delta as i128,
        };
        if target < 0 || target > len {
            return Ok(self.position);
        }
        let target = target as u64;
        let index = self.block_of(target);
        if self.stream.wind(self.mgr, index).is_err() {
            return Ok(self.position);
        }
        self.position = target;
        Ok(target)
    }

    /// Copy up to `n` bytes from the cursor onward, crossing block
    /// boundaries as needed.  Returns an empty buffer at EOF.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let end = (self.position + n as u64).min(self.len());
        let mut out = Vec::with_capacity(end.saturating_sub(self.position) as usize);
        while self.position < end {
            let index = self.block_of(self.position);
            self.stream.wind(self.mgr, index)?;
            let offset = (self.position - index as u64 * DATA_SIZE as u64) as usize;
            let take = (DATA_SIZE - offset).min((end - self.position) as usize);
            out.extend_from_slice(&self.stream.data()[offset..offset + take]);
            self.position += take as u64;
        }
        Ok(out)
    }

    /// Copy `data` in at the cursor, extending the chain block by block at
    /// the tail.  Allocation failure surfaces as [`Error::NoSpace`].
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(Error::Argument("File is open read-only".into()));
        }
        let mut written = 0usize;
        while written < data.len() {
            let index = (self.position / DATA_SIZE as u64) as u32;
            if index >= self.stream.desc.count {
                self.stream.end(self.mgr)?;
                self.stream.extend(self.mgr)?;
                continue;
            }
            self.stream.wind(self.mgr, index)?;
            let offset = (self.position - index as u64 * DATA_SIZE as u64) as usize;
            let room = (DATA_SIZE - offset).min(data.len() - written);
            self.stream.data_mut()[offset..offset + room]
                .copy_from_slice(&data[written..written + room]);
            written += room;
            self.position += room as u64;
            if self.position > self.stream.desc.length {
                self.stream.desc.length = self.position;
            }
        }
        Ok(written)
    }

    /// Cut the stream to `size` bytes (current position when `None`); the
    /// cursor is pulled back when it would end up past the new end.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<()> {
        if self.read_only {
            return Err(Error::Argument("File is open read-only".into()));
        }
        let size = size.unwrap_or(self.position).min(self.len());
        self.stream.truncate(self.mgr, size)?;
        if self.position > size {
            self.position = size;
        }
        Ok(())
    }

    /// Save the hot block and write the descriptor back.
    pub fn close(self) -> Result<()> {
        let Self {
            mgr, mut stream, ..
        } = self;
        stream.close(mgr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn setup_manager() -> (tempfile::TempDir, StreamManager) {
        let dir = tempdir().unwrap();
        let mgr = StreamManager::setup(&dir.path().join("s.ar7"), &[3u8; 32]).unwrap();
        (dir, mgr)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 239) as u8).collect()
    }

    #[test]
    fn descriptor_pack_unpack_round_trip() {
        let mut desc = StreamDescriptor::new(Uuid::new_v4());
        desc.begin = 4;
        desc.end = 9;
        desc.count = 3;
        desc.length = 8_123;
        let raw = desc.pack();
        assert_eq!(StreamDescriptor::unpack(&raw).unwrap(), desc);
    }

    #[test]
    fn write_read_round_trip_across_boundaries() {
        let (_dir, mut mgr) = setup_manager();
        for len in [0usize, 1, 4019, 4020, 4021, 65536] {
            let desc = mgr.new_stream().unwrap();
            let data = pattern(len);
            let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
            assert_eq!(fo.write(&data).unwrap(), len);
            fo.close().unwrap();

            let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
            assert_eq!(fo.len(), len as u64);
            assert_eq!(fo.read(len + 10).unwrap(), data);
            fo.close().unwrap();
        }
    }

    #[test]
    fn exact_block_fill_does_not_allocate_a_second_block() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        fo.write(&pattern(DATA_SIZE)).unwrap();
        assert_eq!(fo.descriptor().count, 1);
        fo.write(&[0xAB]).unwrap();
        assert_eq!(fo.descriptor().count, 2);
        fo.close().unwrap();
    }

    #[test]
    fn large_file_has_expected_block_count() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let data = vec![0xABu8; 5_000_000];
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        fo.write(&data).unwrap();
        assert_eq!(fo.descriptor().count, 1244);
        assert_eq!(fo.len(), 5_000_000);
        fo.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(fo.read(5_000_000).unwrap(), data);
        fo.close().unwrap();
    }

    #[test]
    fn seek_beyond_eof_leaves_position_unchanged() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        fo.write(&pattern(100)).unwrap();
        fo.seek(SeekFrom::Start(40)).unwrap();
        assert_eq!(fo.seek(SeekFrom::Start(101)).unwrap(), 40);
        assert_eq!(fo.seek(SeekFrom::Current(-80)).unwrap(), 40);
        assert_eq!(fo.position(), 40);
        fo.close().unwrap();
    }

    #[test]
    fn sparse_rewrite_in_the_middle() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let mut data = pattern(10_000);
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        fo.write(&data).unwrap();
        fo.seek(SeekFrom::Start(4_000)).unwrap();
        fo.write(&[0xFFu8; 100]).unwrap();
        fo.close().unwrap();

        data[4_000..4_100].fill(0xFF);
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        assert_eq!(fo.read(10_000).unwrap(), data);
        fo.close().unwrap();
    }

    #[test]
    fn truncate_recycles_tail_blocks() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        fo.write(&pattern(3 * DATA_SIZE)).unwrap();
        assert_eq!(fo.descriptor().count, 3);
        fo.truncate(Some(10)).unwrap();
        assert_eq!(fo.descriptor().count, 1);
        assert_eq!(fo.len(), 10);
        fo.close().unwrap();

        assert_eq!(mgr.internal(manager::TRASH).count, 2);
    }

    #[test]
    fn push_and_pop_move_whole_blocks() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let donor = mgr.new_block(Uuid::new_v4(), 0).unwrap();
        let donor_page = donor.page;

        let mut stream = Stream::open(&mut mgr, desc, StreamKind::Dynamic).unwrap();
        stream.push(&mut mgr, donor).unwrap();
        assert_eq!(stream.descriptor().count, 2);
        assert_eq!(stream.descriptor().end, donor_page);
        assert_eq!(stream.index(), 1);

        let popped = stream.pop(&mut mgr).unwrap();
        assert_eq!(popped.page, donor_page);
        assert_eq!(stream.descriptor().count, 1);

        // the last block is not poppable
        assert!(matches!(stream.pop(&mut mgr), Err(Error::Bounds(_))));
        stream.close(&mut mgr).unwrap();
    }

    #[test]
    fn chain_links_are_consistent() {
        let (_dir, mut mgr) = setup_manager();
        let desc = mgr.new_stream().unwrap();
        let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
        fo.write(&pattern(5 * DATA_SIZE)).unwrap();
        let desc = fo.descriptor();
        fo.close().unwrap();

        // forward walk visits count blocks and lands on end
        let mut pages = Vec::new();
        let mut page = desc.begin;
        for expect in 0..desc.count {
            let block = mgr.load_block(page).unwrap();
            assert_eq!(block.index, expect);
            assert_eq!(block.stream, desc.identity);
            pages.push(page);
            if expect + 1 == desc.count {
                assert_eq!(block.next, -1);
                assert_eq!(page, desc.end);
            } else {
                page = block.next;
            }
        }
        assert_eq!(pages.len() as u32, desc.count);

        // backward walk reverses the path
        let mut page = desc.end;
        for expect in pages.iter().rev() {
            assert_eq!(page, *expect);
            page = mgr.load_block(page).unwrap().previous;
        }
        assert_eq!(page, -1);
        assert!(desc.length <= desc.count as u64 * DATA_SIZE as u64);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn arbitrary_sizes_round_trip(len in 0usize..20_000) {
            let (_dir, mut mgr) = setup_manager();
            let desc = mgr.new_stream().unwrap();
            let data = pattern(len);
            let mut fo = FileObject::open(&mut mgr, desc.identity).unwrap();
            fo.write(&data).unwrap();
            fo.seek(SeekFrom::Start(0)).unwrap();
            prop_assert_eq!(fo.read(len).unwrap(), data);
            fo.close().unwrap();
        }
    }
}

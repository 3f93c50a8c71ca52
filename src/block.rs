//! Block format — the 4068-byte plaintext unit inside every sealed page.
//!
//! # Layout (all numeric fields big-endian / network order)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   previous   page index of the preceding block, -1 = head
//!    4      4   next       page index of the following block, -1 = tail
//!    8      4   index      zero-based position within the owning stream
//!   12     16   stream     uuid of the owning stream
//!   28     20   digest     SHA-1 of the data field
//!   48   4020   data       payload
//! ```
//!
//! # Integrity
//!
//! `digest` is recomputed on every pack and verified on every unpack.  A
//! mismatch means the page authenticated (the GCM tag passed) but the block
//! inside is not what was written — corruption between seal and unseal, and
//! fatal for the operation.  Callers never set the digest themselves.
//!
//! # Linkage
//!
//! `previous`/`next` chain the blocks of one stream in order; `index` grows
//! monotonically along `next`.  A block may never link to itself.

use byteorder::{BigEndian, ByteOrder};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::secretbox::BLOCK_SIZE;

/// Payload bytes carried by one block.
pub const DATA_SIZE: usize = 4020;

/// Fixed byte size of the block header preceding the data.
pub const BLOCK_HEADER_SIZE: usize = 48;

/// One plaintext block.  `page` is the block's own page index — in-memory
/// bookkeeping only, never serialized.  The meta block uses `page = -1`.
#[derive(Debug, Clone)]
pub struct Block {
    pub page: i32,
    pub previous: i32,
    pub next: i32,
    pub index: u32,
    pub stream: Uuid,
    pub digest: [u8; 20],
    pub data: [u8; DATA_SIZE],
}

impl Block {
    /// A fresh unlinked block: no neighbours, zeroed data.
    pub fn new(page: i32, stream: Uuid, index: u32) -> Self {
        let data = [0u8; DATA_SIZE];
        Self {
            page,
            previous: -1,
            next: -1,
            index,
            stream,
            digest: Sha1::digest(data).into(),
            data,
        }
    }

    /// Re-initialize a recycled block for a new stream: zero the payload,
    /// drop both links.
    pub fn reset(&mut self, stream: Uuid, index: u32) {
        self.previous = -1;
        self.next = -1;
        self.index = index;
        self.stream = stream;
        self.data = [0u8; DATA_SIZE];
        self.digest = Sha1::digest(self.data).into();
    }

    /// Serialize the block.  The digest is recomputed here so it can never
    /// go stale relative to the data.
    pub fn pack(&mut self) -> [u8; BLOCK_SIZE] {
        self.digest = Sha1::digest(self.data).into();

        let mut buf = [0u8; BLOCK_SIZE];
        BigEndian::write_i32(&mut buf[0..4], self.previous);
        BigEndian::write_i32(&mut buf[4..8], self.next);
        BigEndian::write_u32(&mut buf[8..12], self.index);
        buf[12..28].copy_from_slice(self.stream.as_bytes());
        buf[28..48].copy_from_slice(&self.digest);
        buf[48..].copy_from_slice(&self.data);
        buf
    }

    /// Parse and validate a block plaintext read from page `page`.
    ///
    /// Returns [`Error::Checksum`] when the stored digest does not match the
    /// data, [`Error::Format`] on a self-link.  The caller MUST NOT use the
    /// block if this returns an error.
    pub fn unpack(page: i32, raw: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let previous = BigEndian::read_i32(&raw[0..4]);
        let next = BigEndian::read_i32(&raw[4..8]);
        let index = BigEndian::read_u32(&raw[8..12]);

        let mut stream_bytes = [0u8; 16];
        stream_bytes.copy_from_slice(&raw[12..28]);
        let stream = Uuid::from_bytes(stream_bytes);

        let mut digest = [0u8; 20];
        digest.copy_from_slice(&raw[28..48]);

        let mut data = [0u8; DATA_SIZE];
        data.copy_from_slice(&raw[48..]);

        let actual: [u8; 20] = Sha1::digest(data).into();
        if actual != digest {
            return Err(Error::Checksum(format!(
                "Block {page} digest mismatch (got {}, expected {})",
                hex::encode(actual),
                hex::encode(digest),
            )));
        }

        if page >= 0 && (previous == page || next == page) {
            return Err(Error::Format(format!("Block {page} links to itself")));
        }

        Ok(Self {
            page,
            previous,
            next,
            index,
            stream,
            digest,
            data,
        })
    }
}

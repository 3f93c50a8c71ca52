//! Tree page contents — node kinds, records, references.
//!
//! # Node header (9 bytes, big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   kind    'S' 'L' 'R' 'F' 'D' 'I' 'E'
//!    1      4   next    page link (leaf chain / item chain / empty stack)
//!    5      4   count   records, references, items, or blob bytes
//! ```
//!
//! # Record — `page:i32, key:uuid, value:[value_size], checksum:u8`
//!
//! The checksum is the low byte of the byte-sum of key ‖ value.  Eight bits
//! collide often, so it is a corruption *hint* only; the page-level GCM tag
//! is the integrity guarantee.  Simple trees keep `page = -1`; multi trees
//! point it at the head of the item chain and store the item count as the
//! 4-byte value.
//!
//! # Reference — `before:i32, after:i32, key:uuid`
//!
//! Adjacent references share a child: `R[i].after == R[i+1].before`.

use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

use crate::error::{Error, Result};

pub(crate) const NODE_HEADER_SIZE: usize = 9;
pub(crate) const REFERENCE_SIZE: usize = 24;
/// Record bytes besides the value: page + key + checksum.
pub(crate) const RECORD_OVERHEAD: usize = 21;
/// Items are raw 16-byte keys.
pub(crate) const ITEM_SIZE: usize = 16;

pub(crate) const KIND_START: u8 = b'S';
pub(crate) const KIND_LEAF: u8 = b'L';
pub(crate) const KIND_ROOT: u8 = b'R';
pub(crate) const KIND_STRUCTURE: u8 = b'F';
pub(crate) const KIND_DATA: u8 = b'D';
pub(crate) const KIND_ITEMS: u8 = b'I';
pub(crate) const KIND_EMPTY: u8 = b'E';

// ── Record ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub page: i32,
    pub key: Uuid,
    pub value: Vec<u8>,
}

impl Record {
    pub fn checksum(&self) -> u8 {
        let mut sum = 0u8;
        for byte in self.key.as_bytes().iter().chain(self.value.iter()) {
            sum = sum.wrapping_add(*byte);
        }
        sum
    }
}

// ── Reference ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reference {
    pub before: i32,
    pub after: i32,
    pub key: Uuid,
}

// ── Search ───────────────────────────────────────────────────────────────────

/// Outcome of a key lookup in a sorted record list: either the slot the key
/// occupies, or the slot an insert would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchResult {
    Found(usize),
    NotFound(usize),
}

pub(crate) fn search_records(records: &[Record], key: Uuid) -> SearchResult {
    match records.binary_search_by(|record| record.key.cmp(&key)) {
        Ok(at) => SearchResult::Found(at),
        Err(at) => SearchResult::NotFound(at),
    }
}

// ── Node ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum Node {
    /// Root-that-is-a-leaf: the whole tree fits in one node.
    Start { records: Vec<Record> },
    /// Record leaf, chained through `next` in key order.
    Leaf { next: i32, records: Vec<Record> },
    /// Reference root of a tree with two or more levels.
    Root { refs: Vec<Reference> },
    /// Interior reference node.
    Structure { refs: Vec<Reference> },
    /// Single-blob page.  Legacy bookkeeping for multi-tree values — still
    /// parsed, never produced; item chains superseded it.
    Data { blob: Vec<u8> },
    /// Overflow chain node of fixed-size items.
    Items { next: i32, items: Vec<Uuid> },
    /// Recycled page on the per-tree empty stack.
    Empty { next: i32 },
}

impl Node {
    pub fn kind(&self) -> u8 {
        match self {
            Node::Start { .. } => KIND_START,
            Node::Leaf { .. } => KIND_LEAF,
            Node::Root { .. } => KIND_ROOT,
            Node::Structure { .. } => KIND_STRUCTURE,
            Node::Data { .. } => KIND_DATA,
            Node::Items { .. } => KIND_ITEMS,
            Node::Empty { .. } => KIND_EMPTY,
        }
    }

    pub fn pack(&self, value_size: usize, page_size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; page_size];
        buf[0] = self.kind();

        let (next, count): (i32, usize) = match self {
            Node::Start { records } => (-1, records.len()),
            Node::Leaf { next, records } => (*next, records.len()),
            Node::Root { refs } | Node::Structure { refs } => (-1, refs.len()),
            Node::Data { blob } => (-1, blob.len()),
            Node::Items { next, items } => (*next, items.len()),
            Node::Empty { next } => (*next, 0),
        };
        BigEndian::write_i32(&mut buf[1..5], next);
        BigEndian::write_u32(&mut buf[5..9], count as u32);

        let mut at = NODE_HEADER_SIZE;
        let overflow = || Error::Format("Tree node exceeds its page".into());
        match self {
            Node::Start { records } | Node::Leaf { records, .. } => {
                let record_size = RECORD_OVERHEAD + value_size;
                for record in records {
                    if record.value.len() != value_size {
                        return Err(Error::Argument(format!(
                            "Record value is {} bytes, tree holds {value_size}",
                            record.value.len()
                        )));
                    }
                    if at + record_size > page_size {
                        return Err(overflow());
                    }
                    BigEndian::write_i32(&mut buf[at..at + 4], record.page);
                    buf[at + 4..at + 20].copy_from_slice(record.key.as_bytes());
                    buf[at + 20..at + 20 + value_size].copy_from_slice(&record.value);
                    buf[at + 20 + value_size] = record.checksum();
                    at += record_size;
                }
            }
            Node::Root { refs } | Node::Structure { refs } => {
                for reference in refs {
                    if at + REFERENCE_SIZE > page_size {
                        return Err(overflow());
                    }
                    BigEndian::write_i32(&mut buf[at..at + 4], reference.before);
                    BigEndian::write_i32(&mut buf[at + 4..at + 8], reference.after);
                    buf[at + 8..at + 24].copy_from_slice(reference.key.as_bytes());
                    at += REFERENCE_SIZE;
                }
            }
            Node::Data { blob } => {
                if at + blob.len() > page_size {
                    return Err(overflow());
                }
                buf[at..at + blob.len()].copy_from_slice(blob);
            }
            Node::Items { items, .. } => {
                for item in items {
                    if at + ITEM_SIZE > page_size {
                        return Err(overflow());
                    }
                    buf[at..at + ITEM_SIZE].copy_from_slice(item.as_bytes());
                    at += ITEM_SIZE;
                }
            }
            Node::Empty { .. } => {}
        }
        Ok(buf)
    }

    pub fn unpack(raw: &[u8], value_size: usize) -> Result<Node> {
        if raw.len() < NODE_HEADER_SIZE {
            return Err(Error::Format("Tree page too short for a node header".into()));
        }
        let kind = raw[0];
        let next = BigEndian::read_i32(&raw[1..5]);
        let count = BigEndian::read_u32(&raw[5..9]) as usize;
        let body = &raw[NODE_HEADER_SIZE..];

        let read_uuid = |chunk: &[u8]| {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(chunk);
            Uuid::from_bytes(bytes)
        };

        match kind {
            KIND_START | KIND_LEAF => {
                let record_size = RECORD_OVERHEAD + value_size;
                if count * record_size > body.len() {
                    return Err(Error::Format(format!(
                        "Leaf claims {count} records, page holds {}",
                        body.len() / record_size
                    )));
                }
                let mut records = Vec::with_capacity(count);
                for chunk in body.chunks_exact(record_size).take(count) {
                    let record = Record {
                        page: BigEndian::read_i32(&chunk[0..4]),
                        key: read_uuid(&chunk[4..20]),
                        value: chunk[20..20 + value_size].to_vec(),
                    };
                    let stored = chunk[20 + value_size];
                    if record.checksum() != stored {
                        return Err(Error::Checksum(format!(
                            "Record {} checksum mismatch",
                            record.key
                        )));
                    }
                    records.push(record);
                }
                Ok(if kind == KIND_START {
                    Node::Start { records }
                } else {
                    Node::Leaf { next, records }
                })
            }
            KIND_ROOT | KIND_STRUCTURE => {
                if count * REFERENCE_SIZE > body.len() {
                    return Err(Error::Format(format!(
                        "Reference node claims {count} references"
                    )));
                }
                let mut refs = Vec::with_capacity(count);
                for chunk in body.chunks_exact(REFERENCE_SIZE).take(count) {
                    refs.push(Reference {
                        before: BigEndian::read_i32(&chunk[0..4]),
                        after: BigEndian::read_i32(&chunk[4..8]),
                        key: read_uuid(&chunk[8..24]),
                    });
                }
                Ok(if kind == KIND_ROOT {
                    Node::Root { refs }
                } else {
                    Node::Structure { refs }
                })
            }
            KIND_DATA => {
                if count > body.len() {
                    return Err(Error::Format(format!("Data node claims {count} bytes")));
                }
                Ok(Node::Data {
                    blob: body[..count].to_vec(),
                })
            }
            KIND_ITEMS => {
                if count * ITEM_SIZE > body.len() {
                    return Err(Error::Format(format!("Items node claims {count} items")));
                }
                let items = body
                    .chunks_exact(ITEM_SIZE)
                    .take(count)
                    .map(read_uuid)
                    .collect();
                Ok(Node::Items { next, items })
            }
            KIND_EMPTY => Ok(Node::Empty { next }),
            other => Err(Error::Format(format!(
                "Unknown tree node kind {:#04x}",
                other
            ))),
        }
    }
}

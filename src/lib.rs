//! # archive7 — single-file encrypted virtual filesystem
//!
//! Format guarantees (frozen for major version 2):
//! - All numeric fields are big-endian (network order); never negotiated
//! - One page = 4096 bytes of AES-256-GCM ciphertext sealing a 4068-byte
//!   block (fresh random nonce per write, tag verified on every read)
//! - Every block carries a mandatory SHA-1 digest of its payload; digest or
//!   tag failure aborts the operation — no partial reads, no fallback
//! - Streams are doubly linked block chains; descriptors live in the sealed
//!   meta prologue (reserved streams) or the stream-index B+Tree (user
//!   streams)
//! - The filesystem is three B+Trees over reserved streams: entries, path
//!   keys (`uuid5(parent, name)`), and directory listings
//! - Freed blocks feed the trash stack before the file grows; freed tree
//!   pages feed each tree's own empty stack
//! - The host file is held under an OS exclusive lock for the whole session;
//!   single-writer access is a format guarantee
//!
//! The engine is keyed by a caller-supplied 32-byte secret; password
//! handling never enters this crate.

pub mod archive;
pub mod block;
pub mod entry;
pub mod error;
pub mod fs;
pub mod header;
pub mod manager;
pub mod pager;
pub mod query;
pub mod secretbox;
pub mod stream;
pub mod tree;

// Flat re-exports for the most common types.
#[cfg(feature = "async")]
pub use archive::AsyncArchive;
pub use archive::{Archive, ArchiveOptions};
pub use block::{Block, DATA_SIZE};
pub use entry::{Entry, EntryKind};
pub use error::{Error, Result};
pub use fs::{AccessMode, DeleteMode, EntryPatch, FsManager, ROOT_ID};
pub use header::ArchiveHeader;
pub use manager::StreamManager;
pub use query::{Comparison, Query};
pub use secretbox::{SecretBox, BLOCK_SIZE, PAGE_SIZE};
pub use stream::{FileObject, Stream, StreamDescriptor};
pub use tree::{MultiTree, SimpleTree};

//! Crate-wide error type.
//!
//! The block layer recovers nothing: any MAC, digest, or format violation is
//! fatal for the operation that hit it and propagates unchanged.  The stream
//! layer adds no recovery of its own (`FileObject::seek` is the one soft
//! failure — it leaves the cursor where it was).  The filesystem layer
//! validates preconditions before touching any tree, so a returned error
//! means nothing was mutated.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid archive format: {0}")]
    Format(String),

    #[error("Page authentication failed — wrong secret or corrupted page")]
    Auth,

    #[error("Checksum mismatch: {0}")]
    Checksum(String),

    #[error("Index out of bounds: {0}")]
    Bounds(String),

    #[error("Archive file is locked by another process")]
    Lock,

    #[error("Short write to page {0}")]
    Write(u32),

    #[error("No space for a new block")]
    NoSpace,

    #[error("Duplicate key {0}")]
    DuplicateKey(Uuid),

    #[error("Key not found: {0}")]
    KeyMissing(Uuid),

    #[error("File not found")]
    FileNotFound,

    #[error("Parent directory not found")]
    ParentNotFound,

    #[error("Target of link doesn't exist")]
    LinkTargetMissing,

    #[error("Link to a link is not allowed")]
    LinkToLink,

    #[error("Can't delete directory because of files")]
    DirectoryNotEmpty,

    #[error("New parent is not a directory")]
    NotADirectory,

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

//! Archive header — format anchor at offset 0 of the meta block payload.
//!
//! # Layout (344 bytes, all numeric fields big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   magic     = "archive7"  (8 ASCII bytes)
//!    8      1   format    = 'a'
//!    9      2   major     = 2
//!   11      2   minor     = 0
//!   13      1   kind      archive type, application defined
//!   14      1   role      node role, application defined
//!   15      1   usage     archive use, application defined
//!   16     16   id        unique per archive
//!   32     16   owner     owning actor uuid
//!   48     16   domain    domain uuid
//!   64     16   node      originating node uuid
//!   80      8   created   Unix seconds
//!   88    256   title     NUL-padded UTF-8
//! ```
//!
//! The header lives inside the ciphertext envelope of the meta block, so a
//! reader that gets this far has already proven possession of the secret.
//! The magic/version ladder still runs first on open: it distinguishes "not
//! an archive of ours" from "an archive we cannot read" before any stream
//! state is touched.

use byteorder::{BigEndian, ByteOrder};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"archive7";
pub const FORMAT: u8 = b'a';
pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 0;

/// Packed byte size of the header.
pub const HEADER_SIZE: usize = 344;

/// Maximum byte length of the title field.
pub const TITLE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub major: u16,
    pub minor: u16,
    pub kind: u8,
    pub role: u8,
    pub usage: u8,
    pub id: Uuid,
    pub owner: Uuid,
    pub domain: Uuid,
    pub node: Uuid,
    pub created: u64,
    pub title: String,
}

impl ArchiveHeader {
    /// A fresh header for a new archive.  `id` is always newly generated;
    /// actor uuids default to nil when the caller has none.
    pub fn new(owner: Uuid, domain: Uuid, node: Uuid, title: String) -> Self {
        Self {
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
            kind: 0,
            role: 0,
            usage: 0,
            id: Uuid::new_v4(),
            owner,
            domain,
            node,
            created: Utc::now().timestamp().max(0) as u64,
            title,
        }
    }

    /// Write the 344-byte header.
    ///
    /// The title must fit [`TITLE_SIZE`] bytes of UTF-8; it is NUL-padded on
    /// disk and trimmed back on read.
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let title = self.title.as_bytes();
        if title.len() > TITLE_SIZE {
            return Err(Error::Argument(format!(
                "Title exceeds {TITLE_SIZE} bytes"
            )));
        }

        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8] = FORMAT;
        BigEndian::write_u16(&mut buf[9..11], self.major);
        BigEndian::write_u16(&mut buf[11..13], self.minor);
        buf[13] = self.kind;
        buf[14] = self.role;
        buf[15] = self.usage;
        buf[16..32].copy_from_slice(self.id.as_bytes());
        buf[32..48].copy_from_slice(self.owner.as_bytes());
        buf[48..64].copy_from_slice(self.domain.as_bytes());
        buf[64..80].copy_from_slice(self.node.as_bytes());
        BigEndian::write_u64(&mut buf[80..88], self.created);
        buf[88..88 + title.len()].copy_from_slice(title);
        Ok(buf)
    }

    /// Read and validate a header: magic, then format, then major version.
    pub fn unpack(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::Format(format!(
                "Header truncated at {} bytes (need {HEADER_SIZE})",
                raw.len()
            )));
        }
        if &raw[0..8] != MAGIC {
            return Err(Error::Format("Bad magic — not an archive7 file".into()));
        }
        if raw[8] != FORMAT {
            return Err(Error::Format(format!(
                "Unknown format marker {:#04x}",
                raw[8]
            )));
        }
        let major = BigEndian::read_u16(&raw[9..11]);
        let minor = BigEndian::read_u16(&raw[11..13]);
        if major != VERSION_MAJOR {
            return Err(Error::Format(format!(
                "Unsupported version {major}.{minor} (this build handles {VERSION_MAJOR}.x)"
            )));
        }

        let uuid_at = |off: usize| {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&raw[off..off + 16]);
            Uuid::from_bytes(bytes)
        };

        let title_raw = &raw[88..88 + TITLE_SIZE];
        let title_end = title_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TITLE_SIZE);
        let title = String::from_utf8_lossy(&title_raw[..title_end]).into_owned();

        Ok(Self {
            major,
            minor,
            kind: raw[13],
            role: raw[14],
            usage: raw[15],
            id: uuid_at(16),
            owner: uuid_at(32),
            domain: uuid_at(48),
            node: uuid_at(64),
            created: BigEndian::read_u64(&raw[80..88]),
            title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let header = ArchiveHeader::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "backup vault".to_string(),
        );
        let raw = header.pack().unwrap();
        assert_eq!(ArchiveHeader::unpack(&raw).unwrap(), header);
    }

    #[test]
    fn empty_title_round_trips_empty() {
        let header = ArchiveHeader::new(Uuid::nil(), Uuid::nil(), Uuid::nil(), String::new());
        let raw = header.pack().unwrap();
        assert_eq!(ArchiveHeader::unpack(&raw).unwrap().title, "");
    }

    #[test]
    fn bad_magic_is_format_error() {
        let header = ArchiveHeader::new(Uuid::nil(), Uuid::nil(), Uuid::nil(), String::new());
        let mut raw = header.pack().unwrap();
        raw[0] = b'X';
        assert!(matches!(ArchiveHeader::unpack(&raw), Err(Error::Format(_))));
    }

    #[test]
    fn wrong_major_is_format_error() {
        let header = ArchiveHeader::new(Uuid::nil(), Uuid::nil(), Uuid::nil(), String::new());
        let mut raw = header.pack().unwrap();
        BigEndian::write_u16(&mut raw[9..11], 9);
        assert!(matches!(ArchiveHeader::unpack(&raw), Err(Error::Format(_))));
    }

    #[test]
    fn oversized_title_is_rejected() {
        let mut header = ArchiveHeader::new(Uuid::nil(), Uuid::nil(), Uuid::nil(), String::new());
        header.title = "x".repeat(TITLE_SIZE + 1);
        assert!(matches!(header.pack(), Err(Error::Argument(_))));
    }
}

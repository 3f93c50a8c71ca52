//! Filesystem entry records.
//!
//! # Layout (406 bytes, numeric fields big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   kind         'f' file, 'd' dir, 'l' link, 'e' error
//!    1     16   id           entry uuid
//!   17     16   parent       owning directory uuid
//!   33     16   owner        owning actor uuid
//!   49     16   stream       data stream (files), link target (links), nil
//!   65      8   created      Unix seconds, signed
//!   73      8   modified     Unix seconds, signed
//!   81      8   size         stored bytes
//!   89      8   length       uncompressed bytes
//!   97      2   compression  passthrough
//!   99      1   deleted      0 or 1
//!  100      2   perms        masked to 0o777
//!  102    256   name         NUL-padded UTF-8
//!  358     32   user         NUL-padded UTF-8
//!  390     16   group        NUL-padded UTF-8
//! ```
//!
//! Flat fixed-size records, packed and unpacked explicitly — there is no
//! schema negotiation and no optional field on disk.

use byteorder::{BigEndian, ByteOrder};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const ENTRY_SIZE: usize = 406;
pub const NAME_SIZE: usize = 256;
pub const USER_SIZE: usize = 32;
pub const GROUP_SIZE: usize = 16;
pub const PERM_MASK: u16 = 0o777;

// ── Kind ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Link,
    /// Synthetic marker for a listing child whose record is missing.
    Err,
}

impl EntryKind {
    pub fn tag(self) -> u8 {
        match self {
            EntryKind::File => b'f',
            EntryKind::Dir => b'd',
            EntryKind::Link => b'l',
            EntryKind::Err => b'e',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'f' => Ok(EntryKind::File),
            b'd' => Ok(EntryKind::Dir),
            b'l' => Ok(EntryKind::Link),
            b'e' => Ok(EntryKind::Err),
            other => Err(Error::Format(format!("Unknown entry kind {:#04x}", other))),
        }
    }
}

// ── Entry ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub id: Uuid,
    pub parent: Uuid,
    pub owner: Uuid,
    pub stream: Uuid,
    pub created: i64,
    pub modified: i64,
    pub size: u64,
    pub length: u64,
    pub compression: u16,
    pub deleted: bool,
    pub perms: u16,
    pub name: String,
    pub user: String,
    pub group: String,
}

impl Entry {
    fn blank(kind: EntryKind, id: Uuid, parent: Uuid, name: &str, perms: u16) -> Self {
        let now = Utc::now().timestamp();
        Self {
            kind,
            id,
            parent,
            owner: Uuid::nil(),
            stream: Uuid::nil(),
            created: now,
            modified: now,
            size: 0,
            length: 0,
            compression: 0,
            deleted: false,
            perms,
            name: name.to_string(),
            user: String::new(),
            group: String::new(),
        }
    }

    pub fn file(id: Uuid, parent: Uuid, name: &str) -> Self {
        Self::blank(EntryKind::File, id, parent, name, 0o644)
    }

    pub fn dir(id: Uuid, parent: Uuid, name: &str) -> Self {
        Self::blank(EntryKind::Dir, id, parent, name, 0o755)
    }

    /// A link entry; the target entry id rides in the `stream` field.
    pub fn link(id: Uuid, parent: Uuid, name: &str, target: Uuid) -> Self {
        let mut entry = Self::blank(EntryKind::Link, id, parent, name, 0o777);
        entry.stream = target;
        entry
    }

    /// The synthetic entry yielded for a listing child without a record.
    pub fn error(id: Uuid, parent: Uuid) -> Self {
        Self::blank(EntryKind::Err, id, parent, "<error>", 0)
    }

    pub fn pack(&self) -> Result<[u8; ENTRY_SIZE]> {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.kind.tag();
        buf[1..17].copy_from_slice(self.id.as_bytes());
        buf[17..33].copy_from_slice(self.parent.as_bytes());
        buf[33..49].copy_from_slice(self.owner.as_bytes());
        buf[49..65].copy_from_slice(self.stream.as_bytes());
        BigEndian::write_i64(&mut buf[65..73], self.created);
        BigEndian::write_i64(&mut buf[73..81], self.modified);
        BigEndian::write_u64(&mut buf[81..89], self.size);
        BigEndian::write_u64(&mut buf[89..97], self.length);
        BigEndian::write_u16(&mut buf[97..99], self.compression);
        buf[99] = self.deleted as u8;
        BigEndian::write_u16(&mut buf[100..102], self.perms & PERM_MASK);
        write_padded(&mut buf[102..358], &self.name, "name")?;
        write_padded(&mut buf[358..390], &self.user, "user")?;
        write_padded(&mut buf[390..406], &self.group, "group")?;
        Ok(buf)
    }

    pub fn unpack(raw: &[u8]) -> Result<Self> {
        if raw.len() < ENTRY_SIZE {
            return Err(Error::Format(format!(
                "Entry record truncated at {} bytes",
                raw.len()
            )));
        }
        let uuid_at = |off: usize| {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&raw[off..off + 16]);
            Uuid::from_bytes(bytes)
        };
        Ok(Self {
            kind: EntryKind::from_tag(raw[0])?,
            id: uuid_at(1),
            parent: uuid_at(17),
            owner: uuid_at(33),
            stream: uuid_at(49),
            created: BigEndian::read_i64(&raw[65..73]),
            modified: BigEndian::read_i64(&raw[73..81]),
            size: BigEndian::read_u64(&raw[81..89]),
            length: BigEndian::read_u64(&raw[89..97]),
            compression: BigEndian::read_u16(&raw[97..99]),
            deleted: raw[99] != 0,
            perms: BigEndian::read_u16(&raw[100..102]) & PERM_MASK,
            name: read_padded(&raw[102..358]),
            user: read_padded(&raw[358..390]),
            group: read_padded(&raw[390..406]),
        })
    }
}

fn write_padded(buf: &mut [u8], text: &str, field: &str) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() > buf.len() {
        return Err(Error::Argument(format!(
            "Entry {field} exceeds {} bytes",
            buf.len()
        )));
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_padded(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let mut entry = Entry::file(Uuid::new_v4(), Uuid::new_v4(), "report.bin");
        entry.owner = Uuid::new_v4();
        entry.stream = Uuid::new_v4();
        entry.size = 12_345;
        entry.length = 12_345;
        entry.deleted = true;
        entry.user = "alice".into();
        entry.group = "staff".into();

        let raw = entry.pack().unwrap();
        assert_eq!(raw.len(), ENTRY_SIZE);
        assert_eq!(Entry::unpack(&raw).unwrap(), entry);
    }

    #[test]
    fn perms_are_masked_on_pack() {
        let mut entry = Entry::dir(Uuid::new_v4(), Uuid::nil(), "d");
        entry.perms = 0o7777;
        let back = Entry::unpack(&entry.pack().unwrap()).unwrap();
        assert_eq!(back.perms, 0o777);
    }

    #[test]
    fn oversized_name_is_rejected() {
        let entry = Entry::file(Uuid::new_v4(), Uuid::nil(), &"x".repeat(NAME_SIZE + 1));
        assert!(matches!(entry.pack(), Err(Error::Argument(_))));
    }

    #[test]
    fn link_carries_its_target() {
        let target = Uuid::new_v4();
        let entry = Entry::link(Uuid::new_v4(), Uuid::nil(), "alias", target);
        let back = Entry::unpack(&entry.pack().unwrap()).unwrap();
        assert_eq!(back.kind, EntryKind::Link);
        assert_eq!(back.stream, target);
    }

    #[test]
    fn unknown_kind_tag_is_format_error() {
        let entry = Entry::file(Uuid::new_v4(), Uuid::nil(), "f");
        let mut raw = entry.pack().unwrap();
        raw[0] = b'z';
        assert!(matches!(Entry::unpack(&raw), Err(Error::Format(_))));
    }
}

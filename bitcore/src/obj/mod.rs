//! L1: the object model. Every object has a canonical byte form
//! `"<kind> <decimal-size>\0<payload>"`; its id is the SHA-1 of that full
//! form. Grounded on the teacher crate's `obj.rs` and `obj/*.rs`.

mod blob;
mod commit;
mod id;
mod tag;
mod tree;

pub use blob::Blob;
pub use commit::Commit;
pub use id::{BitId, PartialOid};
pub use tag::Tag;
pub use tree::{Tree, TreeEntry};

pub use crate::hash::Oid;

use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{BitError, BitResult};
use crate::hash::{sha1, Oid};
use crate::io::BufReadExt;
use crate::serialize::{DeserializeSized, Serialize};

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BitObjType {
    Commit = 1,
    Tree = 2,
    Blob = 3,
    Tag = 4,
}

impl Display for BitObjType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BitObjType {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            _ => Err(BitError::InvalidObjectType(s.to_owned())),
        }
    }
}

/// Tree-entry file modes: a closed set (spec §3).
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const REG: Self = Self(0o100644);
    pub const EXEC: Self = Self(0o100755);
    pub const LINK: Self = Self(0o120000);
    pub const DIR: Self = Self(0o040000);
    pub const GITLINK: Self = Self(0o160000);

    pub fn is_valid(self) -> bool {
        matches!(self, Self::REG | Self::EXEC | Self::LINK | Self::DIR | Self::GITLINK)
    }

    pub fn infer_obj_type(self) -> BitObjType {
        if self == Self::DIR { BitObjType::Tree } else { BitObjType::Blob }
    }
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            // Tree entries store mode as unpadded octal (`40000`, not
            // `040000`) — padding here would hash every tree containing a
            // subdirectory to the wrong id.
            write!(f, "{:o}", self.0)
        } else {
            write!(f, "{:06o}", self.0)
        }
    }
}

impl FromStr for FileMode {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = u32::from_str_radix(s, 8).map_err(|_| BitError::InvalidMode(0))?;
        let mode = Self(bits);
        if mode.is_valid() { Ok(mode) } else { Err(BitError::InvalidMode(bits)) }
    }
}

/// Common behaviour of every object kind: its type tag. An object's id is
/// never stored on the object itself — it is always the SHA-1 of the
/// canonical header+payload form, computed by
/// [`BitObjKind::serialize_with_header`], so there is exactly one place an
/// id can be produced.
pub trait BitObject {
    fn obj_type(&self) -> BitObjType;
}

/// Tagged union over the four object kinds (spec §3).
#[derive(PartialEq, Debug, Clone, bitcore_derive::BitObject)]
pub enum BitObjKind {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl BitObjKind {
    pub fn into_blob(self) -> BitResult<Blob> {
        match self {
            Self::Blob(b) => Ok(b),
            other => bail!("expected blob, found {}", other.obj_type()),
        }
    }

    pub fn into_tree(self) -> BitResult<Tree> {
        match self {
            Self::Tree(t) => Ok(t),
            other => bail!("expected tree, found {}", other.obj_type()),
        }
    }

    pub fn into_commit(self) -> BitResult<Commit> {
        match self {
            Self::Commit(c) => Ok(c),
            other => bail!("expected commit, found {}", other.obj_type()),
        }
    }

    pub fn into_tag(self) -> BitResult<Tag> {
        match self {
            Self::Tag(t) => Ok(t),
            other => bail!("expected tag, found {}", other.obj_type()),
        }
    }

    /// Serializes with the `"<kind> <size>\0"` header and hashes the full
    /// form to derive the object's id — the one place every kind's id is
    /// computed, so all kinds are addressed identically.
    pub fn serialize_with_header(&self) -> BitResult<(Oid, Vec<u8>)> {
        let mut payload = vec![];
        match self {
            Self::Blob(b) => b.serialize(&mut payload)?,
            Self::Tree(t) => t.serialize(&mut payload)?,
            Self::Commit(c) => c.serialize(&mut payload)?,
            Self::Tag(t) => t.serialize(&mut payload)?,
        }
        let mut full = Vec::with_capacity(payload.len() + 32);
        write!(full, "{} {}\0", self.obj_type(), payload.len())?;
        full.extend_from_slice(&payload);
        let oid = sha1(&full);
        Ok((oid, full))
    }

    /// Parses the canonical `"<kind> <size>\0<payload>"` form, validating
    /// that the declared size matches the payload exactly (spec §4.2).
    pub fn parse(bytes: &[u8]) -> BitResult<Self> {
        let mut reader = bytes;
        let header = read_obj_header(&mut reader)?;
        let remaining = reader.len() as u64;
        if remaining != header.size {
            return Err(BitError::SizeMismatch { expected: header.size, actual: remaining }.into());
        }
        Self::parse_body(header.obj_type, &mut std::io::BufReader::new(reader), header.size)
    }

    fn parse_body(
        obj_type: BitObjType,
        reader: &mut impl BufRead,
        size: u64,
    ) -> BitResult<Self> {
        Ok(match obj_type {
            BitObjType::Blob => Self::Blob(Blob::deserialize_sized(reader, size)?),
            BitObjType::Tree => Self::Tree(Tree::deserialize_sized(reader, size)?),
            BitObjType::Commit => Self::Commit(Commit::deserialize_sized(reader, size)?),
            BitObjType::Tag => Self::Tag(Tag::deserialize_sized(reader, size)?),
        })
    }
}

pub struct BitObjHeader {
    pub obj_type: BitObjType,
    pub size: u64,
}

/// Parses `"<type> <size>\0"` off the front of a reader.
pub fn read_obj_header(reader: &mut impl BufRead) -> BitResult<BitObjHeader> {
    let obj_type = reader.read_ascii_str(b' ')?.parse()?;
    let size = reader.read_ascii_num(0)?;
    Ok(BitObjHeader { obj_type, size })
}

/// Writable-object bound used by the loose/pack writers: anything that can
/// produce its own canonical header+payload form.
pub trait WritableObject {
    fn obj_type(&self) -> BitObjType;
    fn serialize_with_headers(&self) -> BitResult<Vec<u8>>;
}

impl WritableObject for BitObjKind {
    fn obj_type(&self) -> BitObjType {
        BitObject::obj_type(self)
    }

    fn serialize_with_headers(&self) -> BitResult<Vec<u8>> {
        Ok(self.serialize_with_header()?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_mode_rejects_unknown_bits() {
        assert!(FileMode::from_str("100644").is_ok());
        assert!(FileMode::from_str("100000").is_err());
    }

    #[test]
    fn obj_type_round_trips_through_display() {
        for ty in [BitObjType::Blob, BitObjType::Tree, BitObjType::Commit, BitObjType::Tag] {
            assert_eq!(ty.to_string().parse::<BitObjType>().unwrap(), ty);
        }
    }
}

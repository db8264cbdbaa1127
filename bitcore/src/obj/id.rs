//! Object identification: full ids and unambiguous hex prefixes. Grounded
//! on the teacher crate's `obj/obj_id.rs`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::BitError;
use crate::hash::Oid;

/// The ways an object can be identified by a caller: a full id, or a hex
/// prefix that must be expanded against the object store.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum BitId {
    Full(Oid),
    Partial(PartialOid),
}

impl BitId {
    pub fn as_oid(&self) -> Option<Oid> {
        match self {
            Self::Full(oid) => Some(*oid),
            Self::Partial(_) => None,
        }
    }
}

impl From<Oid> for BitId {
    fn from(oid: Oid) -> Self {
        Self::Full(oid)
    }
}

impl From<PartialOid> for BitId {
    fn from(partial: PartialOid) -> Self {
        Self::Partial(partial)
    }
}

impl Display for BitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(oid) => write!(f, "{}", oid),
            Self::Partial(partial) => write!(f, "{}", partial),
        }
    }
}

impl FromStr for BitId {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 40 {
            Ok(Self::Full(Oid::from_str(s)?))
        } else if (4..40).contains(&s.len()) {
            Ok(Self::Partial(PartialOid::from_str(s)?))
        } else {
            Err(BitError::InvalidHex(s.to_owned()))
        }
    }
}

/// An unambiguous hex prefix of an [`Oid`]: 4 to 39 hex characters.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy, Ord, PartialOrd)]
pub struct PartialOid {
    hex: [u8; 39],
    len: usize,
}

impl PartialOid {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.hex[..self.len]).expect("constructed from ascii hex digits")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Does `oid` start with this prefix?
    pub fn matches(&self, oid: &Oid) -> bool {
        let full_hex = oid.hex();
        full_hex.as_bytes()[..self.len] == self.hex[..self.len]
    }
}

impl Display for PartialOid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PartialOid {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !(4..40).contains(&s.len()) || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BitError::InvalidHex(s.to_owned()));
        }
        let mut hex = [0u8; 39];
        hex[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self { hex, len: s.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_oid_matches_prefix() {
        let oid = crate::hash::sha1(b"hello");
        let prefix = PartialOid::from_str(&oid.hex()[..6]).unwrap();
        assert!(prefix.matches(&oid));
    }

    #[test]
    fn too_short_prefix_is_rejected() {
        assert!(PartialOid::from_str("abc").is_err());
    }
}

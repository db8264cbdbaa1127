//! L0: content hashing. Grounded on the teacher crate's `hash.rs`: a 20-byte
//! SHA-1 newtype with hex (de)serialization, plus one-shot and streaming
//! hashers and CRC32 for pack index checksums.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::error::{BitError, BitResult};

pub const HASH_SIZE: usize = 20;

pub const EMPTY_BLOB: Oid = Oid([
    0xe6, 0x9d, 0xe2, 0x9b, 0xb2, 0xd1, 0xd6, 0x43, 0x4b, 0x8b, 0x29, 0xae, 0x77, 0x5a, 0xd8, 0xc2,
    0xe4, 0x8c, 0x53, 0x91,
]);

pub const EMPTY_TREE: Oid = Oid([
    0x4b, 0x82, 0x5d, 0xc6, 0x42, 0xcb, 0x6e, 0xb9, 0xa0, 0x60, 0xe5, 0x4b, 0xf8, 0xd6, 0x92, 0x88,
    0xfb, 0xee, 0x49, 0x04,
]);

/// An object id: the SHA-1 of an object's canonical byte form.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Oid([u8; HASH_SIZE]);

impl Oid {
    pub const UNKNOWN: Oid = Oid([0; HASH_SIZE]);

    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// First byte, used to index the pack-index fanout table.
    pub fn fanout_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 7-character abbreviated form, the default short-hash length.
    pub fn short(&self) -> String {
        self.hex()[..7].to_owned()
    }
}

impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.hex())
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() { write!(f, "{}", self.short()) } else { write!(f, "{}", self.hex()) }
    }
}

impl FromStr for Oid {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(BitError::InvalidHex(s.to_owned()));
        }
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| BitError::InvalidHex(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for Oid {
    type Error = BitError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; HASH_SIZE] =
            bytes.try_into().map_err(|_| BitError::InvalidHex(hex::encode(bytes)))?;
        Ok(Self(arr))
    }
}

/// One-shot SHA-1 over a single buffer.
pub fn sha1(bytes: &[u8]) -> Oid {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Oid(hasher.finalize().into())
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    sha1(bytes).hex()
}

/// A streaming SHA-1 hasher: `update` may be called any number of times,
/// `finalize` must produce the same digest as `sha1` over the concatenation
/// of every `update`d slice. Calling `update` again after `finalize` without
/// an intervening `reset` is a programmer error; `reset` is implemented by
/// replacing the inner hasher, since the underlying `sha1::Sha1` doesn't
/// expose an in-place reset of its own.
#[derive(Default, Clone)]
pub struct StreamingHash {
    inner: Sha1,
    finalized: bool,
}

impl StreamingHash {
    pub fn new() -> Self {
        Self { inner: Sha1::new(), finalized: false }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        assert!(!self.finalized, "StreamingHash::update called after finalize without reset");
        self.inner.update(bytes);
        self
    }

    pub fn finalize(&mut self) -> Oid {
        self.finalized = true;
        Oid(std::mem::take(&mut self.inner).finalize().into())
    }

    /// Replaces the inner hasher with a fresh one, allowing this instance to
    /// be reused after `finalize`.
    pub fn reset(&mut self) {
        self.inner = Sha1::new();
        self.finalized = false;
    }
}

/// CRC32 (IEEE 0xEDB88320, init 0xFFFFFFFF, final XOR) as used for pack
/// index per-object checksums.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob_and_tree_constants_match_canonical_form() {
        assert_eq!(sha1(b"blob 0\0"), EMPTY_BLOB);
        assert_eq!(sha1(b"tree 0\0"), EMPTY_TREE);
    }

    #[test]
    fn streaming_hash_matches_one_shot_over_concatenation() {
        let whole = sha1(b"hello world");
        let mut streaming = StreamingHash::new();
        streaming.update(b"hello").update(b" ").update(b"world");
        assert_eq!(streaming.finalize(), whole);
    }

    #[test]
    fn reset_allows_reuse_after_finalize() {
        let mut streaming = StreamingHash::new();
        streaming.update(b"hello");
        assert_eq!(streaming.finalize(), sha1(b"hello"));

        streaming.reset();
        streaming.update(b"world");
        assert_eq!(streaming.finalize(), sha1(b"world"));
    }

    #[test]
    #[should_panic(expected = "without reset")]
    fn update_after_finalize_without_reset_panics() {
        let mut streaming = StreamingHash::new();
        streaming.update(b"hello");
        streaming.finalize();
        streaming.update(b"again");
    }

    #[test]
    fn hex_round_trips() {
        let oid = sha1(b"some bytes");
        let hex = oid.hex();
        assert_eq!(Oid::from_str(&hex).unwrap(), oid);
    }

    #[test]
    fn invalid_hex_is_rejected() {
        assert!(Oid::from_str("not-hex").is_err());
        assert!(Oid::from_str(&"a".repeat(39)).is_err());
    }
}

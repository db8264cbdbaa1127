//! Blob: an opaque byte sequence with no structure (spec §3).

use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;

use super::{BitObject, BitObjType};
use crate::error::BitResult;
use crate::io::ReadExt;
use crate::serialize::{DeserializeSized, Serialize};

#[derive(PartialEq, Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_reader(mut reader: impl Read) -> BitResult<Self> {
        Ok(Self::new(reader.read_to_vec()?))
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(utf8) => write!(f, "{}", utf8),
            Err(..) => write!(f, "<binary>"),
        }
    }
}

impl Serialize for Blob {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        writer.write_all(&self.bytes)?;
        Ok(())
    }
}

impl DeserializeSized for Blob {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> BitResult<Self> {
        Ok(Self::new(reader.take(size).read_to_vec()?))
    }
}

impl BitObject for Blob {
    fn obj_type(&self) -> BitObjType {
        BitObjType::Blob
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;
    use crate::obj::BitObjKind;

    #[test]
    fn blob_round_trip_matches_spec_scenario() {
        let blob = BitObjKind::Blob(Blob::new(b"Hello, World!".to_vec()));
        let (oid, bytes) = blob.serialize_with_header().unwrap();
        assert_eq!(oid.hex(), "b45ef6fec89518d314f546fd6c97400b94907bc3");
        assert_eq!(BitObjKind::parse(&bytes).unwrap(), blob);
    }

    #[quickcheck]
    fn blob_serialize_then_parse_preserves_arbitrary_bytes(bytes: Vec<u8>) -> bool {
        let blob = BitObjKind::Blob(Blob::new(bytes));
        let (_, full) = blob.serialize_with_header().unwrap();
        BitObjKind::parse(&full).unwrap() == blob
    }
}

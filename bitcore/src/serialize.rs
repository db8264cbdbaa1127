//! Serialization traits shared by the object model, pack codec, and ref
//! layer. Grounded on the teacher crate's `serialize.rs`.

use std::io::{prelude::*, BufReader};

use crate::error::BitResult;

pub trait Serialize {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()>;

    fn serialize_to_vec(&self) -> BitResult<Vec<u8>> {
        let mut buf = vec![];
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}

/// Deserialize a value whose length is implicit in its own encoding (it
/// reads until it knows it's done: a NUL terminator, a closed-form header).
pub trait Deserialize: Sized {
    fn deserialize(reader: &mut impl BufRead) -> BitResult<Self>;

    fn deserialize_unbuffered(reader: impl Read) -> BitResult<Self> {
        Self::deserialize(&mut BufReader::new(reader))
    }
}

/// Deserialize a value whose length must be supplied externally (e.g. read
/// from an object header or delta-stream length prefix). The `size` is not
/// always the exact number of bytes consumed — see delta streams, where
/// `size` bounds only the instruction stream.
pub trait DeserializeSized: Sized {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> BitResult<Self>;

    fn deserialize_from_slice(slice: &[u8]) -> BitResult<Self> {
        Self::deserialize_sized_unbuffered(slice, slice.len() as u64)
    }

    fn deserialize_sized_unbuffered(reader: impl Read, size: u64) -> BitResult<Self> {
        Self::deserialize_sized(&mut BufReader::new(reader), size)
    }
}

impl<D: Deserialize> DeserializeSized for D {
    fn deserialize_sized(reader: &mut impl BufRead, _size: u64) -> BitResult<Self> {
        Self::deserialize(reader)
    }
}

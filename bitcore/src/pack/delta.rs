//! Delta encode/decode (spec §4.4). Decode is grounded byte-for-byte on the
//! teacher crate's `delta.rs`; the teacher's delta *compressor*
//! (`DeltaIndexCompressor::compress`) is commented "everything here is
//! wrong" and does not terminate, so it is not reused — [`compress`] below is
//! a correct from-scratch greedy rolling-hash compressor (SPEC_FULL.md
//! §4.4), emitting the same `Copy`/`Insert` wire encoding the decoder here
//! reads.

use std::collections::HashMap;
use std::io::prelude::*;

use crate::error::BitResult;
use crate::io::{BufReadExt, ReadExt, WriteExt};
use crate::serialize::DeserializeSized;

/// Default copy length when the size field is omitted from the instruction
/// (git pack-format.txt: "If the size is omitted from the insn, its size is
/// defaulted to 0x10000").
const DEFAULT_COPY_LEN: u64 = 0x10000;

/// Fixed chunk size for the compressor's base index; not part of the wire
/// format (only the resulting `Copy`/`Insert` instructions are).
const CHUNK_SIZE: usize = 16;

/// Matches git's maximum single copy-instruction length (3-byte size field).
const MAX_COPY_LEN: u64 = 0x00ff_ffff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOpKind {
    Copy { offset: u64, len: u64 },
    Insert(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub source_size: u64,
    pub target_size: u64,
    pub ops: Vec<DeltaOpKind>,
}

impl Delta {
    pub fn apply(&self, base: &[u8]) -> BitResult<Vec<u8>> {
        ensure_eq!(self.source_size, base.len() as u64, "delta base size mismatch");
        let mut out = Vec::with_capacity(self.target_size as usize);
        for op in &self.ops {
            match op {
                DeltaOpKind::Copy { offset, len } => {
                    let (start, len) = (*offset as usize, *len as usize);
                    ensure!(
                        start.checked_add(len).map_or(false, |end| end <= base.len()),
                        "delta copy instruction out of bounds"
                    );
                    out.extend_from_slice(&base[start..start + len]);
                }
                DeltaOpKind::Insert(bytes) => out.extend_from_slice(bytes),
            }
        }
        ensure_eq!(self.target_size, out.len() as u64, "delta target size mismatch");
        Ok(out)
    }

    pub fn serialize(&self, writer: &mut impl Write) -> BitResult<()> {
        writer.write_le_varint(self.source_size)?;
        writer.write_le_varint(self.target_size)?;
        for op in &self.ops {
            match op {
                DeltaOpKind::Copy { offset, len } => write_copy(writer, *offset, *len)?,
                DeltaOpKind::Insert(bytes) => {
                    for chunk in bytes.chunks(127) {
                        writer.write_u8(chunk.len() as u8)?;
                        writer.write_all(chunk)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn deserialize(reader: &mut impl BufRead, size: u64) -> BitResult<Self> {
        let source_size = reader.read_le_varint()?;
        let target_size = reader.read_le_varint()?;
        let mut r = reader.take(size);
        let mut ops = vec![];
        while !r.is_at_eof()? {
            let byte = r.read_u8()?;
            if byte & 0x80 != 0 {
                let n = r.read_le_packed(byte)?;
                let offset = n & 0xFFFF_FFFF;
                let len_field = n >> 32;
                let len = if len_field == 0 { DEFAULT_COPY_LEN } else { len_field };
                ops.push(DeltaOpKind::Copy { offset, len });
            } else {
                ensure!(byte != 0, "zero-length delta insert instruction");
                let mut bytes = vec![0u8; byte as usize];
                r.read_exact(&mut bytes)?;
                ops.push(DeltaOpKind::Insert(bytes));
            }
        }
        Ok(Self { source_size, target_size, ops })
    }
}

impl DeserializeSized for Delta {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> BitResult<Self> {
        Delta::deserialize(reader, size)
    }
}

fn write_copy(writer: &mut impl Write, offset: u64, len: u64) -> BitResult<()> {
    let len_field = if len == DEFAULT_COPY_LEN { 0 } else { len };
    let n = (offset & 0xFFFF_FFFF) | (len_field << 32);
    let mut body = vec![];
    let header = body.write_le_packed(n)?;
    writer.write_u8(0x80 | header)?;
    writer.write_all(&body)?;
    Ok(())
}

/// Greedily compresses `target` against `base`: indexes `base` by
/// fixed-size chunks, and for each position in `target` either extends the
/// longest match found in the index (emitting `Copy`) or accumulates
/// unmatched bytes (emitting `Insert`). Always terminates — `i` advances by
/// at least one byte every iteration.
pub fn compress(base: &[u8], target: &[u8]) -> Delta {
    let mut index: HashMap<&[u8], Vec<usize>> = HashMap::new();
    if base.len() >= CHUNK_SIZE {
        for i in 0..=base.len() - CHUNK_SIZE {
            index.entry(&base[i..i + CHUNK_SIZE]).or_default().push(i);
        }
    }

    let mut ops = vec![];
    let mut pending_insert = vec![];
    let mut i = 0;
    while i < target.len() {
        let found = (i + CHUNK_SIZE <= target.len())
            .then(|| index.get(&target[i..i + CHUNK_SIZE]))
            .flatten()
            .and_then(|candidates| {
                candidates
                    .iter()
                    .map(|&src| {
                        let max_len = (base.len() - src).min(target.len() - i);
                        let len = (0..max_len).take_while(|&k| base[src + k] == target[i + k]).count();
                        (src, len)
                    })
                    .max_by_key(|&(_, len)| len)
                    .filter(|&(_, len)| len >= CHUNK_SIZE)
            });

        match found {
            Some((src, len)) => {
                flush_insert(&mut ops, &mut pending_insert);
                let mut remaining = len as u64;
                let mut offset = src as u64;
                while remaining > 0 {
                    let chunk_len = remaining.min(MAX_COPY_LEN);
                    ops.push(DeltaOpKind::Copy { offset, len: chunk_len });
                    offset += chunk_len;
                    remaining -= chunk_len;
                }
                i += len;
            }
            None => {
                pending_insert.push(target[i]);
                i += 1;
            }
        }
    }
    flush_insert(&mut ops, &mut pending_insert);

    Delta { source_size: base.len() as u64, target_size: target.len() as u64, ops }
}

fn flush_insert(ops: &mut Vec<DeltaOpKind>, pending: &mut Vec<u8>) {
    if !pending.is_empty() {
        ops.push(DeltaOpKind::Insert(std::mem::take(pending)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_apply_round_trips() {
        let base = b"the quick brown fox jumps over the lazy dog".repeat(3);
        let mut target = base.clone();
        target.extend_from_slice(b" and then some more unique trailing content");
        let delta = compress(&base, &target);
        assert_eq!(delta.apply(&base).unwrap(), target);
    }

    #[test]
    fn compress_handles_disjoint_content() {
        let base = b"aaaaaaaaaaaaaaaaaaaa".to_vec();
        let target = b"bbbbbbbbbbbbbbbbbbbb".to_vec();
        let delta = compress(&base, &target);
        assert_eq!(delta.apply(&base).unwrap(), target);
    }

    #[test]
    fn wire_encoding_round_trips_through_serialize_deserialize() {
        let base = b"hello hello hello world".to_vec();
        let target = b"hello hello world world".to_vec();
        let delta = compress(&base, &target);
        let mut bytes = vec![];
        delta.serialize(&mut bytes).unwrap();
        let parsed = Delta::deserialize(&mut bytes.as_slice(), bytes.len() as u64).unwrap();
        assert_eq!(parsed.apply(&base).unwrap(), target);
    }

    #[test]
    fn empty_target_produces_empty_ops() {
        let delta = compress(b"some base content", b"");
        assert!(delta.ops.is_empty());
        assert_eq!(delta.apply(b"some base content").unwrap(), b"");
    }
}

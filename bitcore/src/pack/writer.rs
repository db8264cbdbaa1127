//! Pack generation (spec §4.4). The teacher crate's `pack/writer.rs` and
//! `pack/indexer.rs` are both `async_trait` stubs ending in `todo!()` — only
//! their *shape* (a writer that consumes objects and produces a `.pack` +
//! `.idx` pair) is reused; the object ordering, delta candidate search, and
//! record emission below are a complete synchronous implementation of spec
//! §4.4's pack generator, written against the exact wire encoding
//! [`super::delta`] and [`super::index`] already decode.

use std::collections::VecDeque;
use std::io::prelude::*;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::BitResult;
use crate::hash::Oid;
use crate::io::WriteExt;
use crate::obj::{BitObjKind, BitObjType};

use super::delta::{self, Delta};
use super::index::{PackIndex, PackIndexEntry};
use super::{PackObjType, PACK_SIGNATURE, PACK_VERSION};

#[derive(Debug, Clone, Copy)]
pub struct PackWriterConfig {
    /// How many previously emitted objects of the same kind are considered
    /// as delta bases (spec §4.4 "sliding window of up to `W`").
    pub window_size: usize,
    /// Chain-depth bound `D` (spec §4.4, default 50).
    pub max_delta_chain_depth: u32,
    /// Objects smaller than this are written as base records without
    /// attempting a delta at all; `None` means no floor.
    pub min_delta_size: Option<u64>,
    /// Prefer `ref_delta` over `ofs_delta`. Local packs (the only kind this
    /// writer produces) want `ofs_delta`; `ref_delta` is kept configurable
    /// for thin-pack-style generation against a base the reader is assumed
    /// to already have.
    pub use_ref_delta: bool,
    pub compression_level: u32,
}

impl Default for PackWriterConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            max_delta_chain_depth: 50,
            min_delta_size: None,
            use_ref_delta: false,
            compression_level: 6,
        }
    }
}

/// One object as seen by the writer: its id, kind, and canonical payload
/// (the object's serialized body, without the `"<kind> <size>\0"` header —
/// that header is reconstructed on read from the pack record's own
/// type-size varint instead).
struct Entry {
    oid: Oid,
    obj_type: BitObjType,
    payload: Vec<u8>,
}

pub struct PackWriter {
    config: PackWriterConfig,
}

impl PackWriter {
    pub fn new(config: PackWriterConfig) -> Self {
        Self { config }
    }

    pub fn write(
        &self,
        objects: &[BitObjKind],
        pack_path: impl AsRef<Path>,
        idx_path: impl AsRef<Path>,
    ) -> BitResult<()> {
        let (buf, index, count) = self.build(objects)?;

        std::fs::write(pack_path.as_ref(), &buf)?;
        let mut idx_bytes = vec![];
        index.write(&mut idx_bytes)?;
        std::fs::write(idx_path.as_ref(), &idx_bytes)?;

        info!("wrote pack `{}` with {} object(s)", pack_path.as_ref().display(), count);
        Ok(())
    }

    /// Produces the raw `.pack` bytes only (header, records, trailer), for
    /// callers that stream the result over the wire rather than writing it
    /// to disk — upload-pack (spec §4.9) has no use for a sidecar `.idx`
    /// since the peer indexes the pack itself on receipt.
    pub fn write_to_vec(&self, objects: &[BitObjKind]) -> BitResult<Vec<u8>> {
        let (buf, _index, _count) = self.build(objects)?;
        Ok(buf)
    }

    fn build(&self, objects: &[BitObjKind]) -> BitResult<(Vec<u8>, PackIndex, usize)> {
        let entries = self.order_entries(objects)?;

        let mut buf = Vec::new();
        buf.write_all(PACK_SIGNATURE)?;
        buf.write_u32(PACK_VERSION)?;
        buf.write_u32(entries.len() as u32)?;

        let mut offsets: std::collections::HashMap<Oid, u64> = std::collections::HashMap::new();
        let mut depths: std::collections::HashMap<Oid, u32> = std::collections::HashMap::new();
        let mut windows: std::collections::HashMap<BitObjType, VecDeque<usize>> =
            std::collections::HashMap::new();
        let mut idx_entries = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            let record_start = buf.len() as u64;
            let window = windows.entry(entry.obj_type).or_default();

            let best = self.find_best_delta(entry, window, &entries, &depths);

            match best {
                Some((base_idx, delta)) => {
                    let base = &entries[base_idx];
                    let depth = depths.get(&base.oid).copied().unwrap_or(0) + 1;
                    let delta_bytes = serialize_delta(&delta)?;
                    if self.config.use_ref_delta {
                        let mut extra = vec![];
                        extra.write_oid(&base.oid)?;
                        self.write_record(&mut buf, PackObjType::RefDelta, &extra, &delta_bytes)?;
                    } else {
                        let back = record_start - offsets[&base.oid];
                        let mut extra = vec![];
                        extra.write_offset(back)?;
                        self.write_record(&mut buf, PackObjType::OfsDelta, &extra, &delta_bytes)?;
                    }
                    depths.insert(entry.oid, depth);
                }
                None => {
                    self.write_record(&mut buf, entry.obj_type.into(), &[], &entry.payload)?;
                    depths.insert(entry.oid, 0);
                }
            }

            let crc32 = crate::hash::crc32(&buf[record_start as usize..]);
            idx_entries.push(PackIndexEntry { oid: entry.oid, crc32, offset: record_start });
            offsets.insert(entry.oid, record_start);

            window.push_back(i);
            if window.len() > self.config.window_size {
                window.pop_front();
            }
        }

        let trailer = crate::hash::sha1(&buf);
        buf.extend_from_slice(trailer.as_bytes());

        let count = entries.len();
        let index = PackIndex::build(idx_entries, trailer);
        Ok((buf, index, count))
    }

    /// Dedups by id and orders `(commit, tag, tree, blob)`, size descending
    /// within each group (spec §4.4; path-based secondary ordering is
    /// skipped since objects here carry no path metadata).
    fn order_entries(&self, objects: &[BitObjKind]) -> BitResult<Vec<Entry>> {
        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::with_capacity(objects.len());
        for obj in objects {
            let (oid, full) = obj.serialize_with_header()?;
            if !seen.insert(oid) {
                continue;
            }
            let null_pos = full.iter().position(|&b| b == 0).expect("header always has a NUL");
            let payload = full[null_pos + 1..].to_vec();
            entries.push(Entry { oid, obj_type: obj_type_of(obj), payload });
        }
        entries.sort_by_key(|e| (kind_rank(e.obj_type), std::cmp::Reverse(e.payload.len())));
        Ok(entries)
    }

    fn find_best_delta(
        &self,
        entry: &Entry,
        window: &VecDeque<usize>,
        entries: &[Entry],
        depths: &std::collections::HashMap<Oid, u32>,
    ) -> Option<(usize, Delta)> {
        if let Some(min) = self.config.min_delta_size {
            if (entry.payload.len() as u64) < min {
                return None;
            }
        }

        let mut best: Option<(usize, Delta, usize)> = None;
        for &base_idx in window {
            let base = &entries[base_idx];
            let depth = depths.get(&base.oid).copied().unwrap_or(0);
            if depth + 1 > self.config.max_delta_chain_depth {
                continue;
            }
            let delta = delta::compress(&base.payload, &entry.payload);
            let Ok(size) = serialize_delta(&delta).map(|v| v.len()) else { continue };
            // spec §4.4: delta bytes must be under half the undeltified size.
            if size * 2 >= entry.payload.len() {
                continue;
            }
            if best.as_ref().map_or(true, |(_, _, best_size)| size < *best_size) {
                best = Some((base_idx, delta, size));
            }
        }
        best.map(|(idx, delta, _)| (idx, delta))
    }

    fn write_record(
        &self,
        buf: &mut Vec<u8>,
        pack_obj_type: PackObjType,
        extra: &[u8],
        body: &[u8],
    ) -> BitResult<()> {
        let tag = u8::from(pack_obj_type) << 4;
        buf.write_le_varint_with_shift(body.len() as u64, tag, 4)?;
        buf.write_all(extra)?;
        let mut encoder = ZlibEncoder::new(buf, Compression::new(self.config.compression_level));
        encoder.write_all(body)?;
        encoder.finish()?;
        Ok(())
    }
}

fn obj_type_of(obj: &BitObjKind) -> BitObjType {
    use crate::obj::BitObject;
    obj.obj_type()
}

/// `(commit, tag, tree, blob)` ordering (spec §4.4), front-loading the types
/// most likely to share structure with their immediate predecessors.
fn kind_rank(obj_type: BitObjType) -> u8 {
    match obj_type {
        BitObjType::Commit => 0,
        BitObjType::Tag => 1,
        BitObjType::Tree => 2,
        BitObjType::Blob => 3,
    }
}

fn serialize_delta(delta: &Delta) -> BitResult<Vec<u8>> {
    let mut buf = vec![];
    delta.serialize(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::Blob;
    use tempfile::tempdir;

    #[test]
    fn writes_pack_with_similar_blobs_deltified() {
        let base_content = b"the quick brown fox jumps over the lazy dog\n".repeat(20);
        let mut modified = base_content.clone();
        modified.extend_from_slice(b"one more unique trailing line\n");

        let objects = vec![
            BitObjKind::Blob(Blob::new(base_content)),
            BitObjKind::Blob(Blob::new(modified)),
        ];

        let dir = tempdir().unwrap();
        let pack_path = dir.path().join("test.pack");
        let idx_path = dir.path().join("test.idx");
        let writer = PackWriter::new(PackWriterConfig::default());
        writer.write(&objects, &pack_path, &idx_path).unwrap();

        let pack = super::super::Pack::open(&pack_path, &idx_path).unwrap();
        pack.validate().unwrap();
        assert_eq!(pack.index().len(), 2);
    }

    #[test]
    fn deduplicates_identical_objects() {
        let objects = vec![
            BitObjKind::Blob(Blob::new(b"same".to_vec())),
            BitObjKind::Blob(Blob::new(b"same".to_vec())),
        ];
        let dir = tempdir().unwrap();
        let pack_path = dir.path().join("dup.pack");
        let idx_path = dir.path().join("dup.idx");
        PackWriter::new(PackWriterConfig::default()).write(&objects, &pack_path, &idx_path).unwrap();
        let pack = super::super::Pack::open(&pack_path, &idx_path).unwrap();
        assert_eq!(pack.index().len(), 1);
    }
}

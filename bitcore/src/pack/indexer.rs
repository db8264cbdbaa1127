//! Sequential pack indexing: scans a complete in-memory packfile (header,
//! records, 20-byte trailer) record by record and materializes every
//! object, resolving `ofs_delta` against records already scanned and
//! `ref_delta` against either an earlier in-pack record or an external
//! object store — the thin-pack case a push's pack is allowed to use
//! (spec §4.4, §4.9). Grounded on the *shape* of the teacher crate's
//! `pack/indexer.rs` (a reader paired with a hash writer, `parse
//! header -> read records -> commit`), whose body was never more than a
//! `todo!()`; the scan and delta resolution below are new.
//!
//! Unlike [`super::Pack`], which opens a `.pack` + `.idx` pair and seeks by
//! recorded offset, this never touches disk: receive-pack (spec §4.9) has
//! only a byte buffer read off the wire and no index to seek with yet —
//! that index is exactly what this module produces.

use std::collections::HashMap;
use std::io::prelude::*;

use crate::error::{BitError, BitResult};
use crate::hash::Oid;
use crate::io::ReadExt;
use crate::obj::{BitObject, BitObjKind, BitObjType};
use crate::odb::ObjectStore;

use super::delta::Delta;
use super::index::{PackIndex, PackIndexEntry};
use super::{pack_type_to_obj_type, validate_header_and_trailer, PackObjType, MAX_DELTA_CHAIN_DEPTH};

struct RawEntry {
    offset: u64,
    obj_type: PackObjType,
    ofs_base: Option<u64>,
    ref_base: Option<Oid>,
    payload: Vec<u8>,
    crc32: u32,
}

/// Scans `bytes` and returns a freshly built index plus every object it
/// contains, in pack order. `external` supplies bases for `ref_delta`
/// records whose base isn't itself in this pack.
pub fn scan(bytes: &[u8], external: &ObjectStore) -> BitResult<(PackIndex, Vec<BitObjKind>)> {
    let header = validate_header_and_trailer(bytes)?;
    let end = bytes.len() - 20;
    let trailer = Oid::try_from(&bytes[end..])?;

    let mut cursor = 12usize; // "PACK" + version + object count
    let mut raws = Vec::with_capacity(header.object_count as usize);
    for _ in 0..header.object_count {
        let record_start = cursor as u64;
        let mut slice: &[u8] = &bytes[cursor..end];

        let (size, first) = slice.read_le_varint_with_shift(4)?;
        let obj_type = PackObjType::try_from((first >> 4) & 0b111)
            .map_err(|_| anyhow!("invalid pack record type tag at offset {}", record_start))?;

        let (ofs_base, ref_base) = match obj_type {
            PackObjType::OfsDelta => {
                let back = slice.read_offset()?;
                let base = record_start
                    .checked_sub(back)
                    .ok_or_else(|| anyhow!("ofs_delta at {} references before start of pack", record_start))?;
                (Some(base), None)
            }
            PackObjType::RefDelta => (None, Some(slice.read_oid()?)),
            _ => (None, None),
        };

        let payload = super::inflate(&mut slice, size)?;
        let record_end = end - slice.len();
        let crc32 = crate::hash::crc32(&bytes[cursor..record_end]);
        raws.push(RawEntry { offset: record_start, obj_type, ofs_base, ref_base, payload, crc32 });
        cursor = record_end;
    }

    let by_offset: HashMap<u64, usize> = raws.iter().enumerate().map(|(i, r)| (r.offset, i)).collect();
    let mut resolved: HashMap<u64, (BitObjType, Vec<u8>)> = HashMap::new();
    let mut by_oid: HashMap<Oid, u64> = HashMap::new();

    // Pass 1: resolve every base and ofs_delta record (ref_delta bases
    // aren't known to exist in-pack yet, so those are deferred).
    for raw in &raws {
        if !matches!(raw.obj_type, PackObjType::RefDelta) {
            let mut visiting = vec![];
            resolve_ofs_chain(raw.offset, &raws, &by_offset, &mut resolved, &mut by_oid, &mut visiting)?;
        }
    }

    // Pass 2: resolve ref_delta records, repeating until a round makes no
    // progress — a ref_delta's base may itself be a not-yet-resolved
    // ref_delta earlier in the pack.
    let mut remaining: Vec<usize> = raws
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r.obj_type, PackObjType::RefDelta))
        .map(|(i, _)| i)
        .collect();
    while !remaining.is_empty() {
        let mut next_remaining = Vec::new();
        let mut progressed = false;
        for i in remaining {
            let raw = &raws[i];
            let base_id = raw.ref_base.expect("filtered to ref_delta entries");
            let base = match by_oid.get(&base_id) {
                Some(&base_offset) => resolved.get(&base_offset).cloned(),
                None => match external.get(base_id) {
                    Ok(obj) => Some(split_canonical(&obj)?),
                    Err(err) if err.is_not_found_err() => None,
                    Err(err) => return Err(err),
                },
            };
            match base {
                Some((base_type, base_bytes)) => {
                    let delta = Delta::deserialize(&mut raw.payload.as_slice(), raw.payload.len() as u64)?;
                    let target = delta.apply(&base_bytes)?;
                    insert_resolved(raw.offset, base_type, target, &mut resolved, &mut by_oid);
                    progressed = true;
                }
                None => next_remaining.push(i),
            }
        }
        if !progressed {
            return Err(BitError::ObjectNotFound(crate::obj::BitId::Full(
                raws[next_remaining[0]].ref_base.expect("filtered to ref_delta entries"),
            ))
            .into());
        }
        remaining = next_remaining;
    }

    let mut objects = Vec::with_capacity(raws.len());
    let mut idx_entries = Vec::with_capacity(raws.len());
    for raw in &raws {
        let (obj_type, bytes) = resolved
            .remove(&raw.offset)
            .ok_or_else(|| anyhow!("object at offset {} was never resolved", raw.offset))?;
        let mut full = Vec::with_capacity(bytes.len() + 32);
        write!(full, "{} {}\0", obj_type, bytes.len())?;
        full.extend_from_slice(&bytes);
        let oid = crate::hash::sha1(&full);
        idx_entries.push(PackIndexEntry { oid, crc32: raw.crc32, offset: raw.offset });
        objects.push(BitObjKind::parse(&full)?);
    }

    Ok((PackIndex::build(idx_entries, trailer), objects))
}

#[allow(clippy::too_many_arguments)]
fn resolve_ofs_chain(
    offset: u64,
    raws: &[RawEntry],
    by_offset: &HashMap<u64, usize>,
    resolved: &mut HashMap<u64, (BitObjType, Vec<u8>)>,
    by_oid: &mut HashMap<Oid, u64>,
    visiting: &mut Vec<u64>,
) -> BitResult<(BitObjType, Vec<u8>)> {
    if let Some(cached) = resolved.get(&offset) {
        return Ok(cached.clone());
    }
    if visiting.contains(&offset) {
        return Err(BitError::DeltaChainCycle(offset).into());
    }
    if visiting.len() as u32 >= MAX_DELTA_CHAIN_DEPTH {
        return Err(
            BitError::DeltaChainTooDeep { depth: visiting.len() as u32, max: MAX_DELTA_CHAIN_DEPTH }.into()
        );
    }

    let idx = *by_offset
        .get(&offset)
        .ok_or_else(|| anyhow!("delta references offset {} with no record", offset))?;
    let raw = &raws[idx];
    let result = match raw.obj_type {
        PackObjType::Commit | PackObjType::Tree | PackObjType::Blob | PackObjType::Tag =>
            (pack_type_to_obj_type(raw.obj_type), raw.payload.clone()),
        PackObjType::OfsDelta => {
            let base_offset = raw.ofs_base.expect("ofs_delta carries a base offset");
            visiting.push(offset);
            let (base_type, base_bytes) =
                resolve_ofs_chain(base_offset, raws, by_offset, resolved, by_oid, visiting)?;
            visiting.pop();
            let delta = Delta::deserialize(&mut raw.payload.as_slice(), raw.payload.len() as u64)?;
            (base_type, delta.apply(&base_bytes)?)
        }
        PackObjType::RefDelta =>
            return Err(anyhow!("ofs_delta chain at offset {} passes through a ref_delta", offset)),
    };

    insert_resolved(offset, result.0, result.1.clone(), resolved, by_oid);
    Ok(result)
}

fn insert_resolved(
    offset: u64,
    obj_type: BitObjType,
    bytes: Vec<u8>,
    resolved: &mut HashMap<u64, (BitObjType, Vec<u8>)>,
    by_oid: &mut HashMap<Oid, u64>,
) {
    let mut full = Vec::with_capacity(bytes.len() + 32);
    let _ = write!(full, "{} {}\0", obj_type, bytes.len());
    full.extend_from_slice(&bytes);
    by_oid.insert(crate::hash::sha1(&full), offset);
    resolved.insert(offset, (obj_type, bytes));
}

fn split_canonical(obj: &BitObjKind) -> BitResult<(BitObjType, Vec<u8>)> {
    let (_, full) = obj.serialize_with_header()?;
    let null_pos = full.iter().position(|&b| b == 0).expect("canonical form always has a NUL");
    Ok((BitObject::obj_type(obj), full[null_pos + 1..].to_vec()))
}

//! Pack index v2 (spec §3, §4.4). Grounded on the teacher crate's
//! `PackIndex`/`PackIndexReader` in `pack.rs`, with the large-offsets table
//! (packs > 2 GiB) fully implemented rather than left as a gap, and a single
//! checksum-before-parse policy (see DESIGN.md Open Question 2) instead of
//! the teacher's two near-identical verification paths.

use std::io::prelude::*;

use crate::error::{BitError, BitResult};
use crate::hash::Oid;
use crate::io::{HashReader, HashWriter, ReadExt, WriteExt};

pub const PACK_IDX_MAGIC: u32 = 0xff74_4f63;
pub const FANOUT_ENTRIES: usize = 256;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackIndexEntry {
    pub oid: Oid,
    pub crc32: u32,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct PackIndex {
    fanout: [u32; FANOUT_ENTRIES],
    /// Sorted ascending by `oid`, as the format requires.
    entries: Vec<PackIndexEntry>,
    pub pack_checksum: Oid,
}

impl PackIndex {
    /// Builds an index from entries in arbitrary order, sorting and
    /// recomputing the fanout table.
    pub fn build(mut entries: Vec<PackIndexEntry>, pack_checksum: Oid) -> Self {
        entries.sort_by_key(|e| e.oid);
        let mut fanout = [0u32; FANOUT_ENTRIES];
        for entry in &entries {
            fanout[entry.oid.fanout_byte() as usize] += 1;
        }
        for i in 1..FANOUT_ENTRIES {
            fanout[i] += fanout[i - 1];
        }
        Self { fanout, entries, pack_checksum }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PackIndexEntry] {
        &self.entries
    }

    pub fn fanout(&self) -> &[u32; FANOUT_ENTRIES] {
        &self.fanout
    }

    /// Fanout-narrowed binary search for an exact id.
    pub fn find(&self, oid: Oid) -> Option<&PackIndexEntry> {
        let (lo, hi) = self.fanout_range(oid.fanout_byte());
        self.entries[lo..hi].binary_search_by_key(&oid, |e| e.oid).ok().map(|i| &self.entries[lo + i])
    }

    /// All entries whose id starts with `partial`'s hex prefix.
    pub fn expand_prefix(&self, partial: &crate::obj::PartialOid) -> Vec<Oid> {
        let first_byte = u8::from_str_radix(&partial.as_str()[..2.min(partial.len())], 16).unwrap_or(0);
        let (lo, hi) = if partial.len() >= 2 {
            self.fanout_range(first_byte)
        } else {
            (0, self.entries.len())
        };
        self.entries[lo..hi].iter().filter(|e| partial.matches(&e.oid)).map(|e| e.oid).collect()
    }

    fn fanout_range(&self, byte: u8) -> (usize, usize) {
        let hi = self.fanout[byte as usize] as usize;
        let lo = if byte == 0 { 0 } else { self.fanout[byte as usize - 1] as usize };
        (lo, hi)
    }

    pub fn write(&self, writer: &mut impl Write) -> BitResult<()> {
        let mut hw = HashWriter::new(&mut *writer);
        hw.write_u32(PACK_IDX_MAGIC)?;
        hw.write_u32(2)?;
        for count in &self.fanout {
            hw.write_u32(*count)?;
        }
        for entry in &self.entries {
            hw.write_oid(&entry.oid)?;
        }
        for entry in &self.entries {
            hw.write_u32(entry.crc32)?;
        }
        let mut large_offsets = vec![];
        for entry in &self.entries {
            if entry.offset > i32::MAX as u64 {
                let idx = large_offsets.len() as u32;
                large_offsets.push(entry.offset);
                hw.write_u32(LARGE_OFFSET_FLAG | idx)?;
            } else {
                hw.write_u32(entry.offset as u32)?;
            }
        }
        for offset in &large_offsets {
            hw.write_u64(*offset)?;
        }
        hw.write_oid(&self.pack_checksum)?;
        let self_checksum = hw.finalize_oid();
        writer.write_oid(&self_checksum)?;
        Ok(())
    }

    pub fn parse(bytes: &[u8]) -> BitResult<Self> {
        // Checksum-before-parse: verify the trailing digest before
        // interpreting a single field (DESIGN.md Open Question 2).
        if bytes.len() < 20 {
            bail!("pack index too short to contain a checksum");
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 20);
        let expected = Oid::try_from(trailer)?;
        let actual = crate::hash::sha1(body);
        if actual != expected {
            return Err(BitError::ChecksumMismatch { expected: expected.hex(), actual: actual.hex() }.into());
        }

        let mut body = body;
        let mut reader = HashReader::new(&mut body);
        let magic = reader.read_u32()?;
        if magic != PACK_IDX_MAGIC {
            bail!("invalid pack index magic `{:#x}`", magic);
        }
        let version = reader.read_u32()?;
        ensure_eq!(version, 2, "unsupported pack index version `{}`", version);

        let mut fanout = [0u32; FANOUT_ENTRIES];
        for slot in &mut fanout {
            *slot = reader.read_u32()?;
        }
        for i in 1..FANOUT_ENTRIES {
            if fanout[i] < fanout[i - 1] {
                bail!("pack index fanout table is not non-decreasing");
            }
        }
        let count = *fanout.last().unwrap() as usize;

        let mut oids = Vec::with_capacity(count);
        for _ in 0..count {
            let oid = reader.read_oid()?;
            if let Some(prev) = oids.last() {
                if oid <= *prev {
                    bail!("pack index ids are not strictly ascending");
                }
            }
            oids.push(oid);
        }

        let mut crcs = Vec::with_capacity(count);
        for _ in 0..count {
            crcs.push(reader.read_u32()?);
        }

        let mut small_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            small_offsets.push(reader.read_u32()?);
        }

        let large_count = small_offsets.iter().filter(|&&o| o & LARGE_OFFSET_FLAG != 0).count();
        let mut large_offsets = Vec::with_capacity(large_count);
        for _ in 0..large_count {
            large_offsets.push(reader.read_u64()?);
        }

        let pack_checksum = reader.read_oid()?;

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = if small_offsets[i] & LARGE_OFFSET_FLAG != 0 {
                let idx = (small_offsets[i] & !LARGE_OFFSET_FLAG) as usize;
                *large_offsets
                    .get(idx)
                    .ok_or_else(|| anyhow!("pack index large-offset index {} out of range", idx))?
            } else {
                small_offsets[i] as u64
            };
            entries.push(PackIndexEntry { oid: oids[i], crc32: crcs[i], offset });
        }

        Ok(Self { fanout, entries, pack_checksum })
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    fn oid_with_first_byte(byte: u8, salt: u8) -> Oid {
        crate::hash::sha1(&[byte, salt])
    }

    /// For any set of entries, the built fanout table is non-decreasing and
    /// the sorted entries are strictly ascending by id (spec §8).
    #[quickcheck]
    fn fanout_is_non_decreasing_and_entries_strictly_ascending(salts: Vec<u8>) -> bool {
        let mut seen = std::collections::HashSet::new();
        let entries: Vec<_> = salts
            .iter()
            .enumerate()
            .filter_map(|(i, &salt)| {
                let oid = crate::hash::sha1(&[salt, (i % 256) as u8, (i / 256) as u8]);
                seen.insert(oid).then_some(PackIndexEntry { oid, crc32: i as u32, offset: i as u64 })
            })
            .collect();
        let index = PackIndex::build(entries, Oid::UNKNOWN);

        let fanout_non_decreasing = index.fanout().windows(2).all(|w| w[0] <= w[1]);
        let entries_strictly_ascending =
            index.entries().windows(2).all(|w| w[0].oid < w[1].oid);
        fanout_non_decreasing && entries_strictly_ascending
    }

    #[test]
    fn fanout_matches_spec_scenario() {
        let entries = vec![
            PackIndexEntry { oid: oid_with_first_byte(0x00, 1), crc32: 1, offset: 12 },
            PackIndexEntry { oid: oid_with_first_byte(0x7f, 2), crc32: 2, offset: 34 },
            PackIndexEntry { oid: oid_with_first_byte(0xff, 3), crc32: 3, offset: 56 },
        ];
        let index = PackIndex::build(entries, Oid::UNKNOWN);
        assert_eq!(index.fanout()[0], 1);
        assert_eq!(index.fanout()[127], 2);
        assert_eq!(index.fanout()[255], 3);
        let second = oid_with_first_byte(0x7f, 2);
        assert_eq!(index.find(second).unwrap().offset, 34);
    }

    #[test]
    fn write_then_parse_round_trips() {
        let entries = vec![
            PackIndexEntry { oid: oid_with_first_byte(0x10, 1), crc32: 0xdead_beef, offset: 100 },
            PackIndexEntry { oid: oid_with_first_byte(0x20, 2), crc32: 0xcafe_babe, offset: 3_000_000_000 },
        ];
        let index = PackIndex::build(entries, crate::hash::sha1(b"pack"));
        let mut bytes = vec![];
        index.write(&mut bytes).unwrap();
        let parsed = PackIndex::parse(&bytes).unwrap();
        assert_eq!(parsed.entries(), index.entries());
        assert_eq!(parsed.find(oid_with_first_byte(0x20, 2)).unwrap().offset, 3_000_000_000);
    }

    #[test]
    fn corrupt_trailer_is_rejected() {
        let index = PackIndex::build(vec![], Oid::UNKNOWN);
        let mut bytes = vec![];
        index.write(&mut bytes).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(PackIndex::parse(&bytes).is_err());
    }
}

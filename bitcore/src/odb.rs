//! L2: object store façade (spec §4.5). Grounded on the teacher crate's
//! `BitObjDb`/`BitLooseObjDb`/`BitPackedObjDb` fan-out in `odb.rs`: loose is
//! tried first, then packs in registration order, with fallthrough only on a
//! not-found-shaped error (anything else aborts immediately). Unlike the
//! teacher, there is no `BitObjDbBackend` trait object indirection — loose and
//! packed storage are concrete fields, since this crate has exactly two
//! backends and no plugin story for a third.

use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::error::{BitError, BitErrorExt, BitResult};
use crate::hash::Oid;
use crate::lockfile::{Lockfile, LockfileFlags};
use crate::obj::{BitId, BitObjKind, BitObjType, PartialOid};
use crate::pack::Pack;

/// Loose + packed object storage, resolved in that order (spec §4.5).
pub struct ObjectStore {
    loose: LooseObjDb,
    packed: PackedObjDb,
}

impl ObjectStore {
    pub fn open(git_dir: impl AsRef<Path>) -> BitResult<Self> {
        let objects_path = git_dir.as_ref().join("objects");
        std::fs::create_dir_all(&objects_path)?;
        Ok(Self { loose: LooseObjDb::new(objects_path.clone()), packed: PackedObjDb::open(objects_path)? })
    }

    pub fn has(&self, id: impl Into<BitId>) -> BitResult<bool> {
        match self.expand_id(id.into()) {
            Ok(oid) => Ok(self.loose.exists(oid) || self.packed.contains(oid)),
            Err(err) if err.is_not_found_err() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Resolution order: loose first, then each pack's index (spec §4.5).
    pub fn get(&self, id: impl Into<BitId>) -> BitResult<BitObjKind> {
        let oid = self.expand_id(id.into())?;
        if let Some(bytes) = self.loose.read(oid)? {
            return BitObjKind::parse(&bytes);
        }
        let (obj_type, payload) = self.packed.read_obj(oid)?;
        BitObjKind::parse(&canonical_form(obj_type, &payload))
    }

    /// Idempotent: writing the same content twice yields the same id and is
    /// a no-op on the second call.
    pub fn put(&self, obj: &BitObjKind) -> BitResult<Oid> {
        let (oid, bytes) = obj.serialize_with_header()?;
        self.loose.write(oid, &bytes)?;
        Ok(oid)
    }

    /// All known ids whose hex form starts with `prefix` (spec §4.5
    /// `iter_ids`); `prefix` may be shorter than the 4-character minimum
    /// [`PartialOid`] enforces, including empty (every id).
    pub fn iter_ids(&self, prefix: &str) -> BitResult<Vec<Oid>> {
        let mut ids = self.loose.prefix_candidates(prefix)?;
        ids.extend(self.packed.prefix_candidates(prefix));
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn expand_id(&self, id: BitId) -> BitResult<Oid> {
        let partial = match id {
            BitId::Full(oid) => return Ok(oid),
            BitId::Partial(partial) => partial,
        };
        let mut candidates = self.loose.prefix_candidates(partial.as_str())?;
        candidates.extend(self.packed.prefix_candidates(partial.as_str()));
        candidates.sort();
        candidates.dedup();
        match candidates.len() {
            0 => Err(BitError::ObjectNotFound(BitId::Partial(partial)).into()),
            1 => Ok(candidates[0]),
            _ => Err(BitError::AmbiguousPrefix(partial, candidates).into()),
        }
    }
}

/// Reconstructs the canonical `"<kind> <size>\0<payload>"` form from a
/// pack-resolved (type, payload) pair, the same way [`Pack::validate`]
/// verifies ids.
fn canonical_form(obj_type: BitObjType, payload: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(payload.len() + 32);
    let _ = write!(full, "{} {}\0", obj_type, payload.len());
    full.extend_from_slice(payload);
    full
}

struct LooseObjDb {
    objects_path: PathBuf,
}

impl LooseObjDb {
    fn new(objects_path: PathBuf) -> Self {
        Self { objects_path }
    }

    fn obj_path(&self, oid: Oid) -> PathBuf {
        let hex = oid.hex();
        self.objects_path.join(&hex[..2]).join(&hex[2..])
    }

    fn exists(&self, oid: Oid) -> bool {
        self.obj_path(oid).is_file()
    }

    /// `Some(full canonical bytes)` if present, `None` (not an error) if
    /// absent — callers fall through to the packed backend on `None`.
    fn read(&self, oid: Oid) -> BitResult<Option<Vec<u8>>> {
        let path = self.obj_path(oid);
        if !path.is_file() {
            return Ok(None);
        }
        let mut buf = vec![];
        ZlibDecoder::new(File::open(path)?).read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    fn write(&self, oid: Oid, bytes: &[u8]) -> BitResult<()> {
        let path = self.obj_path(oid);
        if path.exists() {
            // Same id, so (barring a SHA-1 collision) the same content; skip
            // the write rather than re-deflating and re-locking.
            return Ok(());
        }
        Lockfile::with_mut(&path, LockfileFlags::SET_READONLY, |lockfile| {
            ZlibEncoder::new(lockfile, Compression::default()).write_all(bytes)?;
            Ok(())
        })
    }

    fn prefix_candidates(&self, prefix: &str) -> BitResult<Vec<Oid>> {
        if !self.objects_path.is_dir() {
            return Ok(vec![]);
        }
        let mut candidates = vec![];
        for dir_entry in std::fs::read_dir(&self.objects_path)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = dir_entry.file_name();
            let dir_name = dir_name.to_string_lossy();
            if dir_name.len() != 2 || !dir_name.starts_with(&prefix[..prefix.len().min(2)]) {
                continue;
            }
            for file_entry in std::fs::read_dir(dir_entry.path())? {
                let file_entry = file_entry?;
                if !file_entry.file_type()?.is_file() {
                    continue;
                }
                let file_name = file_entry.file_name();
                let file_name = file_name.to_string_lossy();
                let full_hex = format!("{}{}", dir_name, file_name);
                if full_hex.starts_with(prefix) {
                    if let Ok(oid) = Oid::from_str(&full_hex) {
                        candidates.push(oid);
                    }
                }
            }
        }
        Ok(candidates)
    }
}

struct PackedObjDb {
    packs: RwLock<Vec<Pack>>,
}

impl PackedObjDb {
    fn open(objects_path: PathBuf) -> BitResult<Self> {
        let pack_dir = objects_path.join("pack");
        if !pack_dir.is_dir() {
            return Ok(Self { packs: RwLock::new(vec![]) });
        }
        let mut packs = vec![];
        for entry in std::fs::read_dir(&pack_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pack") {
                continue;
            }
            let idx_path = path.with_extension("idx");
            ensure!(idx_path.exists(), "packfile `{}` is missing a corresponding index", path.display());
            packs.push(Pack::open(path, idx_path)?);
        }
        Ok(Self { packs: RwLock::new(packs) })
    }

    fn contains(&self, oid: Oid) -> bool {
        self.packs.read().iter().any(|pack| pack.contains(oid))
    }

    fn read_obj(&self, oid: Oid) -> BitResult<(BitObjType, Vec<u8>)> {
        for pack in self.packs.read().iter() {
            if pack.contains(oid) {
                return pack.read_obj(oid);
            }
        }
        Err(BitError::ObjectNotFound(BitId::Full(oid)).into())
    }

    /// Probes every pack in parallel (spec §4.5 supplement: `rayon` may fan
    /// out existence/prefix queries across packs, never single-answer
    /// reads).
    fn prefix_candidates(&self, prefix: &str) -> Vec<Oid> {
        let packs = self.packs.read();
        packs
            .par_iter()
            .flat_map(|pack| {
                pack.index().entries().par_iter().filter_map(|entry| {
                    entry.oid.hex().starts_with(prefix).then_some(entry.oid)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;
    use tempfile::tempdir;

    use super::*;
    use crate::obj::Blob;

    fn blob(bytes: &[u8]) -> BitObjKind {
        BitObjKind::Blob(Blob::new(bytes.to_vec()))
    }

    /// Loose objects round-trip through a full zlib deflate (on `put`) and
    /// inflate (on `get`) for any byte content (spec §8 "for all
    /// loose-encoded b: inflate(deflate(b)) == b").
    #[quickcheck]
    fn loose_write_then_read_round_trips_arbitrary_bytes(bytes: Vec<u8>) -> bool {
        let dir = tempdir().unwrap();
        let odb = ObjectStore::open(dir.path()).unwrap();
        let obj = blob(&bytes);
        let oid = odb.put(&obj).unwrap();
        odb.get(oid).unwrap() == obj
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let odb = ObjectStore::open(dir.path()).unwrap();
        let obj = blob(b"hello odb");
        let oid = odb.put(&obj).unwrap();
        assert!(odb.has(oid).unwrap());
        assert_eq!(odb.get(oid).unwrap(), obj);
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempdir().unwrap();
        let odb = ObjectStore::open(dir.path()).unwrap();
        let obj = blob(b"same content");
        let first = odb.put(&obj).unwrap();
        let second = odb.put(&obj).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempdir().unwrap();
        let odb = ObjectStore::open(dir.path()).unwrap();
        let err = odb.get(Oid::UNKNOWN).unwrap_err();
        assert!(err.is_not_found_err());
    }

    #[test]
    fn partial_prefix_resolves_uniquely() {
        let dir = tempdir().unwrap();
        let odb = ObjectStore::open(dir.path()).unwrap();
        let oid = odb.put(&blob(b"unique content for prefix test")).unwrap();
        let partial = PartialOid::from_str(&oid.hex()[..8]).unwrap();
        assert_eq!(odb.get(BitId::Partial(partial)).unwrap(), blob(b"unique content for prefix test"));
    }
}

//! On-disk ref backend (spec §4.6). Grounded on the teacher crate's
//! `BitRefDb`/`BitRefDbBackend` in `refs/refdb.rs`: the same per-ref
//! lockfile primitive is used for both loose refs and `packed-refs`, with
//! `delete` and packed-refs read/write filled in (the teacher leaves
//! `delete`/`read_reflog` as `todo!()`).

use std::collections::BTreeMap;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::{BitError, BitResult};
use crate::hash::Oid;
use crate::lockfile::{Lockfile, LockfileFlags};
use crate::serialize::{Deserialize, Serialize};

use super::{is_valid_name, BitRef, SymbolicRef};

/// Default cap on symbolic-ref chain length before a resolution is
/// considered circular (mirrors `refs.max_depth`'s config default).
const DEFAULT_MAX_DEPTH: u32 = 100;

pub struct FileRefStore {
    git_dir: PathBuf,
}

impl FileRefStore {
    pub fn open(git_dir: impl Into<PathBuf>) -> Self {
        Self { git_dir: git_dir.into() }
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    fn packed_refs_path(&self) -> PathBuf {
        self.git_dir.join("packed-refs")
    }

    /// The literal contents of `name`'s own file, without following a
    /// symbolic chain; falls back to `packed-refs` for names absent as a
    /// loose ref. `Ok(None)` means the ref does not exist anywhere.
    fn read_raw(&self, name: &str) -> BitResult<Option<BitRef>> {
        let path = self.ref_path(name);
        if path.is_file() {
            return Ok(Some(BitRef::deserialize_unbuffered(std::fs::File::open(path)?)?));
        }
        let packed = PackedRefs::load(&self.packed_refs_path())?;
        Ok(packed.0.get(name).copied().map(BitRef::Direct))
    }

    /// Reads `name`'s literal contents without following a symbolic chain
    /// (spec §4.6: `HEAD` is attached/detached depending on which variant
    /// this returns).
    pub fn read(&self, name: &str) -> BitResult<BitRef> {
        self.read_raw(name)?.ok_or_else(|| BitError::RefNotFound(name.to_owned()).into())
    }

    /// Follows `name`'s symbolic chain down to the name of the ref that
    /// actually stores a direct id (creating nothing) — this is either a
    /// non-symbolic ref, or a symbolic ref whose target doesn't exist yet
    /// (an unborn branch).
    fn follow_symbolic(&self, name: &str) -> BitResult<String> {
        let mut current = name.to_owned();
        let mut depth = 0;
        let mut visited = std::collections::HashSet::new();
        loop {
            if !visited.insert(current.clone()) {
                return Err(BitError::CircularRef(name.to_owned()).into());
            }
            depth += 1;
            if depth > DEFAULT_MAX_DEPTH {
                return Err(BitError::MaxDepthExceeded(DEFAULT_MAX_DEPTH).into());
            }
            match self.read_raw(&current)? {
                None | Some(BitRef::Direct(..)) => return Ok(current),
                Some(BitRef::Symbolic(sym)) => current = sym.name().to_owned(),
            }
        }
    }

    /// Fully resolves `name` to a direct object id, returning `None` for an
    /// unborn branch rather than an error (used for `HEAD` before the first
    /// commit).
    pub fn resolve(&self, name: &str) -> BitResult<Option<Oid>> {
        let terminal = self.follow_symbolic(name)?;
        Ok(match self.read_raw(&terminal)? {
            Some(BitRef::Direct(oid)) => Some(oid),
            _ => None,
        })
    }

    /// As [`resolve`], but a missing ref is an error rather than `None` —
    /// appropriate for any ref other than `HEAD` on an empty repository.
    pub fn get(&self, name: &str) -> BitResult<Oid> {
        self.resolve(name)?.ok_or_else(|| BitError::RefNotFound(name.to_owned()).into())
    }

    /// Writes through any symbolic chain to the terminal storage location,
    /// with an optional compare-and-swap against the chain's current value.
    pub fn set(&self, name: &str, oid: Oid, expected_prior: Option<Oid>) -> BitResult<()> {
        let terminal = self.follow_symbolic(name)?;
        validate_storable(&terminal)?;
        let path = self.ref_path(&terminal);
        Lockfile::with_mut(&path, LockfileFlags::empty(), |lockfile| {
            let current = match lockfile.file() {
                Some(file) => BitRef::deserialize_unbuffered(file)?.into_direct(),
                None => None,
            };
            if let Some(expected) = expected_prior {
                if current != Some(expected) {
                    return Err(BitError::StalePrior {
                        name: terminal.clone(),
                        expected: Some(expected),
                        actual: current,
                    }
                    .into());
                }
            }
            BitRef::Direct(oid).serialize(lockfile)
        })?;
        self.remove_from_packed(&terminal)
    }

    /// Writes `name`'s own file to point at `target`, without following any
    /// existing chain (how `HEAD` is attached to a branch).
    pub fn set_symbolic(&self, name: &str, target: &str) -> BitResult<()> {
        validate_storable(name)?;
        let sym = SymbolicRef::new(target)?;
        let path = self.ref_path(name);
        Lockfile::with_mut(&path, LockfileFlags::empty(), |lockfile| {
            BitRef::Symbolic(sym.clone()).serialize(lockfile)
        })
    }

    /// `Some(target name)` if `name`'s own file is symbolic, `None` if it is
    /// direct or absent.
    pub fn get_symbolic(&self, name: &str) -> BitResult<Option<String>> {
        Ok(match self.read_raw(name)? {
            Some(BitRef::Symbolic(sym)) => Some(sym.name().to_owned()),
            _ => None,
        })
    }

    pub fn delete(&self, name: &str, expected_prior: Option<Oid>) -> BitResult<()> {
        let path = self.ref_path(name);
        if path.is_file() {
            let current = self.resolve(name)?;
            if let Some(expected) = expected_prior {
                if current != Some(expected) {
                    return Err(BitError::StalePrior {
                        name: name.to_owned(),
                        expected: Some(expected),
                        actual: current,
                    }
                    .into());
                }
            }
            Lockfile::with_readonly(&path, LockfileFlags::empty(), |_| Ok(()))?;
            std::fs::remove_file(&path)?;
        }
        self.remove_from_packed(name)
    }

    fn remove_from_packed(&self, name: &str) -> BitResult<()> {
        let path = self.packed_refs_path();
        if !path.is_file() {
            return Ok(());
        }
        let mut packed = PackedRefs::load(&path)?;
        if packed.0.remove(name).is_some() {
            self.write_packed(&packed)?;
        }
        Ok(())
    }

    fn write_packed(&self, packed: &PackedRefs) -> BitResult<()> {
        Lockfile::with_mut(self.packed_refs_path(), LockfileFlags::empty(), |lockfile| {
            packed.serialize(lockfile)
        })
    }

    /// Lists every ref name (loose and packed) starting with `prefix`.
    pub fn list(&self, prefix: &str) -> BitResult<Vec<String>> {
        let mut names = std::collections::BTreeSet::new();
        let refs_dir = self.git_dir.join("refs");
        if refs_dir.is_dir() {
            self.walk_loose(&refs_dir, &mut names)?;
        }
        if self.ref_path("HEAD").is_file() {
            names.insert("HEAD".to_owned());
        }
        for name in PackedRefs::load(&self.packed_refs_path())?.0.into_keys() {
            names.insert(name);
        }
        Ok(names.into_iter().filter(|name| name.starts_with(prefix)).collect())
    }

    fn walk_loose(&self, dir: &Path, names: &mut std::collections::BTreeSet<String>) -> BitResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk_loose(&path, names)?;
            } else if let Ok(relative) = path.strip_prefix(&self.git_dir) {
                if let Some(name) = relative.to_str() {
                    names.insert(name.replace(std::path::MAIN_SEPARATOR, "/"));
                }
            }
        }
        Ok(())
    }
}

fn validate_storable(name: &str) -> BitResult<()> {
    if name == "HEAD" || is_valid_name(name) {
        Ok(())
    } else {
        Err(BitError::InvalidRefName(name.to_owned()).into())
    }
}

/// `packed-refs` file contents: `<40-hex> <refname>` lines, sorted.
#[derive(Debug, Default, Clone)]
struct PackedRefs(BTreeMap<String, Oid>);

impl PackedRefs {
    fn load(path: &Path) -> BitResult<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        Self::deserialize_unbuffered(std::fs::File::open(path)?)
    }
}

impl Serialize for PackedRefs {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        writeln!(writer, "# pack-refs with: peeled fully-peeled sorted")?;
        for (name, oid) in &self.0 {
            writeln!(writer, "{} {}", oid.hex(), name)?;
        }
        Ok(())
    }
}

impl Deserialize for PackedRefs {
    fn deserialize(reader: &mut impl BufRead) -> BitResult<Self> {
        let mut map = BTreeMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let (hex, name) = line
                .split_once(' ')
                .ok_or_else(|| anyhow!("malformed packed-refs line `{}`", line))?;
            map.insert(name.to_owned(), hex.parse()?);
        }
        Ok(Self(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, FileRefStore) {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        std::fs::write(dir.path().join("HEAD"), b"ref: refs/heads/master\n").unwrap();
        let store = FileRefStore::open(dir.path());
        (dir, store)
    }

    #[test]
    fn unborn_head_resolves_to_none() {
        let (_dir, store) = store();
        assert_eq!(store.resolve("HEAD").unwrap(), None);
        assert!(store.read("HEAD").unwrap().is_symbolic());
    }

    #[test]
    fn set_through_attached_head_updates_branch() {
        let (_dir, store) = store();
        let oid = crate::hash::sha1(b"first commit");
        store.set("HEAD", oid, None).unwrap();
        assert_eq!(store.resolve("HEAD").unwrap(), Some(oid));
        assert_eq!(store.get("refs/heads/master").unwrap(), oid);
    }

    #[test]
    fn cas_rejects_stale_prior() {
        let (_dir, store) = store();
        let oid1 = crate::hash::sha1(b"one");
        let oid2 = crate::hash::sha1(b"two");
        store.set("refs/heads/master", oid1, None).unwrap();
        let err = store.set("refs/heads/master", oid2, Some(oid2)).unwrap_err();
        assert!(err.downcast_ref::<BitError>().unwrap().is_retriable());
        assert_eq!(store.get("refs/heads/master").unwrap(), oid1);
    }

    #[test]
    fn detaching_head_writes_direct_ref() {
        let (_dir, store) = store();
        let oid = crate::hash::sha1(b"detached");
        store.set("refs/heads/master", oid, None).unwrap();
        store.set_symbolic("HEAD", "refs/heads/master").unwrap();
        std::fs::write(store.ref_path("HEAD"), format!("{}\n", oid.hex())).unwrap();
        assert!(store.read("HEAD").unwrap().is_direct());
        assert_eq!(store.resolve("HEAD").unwrap(), Some(oid));
    }

    #[test]
    fn delete_removes_loose_ref() {
        let (_dir, store) = store();
        let oid = crate::hash::sha1(b"to delete");
        store.set("refs/heads/feature", oid, None).unwrap();
        store.delete("refs/heads/feature", Some(oid)).unwrap();
        assert!(store.resolve("refs/heads/feature").unwrap().is_none());
    }

    #[test]
    fn list_finds_loose_refs_by_prefix() {
        let (_dir, store) = store();
        let oid = crate::hash::sha1(b"x");
        store.set("refs/heads/master", oid, None).unwrap();
        store.set("refs/heads/feature", oid, None).unwrap();
        store.set("refs/tags/v1", oid, None).unwrap();
        let heads = store.list("refs/heads/").unwrap();
        assert_eq!(heads, vec!["refs/heads/feature", "refs/heads/master"]);
    }

    #[test]
    fn circular_symbolic_chain_is_rejected() {
        let (_dir, store) = store();
        store.set_symbolic("refs/heads/a", "refs/heads/b").unwrap();
        store.set_symbolic("refs/heads/b", "refs/heads/a").unwrap();
        assert!(store.resolve("refs/heads/a").is_err());
    }
}

//! Persisted merge-in-progress state (spec §3 "Merge state": `{ours, theirs,
//! base, message, unresolved, resolved, options}`, created on a conflicted
//! merge, mutated during resolution, destroyed on commit/abort). Grounded on
//! the ref layer's own lockfile-backed text-file persistence
//! ([`crate::refs::store::PackedRefs`]), applied to a dedicated
//! `MERGE_STATE` file; `MERGE_HEAD`/`MERGE_MSG` are written alongside in
//! git's own format so external tooling inspecting the repository sees a
//! familiar conflicted-merge marker, even though this crate has no index and
//! so reads them back from `MERGE_STATE` rather than re-deriving from them.

use std::collections::{BTreeMap, BTreeSet};
use std::io::prelude::*;
use std::path::PathBuf;

use crate::error::{BitError, BitResult};
use crate::hash::Oid;
use crate::lockfile::{Lockfile, LockfileFlags};
use crate::obj::FileMode;
use crate::repo::Repo;
use crate::serialize::{Deserialize, Serialize};

/// One side of a conflicted path: absent entirely if that side deleted (or
/// never had) the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictSide {
    pub mode: FileMode,
    pub oid: Oid,
}

/// A still-unresolved path, with each side's view reconstructed from the
/// merge's base/ours/theirs trees at the moment it's reported (spec §4.8's
/// per-path outcome table, the rows that land on "conflict").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub base: Option<ConflictSide>,
    pub ours: Option<ConflictSide>,
    pub theirs: Option<ConflictSide>,
}

/// `resolve(path, strategy)`'s chosen side (spec §4.8 Conflict resolution
/// API).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictStrategy {
    Ours,
    Theirs,
    Base,
    Custom(Vec<u8>, FileMode),
}

/// The merge in progress. `entries` accumulates the clean result tree as
/// conflicts resolve; `unresolved` shrinks to empty before
/// [`super::continue_merge`] will proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeState {
    pub ours: Oid,
    pub theirs: Oid,
    pub base: Option<Oid>,
    pub message: String,
    pub entries: BTreeMap<String, (FileMode, Oid)>,
    pub unresolved: BTreeSet<String>,
}

impl MergeState {
    fn state_path(repo: &Repo) -> PathBuf {
        repo.git_dir.join("MERGE_STATE")
    }

    fn head_path(repo: &Repo) -> PathBuf {
        repo.git_dir.join("MERGE_HEAD")
    }

    fn msg_path(repo: &Repo) -> PathBuf {
        repo.git_dir.join("MERGE_MSG")
    }

    pub fn exists(repo: &Repo) -> bool {
        Self::state_path(repo).is_file()
    }

    pub fn load(repo: &Repo) -> BitResult<Self> {
        if !Self::exists(repo) {
            return Err(BitError::MergeNotInProgress.into());
        }
        Self::deserialize_unbuffered(std::fs::File::open(Self::state_path(repo))?)
    }

    pub fn write(&self, repo: &Repo) -> BitResult<()> {
        Lockfile::with_mut(Self::state_path(repo), LockfileFlags::empty(), |lockfile| {
            self.serialize(lockfile)
        })?;
        Lockfile::with_mut(Self::head_path(repo), LockfileFlags::empty(), |lockfile| {
            writeln!(lockfile, "{}", self.theirs.hex())?;
            Ok(())
        })?;
        Lockfile::with_mut(Self::msg_path(repo), LockfileFlags::empty(), |lockfile| {
            lockfile.write_all(self.message.as_bytes())?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn clear(repo: &Repo) -> BitResult<()> {
        for path in [Self::state_path(repo), Self::head_path(repo), Self::msg_path(repo)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// One line per field/entry; `message` is restricted to a single line here
/// (the full message lives in `MERGE_MSG`, which has no such restriction —
/// this file only needs enough to reconstruct `entries`/`unresolved` and the
/// merge parents on reload).
impl Serialize for MergeState {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        writeln!(writer, "ours {}", self.ours.hex())?;
        writeln!(writer, "theirs {}", self.theirs.hex())?;
        match self.base {
            Some(oid) => writeln!(writer, "base {}", oid.hex())?,
            None => writeln!(writer, "base -")?,
        }
        writeln!(writer, "message {}", self.message.replace('\n', "\x01"))?;
        for (path, (mode, oid)) in &self.entries {
            writeln!(writer, "entry {:o} {} {}", mode.0, oid.hex(), path)?;
        }
        for path in &self.unresolved {
            writeln!(writer, "unresolved {}", path)?;
        }
        Ok(())
    }
}

impl Deserialize for MergeState {
    fn deserialize(reader: &mut impl BufRead) -> BitResult<Self> {
        let mut ours = None;
        let mut theirs = None;
        let mut base = None;
        let mut message = String::new();
        let mut entries = BTreeMap::new();
        let mut unresolved = BTreeSet::new();

        for line in reader.lines() {
            let line = line?;
            let (tag, rest) = line.split_once(' ').ok_or_else(|| anyhow!("malformed MERGE_STATE line `{}`", line))?;
            match tag {
                "ours" => ours = Some(rest.parse()?),
                "theirs" => theirs = Some(rest.parse()?),
                "base" => base = if rest == "-" { None } else { Some(rest.parse()?) },
                "message" => message = rest.replace('\x01', "\n"),
                "entry" => {
                    let (mode, rest) = rest
                        .split_once(' ')
                        .ok_or_else(|| anyhow!("malformed MERGE_STATE entry line `{}`", line))?;
                    let (oid, path) = rest
                        .split_once(' ')
                        .ok_or_else(|| anyhow!("malformed MERGE_STATE entry line `{}`", line))?;
                    let mode = FileMode(u32::from_str_radix(mode, 8)?);
                    entries.insert(path.to_owned(), (mode, oid.parse()?));
                }
                "unresolved" => {
                    unresolved.insert(rest.to_owned());
                }
                other => bail!("unknown MERGE_STATE field `{}`", other),
            }
        }

        Ok(Self {
            ours: ours.ok_or_else(|| anyhow!("MERGE_STATE missing `ours`"))?,
            theirs: theirs.ok_or_else(|| anyhow!("MERGE_STATE missing `theirs`"))?,
            base,
            message,
            entries,
            unresolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;

    #[test]
    fn state_round_trips_through_write_and_load() {
        let t = TestRepo::init();
        let blob = t.blob(b"content");
        let mut entries = BTreeMap::new();
        entries.insert("a.txt".to_owned(), (FileMode::REG, blob));
        let mut unresolved = BTreeSet::new();
        unresolved.insert("b.txt".to_owned());

        let state = MergeState {
            ours: crate::hash::sha1(b"ours"),
            theirs: crate::hash::sha1(b"theirs"),
            base: Some(crate::hash::sha1(b"base")),
            message: "Merge branch 'feature'\n\nwith a blank line".to_owned(),
            entries,
            unresolved,
        };
        state.write(&t.repo).unwrap();

        assert!(MergeState::exists(&t.repo));
        let loaded = MergeState::load(&t.repo).unwrap();
        assert_eq!(loaded, state);
        assert!(t.repo.git_dir.join("MERGE_HEAD").is_file());
        assert!(t.repo.git_dir.join("MERGE_MSG").is_file());

        MergeState::clear(&t.repo).unwrap();
        assert!(!MergeState::exists(&t.repo));
        assert!(MergeState::load(&t.repo).is_err());
    }

    #[test]
    fn unborn_base_round_trips_as_none() {
        let t = TestRepo::init();
        let state = MergeState {
            ours: crate::hash::sha1(b"ours"),
            theirs: crate::hash::sha1(b"theirs"),
            base: None,
            message: "Merge unrelated histories".to_owned(),
            entries: BTreeMap::new(),
            unresolved: BTreeSet::new(),
        };
        state.write(&t.repo).unwrap();
        assert_eq!(MergeState::load(&t.repo).unwrap().base, None);
    }
}

//! Shared test fixtures for `history`/`merge`/`wire` unit tests — a
//! throwaway on-disk repository plus small helpers for building blobs,
//! trees and commits without repeating the boilerplate in every module's
//! `#[cfg(test)] mod tests`. Mirrors the shape of the teacher crate's own
//! `test_utils.rs`, minus its arena/thread-local `BitRepo::with_test_repo`
//! machinery — this crate's `Repo` is an ordinary owned value.

use std::collections::BTreeSet;

use tempfile::TempDir;

use crate::hash::Oid;
use crate::obj::{BitObjKind, Blob, Commit, FileMode, Tree, TreeEntry};
use crate::repo::Repo;
use crate::signature::{BitEpochTime, BitSignature, BitTime, BitTimeZoneOffset};

pub struct TestRepo {
    pub repo: Repo,
    // kept alive for the lifetime of the fixture; the repo lives under here.
    _dir: TempDir,
}

impl TestRepo {
    pub fn init() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(dir.path(), false).unwrap();
        Self { repo, _dir: dir }
    }

    pub fn blob(&self, content: &[u8]) -> Oid {
        self.repo.write_obj(&BitObjKind::Blob(Blob::new(content.to_vec()))).unwrap()
    }

    pub fn tree(&self, entries: impl IntoIterator<Item = (FileMode, &'static str, Oid)>) -> Oid {
        let mut tree = Tree::default();
        for (mode, name, oid) in entries {
            tree.entries.insert(TreeEntry::new(mode, name, oid).unwrap());
        }
        self.repo.write_obj(&BitObjKind::Tree(tree)).unwrap()
    }

    pub fn tree_entries(&self, oid: Oid) -> BTreeSet<TreeEntry> {
        self.repo.read_obj(oid).unwrap().into_tree().unwrap().entries
    }

    fn sig(&self, time: i64) -> BitSignature {
        BitSignature {
            name: "Test User".to_owned(),
            email: "test@example.com".to_owned(),
            time: BitTime { time: BitEpochTime(time), offset: BitTimeZoneOffset(0) },
        }
    }

    /// A commit over the empty tree — enough for walk/merge-base tests
    /// that only care about the commit graph's shape.
    pub fn commit_on_top(&self, parents: &[Oid], message: &str, time: i64) -> Oid {
        let empty_tree = self.tree(std::iter::empty());
        self.commit_with_tree(empty_tree, parents, message, time)
    }

    pub fn commit_with_tree(&self, tree: Oid, parents: &[Oid], message: &str, time: i64) -> Oid {
        let commit = Commit {
            tree,
            parents: parents.to_vec(),
            author: self.sig(time),
            committer: self.sig(time),
            extra_headers: Default::default(),
            gpgsig: None,
            message: message.to_owned(),
        };
        self.repo.write_obj(&BitObjKind::Commit(commit)).unwrap()
    }
}

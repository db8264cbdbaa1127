//! Tree builder (spec §4.7): groups a flat set of `{path, mode, id}` entries
//! into directories and recursively emits subtree objects. Grounded on the
//! teacher crate's index `write_tree` path, minus the index itself — this
//! crate has no staging area, so the builder takes entries directly.
//! Deduping identical subtrees by id falls out of the object store's own
//! idempotent `put` ([`crate::odb::ObjectStore::put`]) rather than needing
//! its own cache.

use std::collections::BTreeMap;

use crate::error::BitResult;
use crate::hash::Oid;
use crate::obj::{BitObjKind, FileMode, Tree, TreeEntry};
use crate::repo::Repo;

enum Node {
    Leaf(FileMode, Oid),
    Dir(BTreeMap<String, Node>),
}

/// Builds (and writes) the tree object for `entries`, a flat set of full
/// paths with their blob/gitlink mode and id; intermediate directories are
/// synthesized and written bottom-up. Returns the root tree's id (the empty
/// tree's id if `entries` is empty).
pub fn build_tree(repo: &Repo, entries: impl IntoIterator<Item = (String, FileMode, Oid)>) -> BitResult<Oid> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    for (path, mode, oid) in entries {
        insert(&mut root, &path, mode, oid)?;
    }
    write_dir(repo, &root)
}

fn insert(dir: &mut BTreeMap<String, Node>, path: &str, mode: FileMode, oid: Oid) -> BitResult<()> {
    match path.split_once('/') {
        None => {
            dir.insert(path.to_owned(), Node::Leaf(mode, oid));
            Ok(())
        }
        Some((first, rest)) => {
            let entry = dir.entry(first.to_owned()).or_insert_with(|| Node::Dir(BTreeMap::new()));
            match entry {
                Node::Dir(sub) => insert(sub, rest, mode, oid),
                Node::Leaf(..) => bail!("`{}` is both a file and a directory", first),
            }
        }
    }
}

fn write_dir(repo: &Repo, dir: &BTreeMap<String, Node>) -> BitResult<Oid> {
    let mut tree = Tree::default();
    for (name, node) in dir {
        let (mode, oid) = match node {
            Node::Leaf(mode, oid) => (*mode, *oid),
            Node::Dir(sub) => (FileMode::DIR, write_dir(repo, sub)?),
        };
        tree.entries.insert(TreeEntry::new(mode, name.clone(), oid)?);
    }
    repo.write_obj(&BitObjKind::Tree(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;

    #[test]
    fn flat_entries_build_a_single_level_tree() {
        let t = TestRepo::init();
        let a = t.blob(b"a");
        let b = t.blob(b"b");
        let root = build_tree(&t.repo, [("a.txt".to_owned(), FileMode::REG, a), ("b.txt".to_owned(), FileMode::REG, b)]).unwrap();
        let entries = t.tree_entries(root);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn nested_paths_synthesize_intermediate_directories() {
        let t = TestRepo::init();
        let leaf = t.blob(b"nested");
        let root = build_tree(&t.repo, [("dir/sub/file.txt".to_owned(), FileMode::REG, leaf)]).unwrap();

        let top = t.tree_entries(root);
        assert_eq!(top.len(), 1);
        let dir_entry = top.iter().next().unwrap();
        assert_eq!(dir_entry.mode, FileMode::DIR);

        let sub = t.tree_entries(dir_entry.oid);
        assert_eq!(sub.len(), 1);
        let sub_entry = sub.iter().next().unwrap();
        assert_eq!(sub_entry.mode, FileMode::DIR);

        let files = t.tree_entries(sub_entry.oid);
        assert_eq!(files.len(), 1);
        assert_eq!(files.iter().next().unwrap().oid, leaf);
    }

    #[test]
    fn empty_entries_build_the_empty_tree() {
        let t = TestRepo::init();
        let root = build_tree(&t.repo, std::iter::empty()).unwrap();
        assert_eq!(root, crate::hash::EMPTY_TREE);
    }

    #[test]
    fn identical_subtrees_dedup_to_the_same_id() {
        let t = TestRepo::init();
        let shared = t.blob(b"shared content");
        let root = build_tree(&t.repo, [
            ("a/file.txt".to_owned(), FileMode::REG, shared),
            ("b/file.txt".to_owned(), FileMode::REG, shared),
        ])
        .unwrap();
        let top = t.tree_entries(root);
        let mut ids: Vec<Oid> = top.iter().map(|e| e.oid).collect();
        ids.sort();
        assert_eq!(ids[0], ids[1]);
    }
}

//! Tree diff (spec §4.6 contract, §4.7). Grounded on the teacher crate's
//! `diff/tree_diff.rs` dual-iterator driver (`TreeDiffDriver`/`TreeDiffer`),
//! adapted to walk [`Tree`] objects directly to full paths rather than
//! driving two `BitTreeIterator`s over the index/workspace — this crate has
//! no index layer, so both sides of the diff are flattened trees.

use std::collections::BTreeMap;

use crate::error::BitResult;
use crate::hash::Oid;
use crate::obj::FileMode;
use crate::repo::Repo;

/// Similarity floor (percent) above which a delete/add pair is reported as
/// a rename or copy rather than independent delete+add (spec §4.7, default
/// 50%).
pub const RENAME_SIMILARITY_THRESHOLD: u8 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffStatus {
    Added,
    Deleted,
    Modified,
    TypeChanged,
    Renamed { from: String, similarity: u8 },
    Copied { from: String, similarity: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDiffEntry {
    pub path: String,
    pub status: DiffStatus,
    pub mode: FileMode,
    pub oid: Oid,
}

pub type Leaf = (FileMode, Oid);

/// Recursively flattens `tree_oid` into `{full path → (mode, oid)}`,
/// descending into directory entries; `None` yields an empty map (diffing
/// against an empty/unborn tree).
pub(crate) fn flatten(repo: &Repo, tree_oid: Option<Oid>, out: &mut BTreeMap<String, Leaf>) -> BitResult<()> {
    let Some(tree_oid) = tree_oid else { return Ok(()) };
    flatten_into(repo, tree_oid, "", out)
}

/// As [`flatten`], collecting straight into a fresh map — the form
/// [`crate::merge`]'s three-way dispatch wants for each side of a merge.
pub(crate) fn flatten_tree(repo: &Repo, tree_oid: Option<Oid>) -> BitResult<BTreeMap<String, Leaf>> {
    let mut out = BTreeMap::new();
    flatten(repo, tree_oid, &mut out)?;
    Ok(out)
}

fn flatten_into(
    repo: &Repo,
    tree_oid: Oid,
    prefix: &str,
    out: &mut BTreeMap<String, Leaf>,
) -> BitResult<()> {
    let tree = repo.read_obj(tree_oid)?.into_tree()?;
    for entry in &tree.entries {
        let path =
            if prefix.is_empty() { entry.name.clone() } else { format!("{}/{}", prefix, entry.name) };
        if entry.mode == FileMode::DIR {
            flatten_into(repo, entry.oid, &path, out)?;
        } else {
            out.insert(path, (entry.mode, entry.oid));
        }
    }
    Ok(())
}

/// Line-multiset overlap as a percentage of the larger side's line count — a
/// cheap similarity heuristic (spec §4.4's "shared-prefix/common-line
/// heuristic", reused here for rename/copy thresholding). Binary or non-UTF8
/// content is always dissimilar unless byte-identical.
fn blob_similarity(repo: &Repo, a: Oid, b: Oid) -> BitResult<u8> {
    if a == b {
        return Ok(100);
    }
    let a_bytes = repo.read_obj(a)?.into_blob()?.bytes;
    let b_bytes = repo.read_obj(b)?.into_blob()?.bytes;
    if crate::xdiff::is_binary(&a_bytes) || crate::xdiff::is_binary(&b_bytes) {
        return Ok(0);
    }
    let (Ok(a_str), Ok(b_str)) = (std::str::from_utf8(&a_bytes), std::str::from_utf8(&b_bytes))
    else {
        return Ok(0);
    };

    let mut a_lines: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    let mut a_count = 0u32;
    for line in a_str.split_inclusive('\n') {
        *a_lines.entry(line).or_insert(0) += 1;
        a_count += 1;
    }
    let mut b_lines: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    let mut b_count = 0u32;
    for line in b_str.split_inclusive('\n') {
        *b_lines.entry(line).or_insert(0) += 1;
        b_count += 1;
    }

    let total = a_count.max(b_count).max(1);
    let common: u32 =
        a_lines.iter().map(|(line, &n)| n.min(b_lines.get(line).copied().unwrap_or(0))).sum();
    Ok(((common * 100) / total).min(100) as u8)
}

/// Diffs `old_oid`'s tree against `new_oid`'s (either may be `None` for an
/// empty/unborn side), classifying each changed path per spec §4.7.
pub fn diff_trees(
    repo: &Repo,
    old_oid: Option<Oid>,
    new_oid: Option<Oid>,
) -> BitResult<Vec<TreeDiffEntry>> {
    let mut old_flat = BTreeMap::new();
    flatten(repo, old_oid, &mut old_flat)?;
    let mut new_flat = BTreeMap::new();
    flatten(repo, new_oid, &mut new_flat)?;

    let mut old_iter = old_flat.into_iter().peekable();
    let mut new_iter = new_flat.into_iter().peekable();

    let mut deleted: Vec<(String, Leaf)> = vec![];
    let mut added: Vec<(String, Leaf)> = vec![];
    let mut entries = vec![];

    loop {
        let ordering = match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some((op, _)), Some((np, _))) => op.cmp(np),
        };
        match ordering {
            std::cmp::Ordering::Less => deleted.push(old_iter.next().unwrap()),
            std::cmp::Ordering::Greater => added.push(new_iter.next().unwrap()),
            std::cmp::Ordering::Equal => {
                let (path, (old_mode, old_oid)) = old_iter.next().unwrap();
                let (_, (new_mode, new_oid)) = new_iter.next().unwrap();
                if old_mode == new_mode && old_oid == new_oid {
                    continue;
                }
                let status = if old_mode.infer_obj_type() != new_mode.infer_obj_type() {
                    DiffStatus::TypeChanged
                } else {
                    DiffStatus::Modified
                };
                entries.push(TreeDiffEntry { path, status, mode: new_mode, oid: new_oid });
            }
        }
    }

    let mut claimed = vec![false; deleted.len()];
    let mut added_match: Vec<Option<(usize, u8)>> = vec![None; added.len()];

    for (ai, (_, (add_mode, add_oid))) in added.iter().enumerate() {
        let mut best: Option<(usize, u8)> = None;
        for (di, (_, (del_mode, del_oid))) in deleted.iter().enumerate() {
            if del_mode.infer_obj_type() != add_mode.infer_obj_type() {
                continue;
            }
            let similarity = blob_similarity(repo, *del_oid, *add_oid)?;
            if similarity >= RENAME_SIMILARITY_THRESHOLD
                && best.map_or(true, |(_, best_sim)| similarity > best_sim)
            {
                best = Some((di, similarity));
            }
        }
        added_match[ai] = best;
    }

    for (ai, (path, (mode, oid))) in added.into_iter().enumerate() {
        match added_match[ai] {
            Some((di, similarity)) => {
                let is_copy = claimed[di];
                claimed[di] = true;
                let from = deleted[di].0.clone();
                let status =
                    if is_copy { DiffStatus::Copied { from, similarity } } else { DiffStatus::Renamed { from, similarity } };
                entries.push(TreeDiffEntry { path, status, mode, oid });
            }
            None => entries.push(TreeDiffEntry { path, status: DiffStatus::Added, mode, oid }),
        }
    }

    for (di, (path, (mode, oid))) in deleted.into_iter().enumerate() {
        if !claimed[di] {
            entries.push(TreeDiffEntry { path, status: DiffStatus::Deleted, mode, oid });
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::FileMode;
    use crate::test_utils::TestRepo;

    #[test]
    fn added_and_deleted_paths_are_classified() {
        let t = TestRepo::init();
        let a = t.blob(b"a contents");
        let old_tree = t.tree([(FileMode::REG, "a.txt", a)]);
        let b = t.blob(b"b contents");
        let new_tree = t.tree([(FileMode::REG, "b.txt", b)]);

        let diff = diff_trees(&t.repo, Some(old_tree), Some(new_tree)).unwrap();
        assert_eq!(diff.len(), 2);
        assert!(diff.iter().any(|e| e.path == "a.txt" && e.status == DiffStatus::Deleted));
        assert!(diff.iter().any(|e| e.path == "b.txt" && e.status == DiffStatus::Added));
    }

    #[test]
    fn modified_blob_keeps_same_path() {
        let t = TestRepo::init();
        let old_blob = t.blob(b"one\ntwo\nthree\n");
        let old_tree = t.tree([(FileMode::REG, "f.txt", old_blob)]);
        let new_blob = t.blob(b"one\nTWO\nthree\n");
        let new_tree = t.tree([(FileMode::REG, "f.txt", new_blob)]);

        let diff = diff_trees(&t.repo, Some(old_tree), Some(new_tree)).unwrap();
        assert_eq!(diff, vec![TreeDiffEntry {
            path: "f.txt".to_owned(),
            status: DiffStatus::Modified,
            mode: FileMode::REG,
            oid: new_blob,
        }]);
    }

    #[test]
    fn identical_content_is_detected_as_rename() {
        let t = TestRepo::init();
        let content = t.blob(b"identical content\nacross renamed file\n");
        let old_tree = t.tree([(FileMode::REG, "old_name.txt", content)]);
        let new_tree = t.tree([(FileMode::REG, "new_name.txt", content)]);

        let diff = diff_trees(&t.repo, Some(old_tree), Some(new_tree)).unwrap();
        assert_eq!(diff.len(), 1);
        match &diff[0].status {
            DiffStatus::Renamed { from, similarity } => {
                assert_eq!(from, "old_name.txt");
                assert_eq!(*similarity, 100);
            }
            other => panic!("expected Renamed, got {:?}", other),
        }
    }

    #[test]
    fn unrelated_unchanged_files_produce_no_entries() {
        let t = TestRepo::init();
        let blob = t.blob(b"same everywhere");
        let tree = t.tree([(FileMode::REG, "f.txt", blob)]);
        let diff = diff_trees(&t.repo, Some(tree), Some(tree)).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn file_to_directory_is_a_type_change() {
        let t = TestRepo::init();
        let blob = t.blob(b"was a file");
        let old_tree = t.tree([(FileMode::REG, "thing", blob)]);
        let inner = t.blob(b"now a directory's content");
        let sub = t.tree([(FileMode::REG, "inner.txt", inner)]);
        let new_tree = t.tree([(FileMode::DIR, "thing", sub)]);

        let diff = diff_trees(&t.repo, Some(old_tree), Some(new_tree)).unwrap();
        assert!(diff.iter().any(|e| e.path == "thing/inner.txt" && e.status == DiffStatus::Added));
    }
}

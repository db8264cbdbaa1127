//! Merge-base (spec §4.7): colored BFS over parents, generalized to N
//! parents (octopus) by pairwise reduction. Grounded on the teacher crate's
//! `rev/revwalk.rs`/`find_merge_base` shape — a max-heap frontier keyed by
//! commit time, generalized here to carry a two-bit "reached from" color
//! instead of the teacher's single-parent walk.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::BitResult;
use crate::hash::Oid;
use crate::repo::Repo;
use crate::signature::BitEpochTime;

const FROM_A: u8 = 0b01;
const FROM_B: u8 = 0b10;
const FROM_BOTH: u8 = FROM_A | FROM_B;

struct HeapEntry {
    time: BitEpochTime,
    index: usize,
    oid: Oid,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then_with(|| self.index.cmp(&other.index))
    }
}

/// Best common ancestor of `oids`. For two commits, paints ancestors with a
/// two-bit color as they're discovered, most-recent-first; the first commit
/// painted by both colors is returned. For more than two, reduces pairwise
/// (spec §4.7 "For N parents (octopus), reduce pairwise").
pub fn merge_base(repo: &Repo, oids: &[Oid]) -> BitResult<Option<Oid>> {
    match oids {
        [] => Ok(None),
        [single] => Ok(Some(*single)),
        [first, rest @ ..] => {
            let mut acc = Some(*first);
            for &next in rest {
                acc = match acc {
                    Some(base) => merge_base_two(repo, base, next)?,
                    None => return Ok(None),
                };
            }
            Ok(acc)
        }
    }
}

fn merge_base_two(repo: &Repo, a: Oid, b: Oid) -> BitResult<Option<Oid>> {
    if a == b {
        return Ok(Some(a));
    }

    let mut colors: HashMap<Oid, u8> = HashMap::new();
    let mut stale: HashSet<Oid> = HashSet::new();
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let mut index = 0;

    for (oid, color) in [(a, FROM_A), (b, FROM_B)] {
        colors.insert(oid, color);
        let commit = repo.read_obj(oid)?.into_commit()?;
        heap.push(HeapEntry { time: commit.committer.time.time, index, oid });
        index += 1;
    }

    let mut result = None;

    while let Some(entry) = heap.pop() {
        let oid = entry.oid;
        let color = *colors.get(&oid).expect("every queued oid has a color");

        if color == FROM_BOTH && !stale.contains(&oid) {
            stale.insert(oid);
            if result.is_none() {
                result = Some(oid);
            }
        }

        let commit = repo.read_obj(oid)?.into_commit()?;
        for parent in commit.parents {
            let existing = colors.get(&parent).copied().unwrap_or(0);
            let merged = existing | color;
            if merged != existing {
                colors.insert(parent, merged);
                let parent_commit = repo.read_obj(parent)?.into_commit()?;
                heap.push(HeapEntry { time: parent_commit.committer.time.time, index, oid: parent });
                index += 1;
            }
            if stale.contains(&oid) && merged == FROM_BOTH {
                stale.insert(parent);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;

    #[test]
    fn linear_ancestor_is_its_own_merge_base() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        let c2 = t.commit_on_top(&[c1], "two", 200);
        assert_eq!(merge_base(&t.repo, &[c1, c2]).unwrap(), Some(c1));
    }

    #[test]
    fn diamond_history_finds_common_base() {
        let t = TestRepo::init();
        let base = t.commit_on_top(&[], "base", 100);
        let a = t.commit_on_top(&[base], "a", 200);
        let b = t.commit_on_top(&[base], "b", 200);
        assert_eq!(merge_base(&t.repo, &[a, b]).unwrap(), Some(base));
    }

    #[test]
    fn unrelated_histories_have_no_merge_base() {
        let t = TestRepo::init();
        let a = t.commit_on_top(&[], "a", 100);
        let b = t.commit_on_top(&[], "b", 100);
        assert_eq!(merge_base(&t.repo, &[a, b]).unwrap(), None);
    }

    #[test]
    fn octopus_reduces_pairwise_across_three_parents() {
        let t = TestRepo::init();
        let base = t.commit_on_top(&[], "base", 100);
        let a = t.commit_on_top(&[base], "a", 200);
        let b = t.commit_on_top(&[base], "b", 200);
        let c = t.commit_on_top(&[base], "c", 200);
        assert_eq!(merge_base(&t.repo, &[a, b, c]).unwrap(), Some(base));
    }
}

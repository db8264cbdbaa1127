//! Commit walk (spec §4.7). Grounded on the teacher crate's
//! `rev/revwalk.rs`: a `BinaryHeap` of not-yet-emitted commits ordered by
//! commit time, with a `SEEN`-style dedup set, walked via
//! [`fallible_iterator::FallibleIterator`]. Generalized from the teacher's
//! single `parent: Option<Oid>` field to `parents: Vec<Oid>`, and extended
//! with topological ordering and the `A..B`/`A...B` range forms the
//! single-parent walker never needed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use fallible_iterator::FallibleIterator;

use crate::error::BitResult;
use crate::hash::Oid;
use crate::obj::Commit;
use crate::repo::Repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Strictly by commit date, most recent first; ties broken by
    /// discovery order so the walk is deterministic.
    Date,
    /// Parents always emitted after every already-walked child that
    /// reaches them (git's `--topo-order`).
    Topological,
}

pub struct WalkOpts {
    pub order: Order,
    pub max_count: Option<usize>,
    /// Oids (and their ancestors) to exclude, e.g. the left side of an
    /// `A..B` range.
    pub exclude: Vec<Oid>,
    pub filter: Option<Box<dyn Fn(&Commit) -> bool>>,
}

impl Default for WalkOpts {
    fn default() -> Self {
        Self { order: Order::Date, max_count: None, exclude: vec![], filter: None }
    }
}

struct HeapEntry {
    oid: Oid,
    commit: Commit,
    index: usize,
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

/// Max-heap by commit time, tie-broken by a monotonic discovery index so
/// equal-timestamp commits still produce a total, stable order.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.commit
            .committer
            .time
            .cmp(&other.commit.committer.time)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Walks every ancestor of `roots`, most recent first, skipping ancestors
/// of `opts.exclude`. Use [`Order::Topological`] when parents must never
/// precede a child that's also in the walk.
pub struct CommitWalk<'r> {
    repo: &'r Repo,
    opts: WalkOpts,
    seen: HashSet<Oid>,
    excluded: HashSet<Oid>,
    queue: BinaryHeap<HeapEntry>,
    index: usize,
    emitted: usize,
    /// Populated lazily on first `next()` when `opts.order` is
    /// [`Order::Topological`]; the date-ordered heap above is unused once
    /// this is set.
    topo: Option<VecDeque<(Oid, Commit)>>,
}

impl<'r> CommitWalk<'r> {
    pub fn new(repo: &'r Repo, roots: Vec<Oid>, opts: WalkOpts) -> BitResult<Self> {
        let mut walk = Self {
            repo,
            excluded: ancestors_of(repo, &opts.exclude)?,
            opts,
            seen: HashSet::new(),
            queue: BinaryHeap::new(),
            index: 0,
            emitted: 0,
            topo: None,
        };
        for oid in roots {
            walk.enqueue(oid)?;
        }
        Ok(walk)
    }

    fn enqueue(&mut self, oid: Oid) -> BitResult<()> {
        if !self.seen.insert(oid) || self.excluded.contains(&oid) {
            return Ok(());
        }
        let commit = self.repo.read_obj(oid)?.into_commit()?;
        let index = self.index;
        self.index += 1;
        self.queue.push(HeapEntry { oid, commit, index });
        Ok(())
    }

    fn passes_filter(&self, commit: &Commit) -> bool {
        self.opts.filter.as_ref().map_or(true, |f| f(commit))
    }

    fn next_date_ordered(&mut self) -> BitResult<Option<(Oid, Commit)>> {
        loop {
            let entry = match self.queue.pop() {
                Some(entry) => entry,
                None => return Ok(None),
            };
            for &parent in &entry.commit.parents {
                self.enqueue(parent)?;
            }
            if self.passes_filter(&entry.commit) {
                return Ok(Some((entry.oid, entry.commit)));
            }
        }
    }

    fn build_topo_order(&mut self) -> BitResult<()> {
        let mut nodes: HashMap<Oid, Commit> = HashMap::new();
        let mut pending_children: HashMap<Oid, u32> = HashMap::new();
        let mut frontier: Vec<Oid> = self.seen.iter().copied().collect();
        let mut visited: HashSet<Oid> = HashSet::new();

        while let Some(oid) = frontier.pop() {
            if !visited.insert(oid) || self.excluded.contains(&oid) {
                continue;
            }
            let commit = self.repo.read_obj(oid)?.into_commit()?;
            for &parent in &commit.parents {
                if self.excluded.contains(&parent) {
                    continue;
                }
                *pending_children.entry(parent).or_insert(0) += 1;
                if !visited.contains(&parent) {
                    frontier.push(parent);
                }
            }
            nodes.insert(oid, commit);
        }

        let mut ready: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut index = 0;
        for (&oid, commit) in &nodes {
            if pending_children.get(&oid).copied().unwrap_or(0) == 0 {
                ready.push(HeapEntry { oid, commit: commit.clone(), index });
                index += 1;
            }
        }

        let mut order = VecDeque::new();
        while let Some(entry) = ready.pop() {
            let commit = nodes.remove(&entry.oid).expect("node already consumed");
            for &parent in &commit.parents {
                if let Some(count) = pending_children.get_mut(&parent) {
                    *count -= 1;
                    if *count == 0 {
                        let parent_commit =
                            nodes.get(&parent).cloned().unwrap_or_else(|| commit.clone());
                        ready.push(HeapEntry { oid: parent, commit: parent_commit, index });
                        index += 1;
                    }
                }
            }
            order.push_back((entry.oid, commit));
        }
        self.topo = Some(order);
        Ok(())
    }
}

impl<'r> FallibleIterator for CommitWalk<'r> {
    type Item = (Oid, Commit);
    type Error = crate::error::BitGenericError;

    fn next(&mut self) -> BitResult<Option<Self::Item>> {
        if let Some(max) = self.opts.max_count {
            if self.emitted >= max {
                return Ok(None);
            }
        }

        let result = if self.opts.order == Order::Topological {
            if self.topo.is_none() {
                self.build_topo_order()?;
            }
            loop {
                match self.topo.as_mut().unwrap().pop_front() {
                    None => break None,
                    Some((oid, commit)) if self.passes_filter(&commit) => break Some((oid, commit)),
                    Some(_) => continue,
                }
            }
        } else {
            self.next_date_ordered()?
        };

        if result.is_some() {
            self.emitted += 1;
        }
        Ok(result)
    }
}

/// Every oid reachable from `roots` (inclusive).
pub fn ancestors_of(repo: &Repo, roots: &[Oid]) -> BitResult<HashSet<Oid>> {
    let mut seen = HashSet::new();
    let mut stack: Vec<Oid> = roots.to_vec();
    while let Some(oid) = stack.pop() {
        if !seen.insert(oid) {
            continue;
        }
        let commit = repo.read_obj(oid)?.into_commit()?;
        stack.extend(commit.parents);
    }
    Ok(seen)
}

/// `A..B`: commits reachable from `b` that are not reachable from `a`.
pub fn range_two_dot(repo: &Repo, a: Oid, b: Oid) -> BitResult<Vec<(Oid, Commit)>> {
    let opts = WalkOpts { order: Order::Date, max_count: None, exclude: vec![a], filter: None };
    CommitWalk::new(repo, vec![b], opts)?.collect()
}

/// `A...B`: the symmetric difference — reachable from exactly one of `a`,
/// `b`, excluding their common history.
pub fn range_three_dot(repo: &Repo, a: Oid, b: Oid) -> BitResult<Vec<(Oid, Commit)>> {
    let ancestors_a = ancestors_of(repo, &[a])?;
    let ancestors_b = ancestors_of(repo, &[b])?;
    let common: HashSet<Oid> = ancestors_a.intersection(&ancestors_b).copied().collect();
    let opts =
        WalkOpts { order: Order::Date, max_count: None, exclude: common.into_iter().collect(), filter: None };
    CommitWalk::new(repo, vec![a, b], opts)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;

    #[test]
    fn date_order_walk_visits_every_ancestor_most_recent_first() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        let c2 = t.commit_on_top(&[c1], "two", 200);
        let c3 = t.commit_on_top(&[c2], "three", 300);

        let opts = WalkOpts::default();
        let walked: Vec<Oid> = CommitWalk::new(&t.repo, vec![c3], opts)
            .unwrap()
            .collect()
            .unwrap()
            .into_iter()
            .map(|(oid, _)| oid)
            .collect();
        assert_eq!(walked, vec![c3, c2, c1]);
    }

    #[test]
    fn max_count_bounds_the_walk() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        let c2 = t.commit_on_top(&[c1], "two", 200);
        let opts = WalkOpts { max_count: Some(1), ..WalkOpts::default() };
        let walked = CommitWalk::new(&t.repo, vec![c2], opts).unwrap().collect::<Vec<_>>().unwrap();
        assert_eq!(walked.len(), 1);
        assert_eq!(walked[0].0, c2);
    }

    #[test]
    fn two_dot_range_excludes_left_ancestors() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        let c2 = t.commit_on_top(&[c1], "two", 200);
        let c3 = t.commit_on_top(&[c2], "three", 300);
        let oids: Vec<Oid> = range_two_dot(&t.repo, c1, c3).unwrap().into_iter().map(|(o, _)| o).collect();
        assert_eq!(oids, vec![c3, c2]);
    }

    #[test]
    fn three_dot_range_excludes_common_ancestors() {
        let t = TestRepo::init();
        let base = t.commit_on_top(&[], "base", 100);
        let a = t.commit_on_top(&[base], "a", 200);
        let b = t.commit_on_top(&[base], "b", 200);
        let mut oids: Vec<Oid> =
            range_three_dot(&t.repo, a, b).unwrap().into_iter().map(|(o, _)| o).collect();
        oids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(oids, expected);
    }

    #[test]
    fn topological_order_never_emits_a_parent_before_its_child() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        let c2 = t.commit_on_top(&[c1], "two", 50); // deliberately older than c1
        let opts = WalkOpts { order: Order::Topological, ..WalkOpts::default() };
        let walked: Vec<Oid> =
            CommitWalk::new(&t.repo, vec![c2], opts).unwrap().collect::<Vec<_>>().unwrap().into_iter().map(|(o, _)| o).collect();
        assert_eq!(walked, vec![c2, c1]);
    }
}

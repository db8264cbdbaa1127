//! L7: the merge engine (spec §4.8). Grounded on the teacher crate's
//! `merge.rs` for the overall shape — diff base against each side, dispatch
//! per path, detect/report conflicts — adapted away from its index/worktree
//! machinery (`pre_merge_checks`, `mv_our_conflicted`, virtual merge bases
//! for octopus) since this crate has neither an index nor a checkout layer;
//! three-way merge here operates directly over [`crate::obj::Tree`] content
//! and stops at two parents, matching git's own behaviour of never running
//! true content-conflict resolution for more than two sides.

pub mod state;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BitError, BitResult};
use crate::hash::Oid;
use crate::history::merge_base::merge_base;
use crate::history::tree_diff::{flatten_tree, Leaf};
use crate::history::tree_builder::build_tree;
use crate::obj::{BitObjKind, Blob, Commit, FileMode};
use crate::repo::Repo;

pub use state::{Conflict, ConflictSide, ConflictStrategy, MergeState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOpts {
    /// Overrides the default `"Merge <theirs> into <ours>"` message.
    pub message: Option<String>,
    /// Forces an explicit merge commit even when a fast-forward is possible.
    pub no_ff: bool,
}

impl Default for MergeOpts {
    fn default() -> Self {
        Self { message: None, no_ff: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// `theirs` is already an ancestor of `ours`; nothing to do.
    UpToDate,
    /// `ours` was an ancestor of `theirs`; HEAD now points at `theirs`.
    FastForward(Oid),
    /// A merge commit was written cleanly, with no conflicts.
    Merged(Oid),
    /// At least one path conflicted; see [`state::MergeState::load`] /
    /// [`conflicts`] for details, [`resolve`] to resolve them, and
    /// [`continue_merge`]/[`abort_merge`] to finish.
    Conflicted,
}

/// Merges `theirs` into the current `HEAD` (spec §4.8). Two-parent only —
/// like git, an octopus (>2-way) merge that would conflict simply isn't
/// attempted here; callers wanting N-way merges reduce pairwise themselves.
pub fn merge(repo: &Repo, theirs: Oid, opts: &MergeOpts) -> BitResult<MergeOutcome> {
    if MergeState::exists(repo) {
        bail!("a merge is already in progress; resolve it with `resolve`/`continue_merge`/`abort_merge` first");
    }

    let ours = match repo.resolve_head()? {
        Some(ours) => ours,
        None => {
            fast_forward(repo, None, theirs)?;
            return Ok(MergeOutcome::FastForward(theirs));
        }
    };
    if ours == theirs {
        return Ok(MergeOutcome::UpToDate);
    }

    let base = merge_base(repo, &[ours, theirs])?;
    let config = repo.config();

    if base == Some(theirs) {
        return Ok(MergeOutcome::UpToDate);
    }
    if base == Some(ours) && !opts.no_ff {
        if !config.allow_fast_forward()? {
            return Err(BitError::FastForwardImpossible.into());
        }
        fast_forward(repo, Some(ours), theirs)?;
        return Ok(MergeOutcome::FastForward(theirs));
    }
    if config.fast_forward_only()? && base != Some(ours) {
        return Err(BitError::FastForwardImpossible.into());
    }

    let ours_tree = repo.read_obj(ours)?.into_commit()?.tree;
    let theirs_tree = repo.read_obj(theirs)?.into_commit()?.tree;
    let base_tree = base.map(|b| repo.read_obj(b).and_then(BitObjKind::into_commit).map(|c| c.tree)).transpose()?;

    let (entries, conflicts) = merge_trees(repo, base_tree, ours_tree, theirs_tree)?;
    let message = opts
        .message
        .clone()
        .unwrap_or_else(|| format!("Merge commit '{}' into {}", theirs.short(), ours.short()));

    if conflicts.is_empty() {
        let oid = write_merge_commit(repo, ours, theirs, &entries, &message)?;
        return Ok(MergeOutcome::Merged(oid));
    }

    if let Some(strategy) = auto_resolve_strategy(repo)? {
        let mut entries = entries;
        for conflict in &conflicts {
            apply_strategy(repo, &mut entries, conflict, &strategy)?;
        }
        let oid = write_merge_commit(repo, ours, theirs, &entries, &message)?;
        return Ok(MergeOutcome::Merged(oid));
    }

    let state = MergeState {
        ours,
        theirs,
        base,
        message,
        entries,
        unresolved: conflicts.into_iter().map(|c| c.path).collect(),
    };
    state.write(repo)?;
    Ok(MergeOutcome::Conflicted)
}

fn auto_resolve_strategy(repo: &Repo) -> BitResult<Option<ConflictStrategy>> {
    let config = repo.config();
    if !config.auto_resolve()? {
        return Ok(None);
    }
    Ok(match config.conflict_strategy()?.as_deref() {
        Some("ours") => Some(ConflictStrategy::Ours),
        Some("theirs") => Some(ConflictStrategy::Theirs),
        _ => None,
    })
}

fn fast_forward(repo: &Repo, expected_prior: Option<Oid>, theirs: Oid) -> BitResult<()> {
    repo.refs.set("HEAD", theirs, expected_prior)
}

fn write_merge_commit(
    repo: &Repo,
    ours: Oid,
    theirs: Oid,
    entries: &BTreeMap<String, (FileMode, Oid)>,
    message: &str,
) -> BitResult<Oid> {
    let tree = build_tree(repo, entries.iter().map(|(path, &(mode, oid))| (path.clone(), mode, oid)))?;
    let signature = repo.user_signature()?;
    let commit = Commit {
        tree,
        parents: vec![ours, theirs],
        author: signature.clone(),
        committer: signature,
        extra_headers: Default::default(),
        gpgsig: None,
        message: message.to_owned(),
    };
    let oid = repo.write_obj(&BitObjKind::Commit(commit))?;
    repo.refs.set("HEAD", oid, Some(ours))?;
    Ok(oid)
}

/// Three-way dispatch over every path appearing in any of the three trees,
/// per spec §4.8's outcome table. `base_tree` is `None` for an unrelated
/// (no common ancestor) merge, treated as if every path were newly added.
fn merge_trees(
    repo: &Repo,
    base_tree: Option<Oid>,
    ours_tree: Oid,
    theirs_tree: Oid,
) -> BitResult<(BTreeMap<String, (FileMode, Oid)>, Vec<Conflict>)> {
    let base = flatten_tree(repo, base_tree)?;
    let ours = flatten_tree(repo, Some(ours_tree))?;
    let theirs = flatten_tree(repo, Some(theirs_tree))?;
    merge_leaves(repo, &base, &ours, &theirs)
}

fn merge_leaves(
    repo: &Repo,
    base: &BTreeMap<String, Leaf>,
    ours: &BTreeMap<String, Leaf>,
    theirs: &BTreeMap<String, Leaf>,
) -> BitResult<(BTreeMap<String, (FileMode, Oid)>, Vec<Conflict>)> {
    let mut paths: BTreeSet<&str> = BTreeSet::new();
    paths.extend(base.keys().map(String::as_str));
    paths.extend(ours.keys().map(String::as_str));
    paths.extend(theirs.keys().map(String::as_str));

    let mut entries = BTreeMap::new();
    let mut conflicts = vec![];

    for path in paths {
        let b = base.get(path).copied();
        let o = ours.get(path).copied();
        let t = theirs.get(path).copied();

        match merge_one(repo, path, b, o, t)? {
            MergeDecision::Clean(Some(leaf)) => {
                entries.insert(path.to_owned(), leaf);
            }
            MergeDecision::Clean(None) => {}
            MergeDecision::Conflict => conflicts.push(Conflict {
                path: path.to_owned(),
                base: b.map(side),
                ours: o.map(side),
                theirs: t.map(side),
            }),
        }
    }

    Ok((entries, conflicts))
}

enum MergeDecision {
    Clean(Option<(FileMode, Oid)>),
    Conflict,
}

fn side((mode, oid): Leaf) -> ConflictSide {
    ConflictSide { mode, oid }
}

fn merge_one(
    repo: &Repo,
    path: &str,
    base: Option<Leaf>,
    ours: Option<Leaf>,
    theirs: Option<Leaf>,
) -> BitResult<MergeDecision> {
    use MergeDecision::*;

    if ours == theirs {
        // Covers base==ours==theirs, base-absent-both-add-same, and
        // independently-identical edits.
        return Ok(Clean(ours));
    }

    match (base, ours, theirs) {
        (Some(_), Some(o), Some(t)) => {
            if o == base.unwrap() {
                Ok(Clean(Some(t)))
            } else if t == base.unwrap() {
                Ok(Clean(Some(o)))
            } else if o.0 != t.0 {
                Ok(Conflict)
            } else {
                content_merge(repo, path, base, o, t)
            }
        }
        (Some(b), None, Some(t)) => {
            if t == b {
                Ok(Clean(None))
            } else {
                Ok(Conflict)
            }
        }
        (Some(b), Some(o), None) => {
            if o == b {
                Ok(Clean(None))
            } else {
                Ok(Conflict)
            }
        }
        (Some(_), None, None) => Ok(Clean(None)),
        (None, None, Some(t)) => Ok(Clean(Some(t))),
        (None, Some(o), None) => Ok(Clean(Some(o))),
        (None, Some(_), Some(_)) => Ok(Conflict),
        (None, None, None) => unreachable!("path only exists because it's a key of one of the maps"),
    }
}

fn content_merge(
    repo: &Repo,
    path: &str,
    base: Option<Leaf>,
    ours: Leaf,
    theirs: Leaf,
) -> BitResult<MergeDecision> {
    let mode = ours.0;
    let base_bytes = match base {
        Some((_, oid)) => repo.read_obj(oid)?.into_blob()?.bytes,
        None => vec![],
    };
    let ours_bytes = repo.read_obj(ours.1)?.into_blob()?.bytes;
    let theirs_bytes = repo.read_obj(theirs.1)?.into_blob()?.bytes;

    match crate::xdiff::merge(&base_bytes, &ours_bytes, &theirs_bytes) {
        Ok(merged) => {
            let oid = repo.write_obj(&BitObjKind::Blob(Blob::new(merged)))?;
            Ok(MergeDecision::Clean(Some((mode, oid))))
        }
        Err(_) => {
            let _ = path;
            Ok(MergeDecision::Conflict)
        }
    }
}

/// The currently unresolved conflicts of an in-progress merge, with each
/// side's content reconstructed from the original base/ours/theirs trees.
pub fn conflicts(repo: &Repo) -> BitResult<Vec<Conflict>> {
    let state = MergeState::load(repo)?;
    let base_tree = state.base.map(|b| repo.read_obj(b).and_then(BitObjKind::into_commit).map(|c| c.tree)).transpose()?;
    let ours_tree = repo.read_obj(state.ours)?.into_commit()?.tree;
    let theirs_tree = repo.read_obj(state.theirs)?.into_commit()?.tree;

    let base = flatten_tree(repo, base_tree)?;
    let ours = flatten_tree(repo, Some(ours_tree))?;
    let theirs = flatten_tree(repo, Some(theirs_tree))?;

    Ok(state
        .unresolved
        .iter()
        .map(|path| Conflict {
            path: path.clone(),
            base: base.get(path).copied().map(side),
            ours: ours.get(path).copied().map(side),
            theirs: theirs.get(path).copied().map(side),
        })
        .collect())
}

/// Resolves one conflicted path (spec §4.8 Conflict resolution API):
/// stages the chosen content into the in-progress merge's result tree and
/// moves `path` from unresolved to resolved.
pub fn resolve(repo: &Repo, path: &str, strategy: ConflictStrategy) -> BitResult<()> {
    let mut state = MergeState::load(repo)?;
    if !state.unresolved.remove(path) {
        bail!("`{}` is not a conflicted path in the current merge", path);
    }

    let conflict = conflicts_single(repo, &state, path)?;
    apply_strategy(repo, &mut state.entries, &conflict, &strategy)?;
    state.write(repo)
}

fn conflicts_single(repo: &Repo, state: &MergeState, path: &str) -> BitResult<Conflict> {
    let base_tree = state.base.map(|b| repo.read_obj(b).and_then(BitObjKind::into_commit).map(|c| c.tree)).transpose()?;
    let ours_tree = repo.read_obj(state.ours)?.into_commit()?.tree;
    let theirs_tree = repo.read_obj(state.theirs)?.into_commit()?.tree;

    let base = flatten_tree(repo, base_tree)?;
    let ours = flatten_tree(repo, Some(ours_tree))?;
    let theirs = flatten_tree(repo, Some(theirs_tree))?;

    Ok(Conflict {
        path: path.to_owned(),
        base: base.get(path).copied().map(side),
        ours: ours.get(path).copied().map(side),
        theirs: theirs.get(path).copied().map(side),
    })
}

fn apply_strategy(
    repo: &Repo,
    entries: &mut BTreeMap<String, (FileMode, Oid)>,
    conflict: &Conflict,
    strategy: &ConflictStrategy,
) -> BitResult<()> {
    let resolved = match strategy {
        ConflictStrategy::Ours => conflict.ours.map(|s| (s.mode, s.oid)),
        ConflictStrategy::Theirs => conflict.theirs.map(|s| (s.mode, s.oid)),
        ConflictStrategy::Base => conflict.base.map(|s| (s.mode, s.oid)),
        ConflictStrategy::Custom(bytes, mode) => {
            let oid = repo.write_obj(&BitObjKind::Blob(Blob::new(bytes.clone())))?;
            Some((*mode, oid))
        }
    };
    match resolved {
        Some(leaf) => {
            entries.insert(conflict.path.clone(), leaf);
        }
        None => {
            entries.remove(&conflict.path);
        }
    }
    Ok(())
}

/// Writes the merge commit once every conflict has been resolved (spec
/// §4.8): references both parents, updates `HEAD`, and clears merge state.
pub fn continue_merge(repo: &Repo) -> BitResult<Oid> {
    let state = MergeState::load(repo)?;
    if !state.unresolved.is_empty() {
        return Err(BitError::ConflictUnresolved.into());
    }
    let oid = write_merge_commit(repo, state.ours, state.theirs, &state.entries, &state.message)?;
    MergeState::clear(repo)?;
    Ok(oid)
}

/// Abandons an in-progress conflicted merge. `HEAD` is never advanced until
/// [`continue_merge`] succeeds, so there is nothing to restore but the
/// merge-state files themselves.
pub fn abort_merge(repo: &Repo) -> BitResult<()> {
    MergeState::load(repo)?;
    MergeState::clear(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::FileMode;
    use crate::test_utils::TestRepo;

    fn set_head_branch(t: &TestRepo, oid: Oid) {
        t.repo.refs.set("HEAD", oid, None).unwrap();
    }

    #[test]
    fn fast_forward_when_ours_is_ancestor() {
        let t = TestRepo::init();
        let root = t.commit_on_top(&[], "root", 100);
        set_head_branch(&t, root);
        let ahead = t.commit_on_top(&[root], "ahead", 200);

        let outcome = merge(&t.repo, ahead, &MergeOpts::default()).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(ahead));
        assert_eq!(t.repo.resolve_head().unwrap(), Some(ahead));
    }

    #[test]
    fn up_to_date_when_theirs_is_ancestor() {
        let t = TestRepo::init();
        let root = t.commit_on_top(&[], "root", 100);
        let ahead = t.commit_on_top(&[root], "ahead", 200);
        set_head_branch(&t, ahead);

        let outcome = merge(&t.repo, root, &MergeOpts::default()).unwrap();
        assert_eq!(outcome, MergeOutcome::UpToDate);
        assert_eq!(t.repo.resolve_head().unwrap(), Some(ahead));
    }

    #[test]
    fn non_conflicting_divergent_changes_merge_cleanly() {
        let t = TestRepo::init();
        let a = t.blob(b"a");
        let b = t.blob(b"b");
        let base_tree = t.tree([(FileMode::REG, "a.txt", a), (FileMode::REG, "b.txt", b)]);
        let root = t.commit_with_tree(base_tree, &[], "root", 100);
        set_head_branch(&t, root);

        let a2 = t.blob(b"a2");
        let ours_tree = t.tree([(FileMode::REG, "a.txt", a2), (FileMode::REG, "b.txt", b)]);
        let ours = t.commit_with_tree(ours_tree, &[root], "ours changes a", 200);
        set_head_branch(&t, ours);

        let b2 = t.blob(b"b2");
        let theirs_tree = t.tree([(FileMode::REG, "a.txt", a), (FileMode::REG, "b.txt", b2)]);
        let theirs = t.commit_with_tree(theirs_tree, &[root], "theirs changes b", 200);

        let outcome = merge(&t.repo, theirs, &MergeOpts::default()).unwrap();
        let MergeOutcome::Merged(oid) = outcome else { panic!("expected Merged, got {:?}", outcome) };
        let commit = t.repo.read_obj(oid).unwrap().into_commit().unwrap();
        assert_eq!(commit.parents, vec![ours, theirs]);

        let entries = t.tree_entries(commit.tree);
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn conflicting_change_pauses_for_resolution() {
        let t = TestRepo::init();
        let a = t.blob(b"base content\n");
        let base_tree = t.tree([(FileMode::REG, "a.txt", a)]);
        let root = t.commit_with_tree(base_tree, &[], "root", 100);
        set_head_branch(&t, root);

        let a_ours = t.blob(b"ours content\n");
        let ours_tree = t.tree([(FileMode::REG, "a.txt", a_ours)]);
        let ours = t.commit_with_tree(ours_tree, &[root], "ours", 200);
        set_head_branch(&t, ours);

        let a_theirs = t.blob(b"theirs content\n");
        let theirs_tree = t.tree([(FileMode::REG, "a.txt", a_theirs)]);
        let theirs = t.commit_with_tree(theirs_tree, &[root], "theirs", 200);

        let outcome = merge(&t.repo, theirs, &MergeOpts::default()).unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted);
        assert!(MergeState::exists(&t.repo));

        let found = conflicts(&t.repo).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "a.txt");

        resolve(&t.repo, "a.txt", ConflictStrategy::Theirs).unwrap();
        let oid = continue_merge(&t.repo).unwrap();
        assert!(!MergeState::exists(&t.repo));

        let commit = t.repo.read_obj(oid).unwrap().into_commit().unwrap();
        let entries = t.tree_entries(commit.tree);
        let entry = entries.iter().find(|e| e.name == "a.txt").unwrap();
        assert_eq!(entry.oid, a_theirs);
    }

    #[test]
    fn abort_merge_clears_state_without_moving_head() {
        let t = TestRepo::init();
        let a = t.blob(b"base\n");
        let base_tree = t.tree([(FileMode::REG, "a.txt", a)]);
        let root = t.commit_with_tree(base_tree, &[], "root", 100);
        set_head_branch(&t, root);

        let a_ours = t.blob(b"ours\n");
        let ours_tree = t.tree([(FileMode::REG, "a.txt", a_ours)]);
        let ours = t.commit_with_tree(ours_tree, &[root], "ours", 200);
        set_head_branch(&t, ours);

        let a_theirs = t.blob(b"theirs\n");
        let theirs_tree = t.tree([(FileMode::REG, "a.txt", a_theirs)]);
        let theirs = t.commit_with_tree(theirs_tree, &[root], "theirs", 200);

        merge(&t.repo, theirs, &MergeOpts::default()).unwrap();
        abort_merge(&t.repo).unwrap();
        assert!(!MergeState::exists(&t.repo));
        assert_eq!(t.repo.resolve_head().unwrap(), Some(ours));
    }
}

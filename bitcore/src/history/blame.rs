//! Blame (spec §4.7): attributes each line of a file at `start` to the most
//! recent commit that introduced it. Grounded on the same LCS machinery
//! [`crate::xdiff`] uses for three-way merge, walked along the first-parent
//! chain — full-DAG/all-parents blame and rename-follow are both explicitly
//! optional per spec and out of scope here.

use std::collections::HashSet;

use crate::error::BitResult;
use crate::hash::Oid;
use crate::repo::Repo;
use crate::xdiff::longest_common_subsequence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameLine {
    pub content: String,
    pub commit: Oid,
}

/// Attributes every line of `path` as it exists at `start`. Each commit
/// along the first-parent chain is diffed against its parent's version of
/// the same file; lines that match (by content, or by position when
/// `blame.fallback_positional` is set — spec §9 Open Question) are pushed
/// back to the parent, and whatever remains unmatched at a commit is
/// attributed there.
pub fn blame(repo: &Repo, start: Oid, path: &str) -> BitResult<Vec<BlameLine>> {
    let fallback_positional = repo.config().fallback_positional()?;

    let mut frontier_oid = start;
    let mut frontier_commit = repo.read_obj(start)?.into_commit()?;
    let original_lines = read_file_lines(repo, frontier_commit.tree, path)?;
    let mut attribution: Vec<Oid> = vec![frontier_oid; original_lines.len()];
    let original_refs: Vec<&str> = original_lines.iter().map(String::as_str).collect();

    loop {
        let Some(parent_oid) = frontier_commit.first_parent() else { break };
        let parent_commit = repo.read_obj(parent_oid)?.into_commit()?;
        let parent_lines = match read_file_lines(repo, parent_commit.tree, path) {
            Ok(lines) => lines,
            Err(_) => break,
        };
        let parent_refs: Vec<&str> = parent_lines.iter().map(String::as_str).collect();
        let matched: HashSet<usize> =
            longest_common_subsequence(&original_refs, &parent_refs).into_iter().map(|(a, _)| a).collect();

        let mut moved = false;
        for (i, owner) in attribution.iter_mut().enumerate() {
            if *owner != frontier_oid {
                continue;
            }
            let persists = matched.contains(&i)
                || (fallback_positional && parent_lines.get(i) == Some(&original_lines[i]));
            if persists {
                *owner = parent_oid;
                moved = true;
            }
        }

        if !moved {
            break;
        }
        frontier_oid = parent_oid;
        frontier_commit = parent_commit;
    }

    Ok(original_lines
        .into_iter()
        .zip(attribution)
        .map(|(content, commit)| BlameLine { content, commit })
        .collect())
}

fn read_file_lines(repo: &Repo, tree_oid: Oid, path: &str) -> BitResult<Vec<String>> {
    let bytes = read_file_bytes(repo, tree_oid, path)?;
    let text = String::from_utf8(bytes).map_err(|_| anyhow!("blame only supports utf-8 text files"))?;
    Ok(text.split_inclusive('\n').map(str::to_owned).collect())
}

fn read_file_bytes(repo: &Repo, tree_oid: Oid, path: &str) -> BitResult<Vec<u8>> {
    let mut current = tree_oid;
    let mut components = path.split('/').peekable();
    loop {
        let tree = repo.read_obj(current)?.into_tree()?;
        let name = components.next().ok_or_else(|| anyhow!("empty blame path"))?;
        let entry = tree
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| anyhow!("path `{}` not found", path))?;
        if components.peek().is_none() {
            return Ok(repo.read_obj(entry.oid)?.into_blob()?.bytes);
        }
        current = entry.oid;
    }
}

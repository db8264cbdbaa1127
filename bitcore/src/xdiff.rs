//! Text diffing and three-way merge (spec §4.8). Patch creation/formatting
//! and the three-way `merge` both reuse the `diffy` crate exactly as the
//! teacher crate's `xdiff/mod.rs` does: `diffy::create_patch` +
//! `PatchFormatter` for patches, `diffy::MergeOptions` for merge, with
//! conflict markers in git's own `<<<<<<</=======/>>>>>>>` style.

use diffy::{ConflictStyle, MergeOptions, PatchFormatter};

pub type Patch<'a> = diffy::Patch<'a, str>;

pub fn create_patch<'a>(original: &'a str, modified: &'a str) -> Patch<'a> {
    diffy::create_patch(original, modified)
}

pub fn format_patch(patch: &Patch<'_>) -> crate::error::BitResult<String> {
    let mut buf = vec![];
    PatchFormatter::new().write_patch_into(patch, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Null-byte scan over the first 8 KiB (spec §4.7).
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(8192)].contains(&0)
}

/// Three-way text merge (spec §4.8). `Ok` is the clean merge; `Err` is the
/// best-effort merge with `<<<<<<<`/`=======`/`>>>>>>>` conflict markers
/// inserted, matching git's own convention of writing a markered file to the
/// worktree rather than aborting. Binary content on either side (spec §4.7)
/// always conflicts without attempting a text merge.
pub fn merge(base: &[u8], ours: &[u8], theirs: &[u8]) -> Result<Vec<u8>, Vec<u8>> {
    if is_binary(base) || is_binary(ours) || is_binary(theirs) {
        return Err(ours.to_vec());
    }
    MergeOptions::new().set_conflict_style(ConflictStyle::Merge).merge_bytes(base, ours, theirs)
}

/// Classic O(|a|·|b|) LCS table, returning the matched `(a_index, b_index)`
/// pairs in increasing order. `pub(crate)` so [`crate::history::blame`] can
/// reuse it to track a line's identity across a commit and its parent
/// without pulling in a second implementation.
pub(crate) fn longest_common_subsequence(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let (m, n) = (a.len(), b.len());
    let mut table = vec![vec![0u32; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = vec![];
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_overlapping_edits_merge_cleanly() {
        let base = b"one\ntwo\nthree\nfour\n";
        let ours = b"ONE\ntwo\nthree\nfour\n";
        let theirs = b"one\ntwo\nthree\nFOUR\n";
        let merged = merge(base, ours, theirs).unwrap();
        assert_eq!(merged, b"ONE\ntwo\nthree\nFOUR\n");
    }

    #[test]
    fn overlapping_conflicting_edits_yield_markers() {
        let base = b"one\ntwo\nthree\n";
        let ours = b"ONE\ntwo\nthree\n";
        let theirs = b"one-different\ntwo\nthree\n";
        let merged = merge(base, ours, theirs).unwrap_err();
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("<<<<<<<"));
        assert!(text.contains("======="));
        assert!(text.contains(">>>>>>>"));
        assert!(text.contains("ONE"));
        assert!(text.contains("one-different"));
    }

    #[test]
    fn identical_edits_on_both_sides_do_not_conflict() {
        let base = b"one\ntwo\n";
        let ours = b"one\nTWO\n";
        let theirs = b"one\nTWO\n";
        let merged = merge(base, ours, theirs).unwrap();
        assert_eq!(merged, b"one\nTWO\n");
    }

    #[test]
    fn differing_binary_content_always_conflicts() {
        let base = b"\0binary base";
        let ours = b"\0binary ours";
        let theirs = b"\0binary theirs";
        assert!(merge(base, ours, theirs).is_err());
    }

    #[test]
    fn create_patch_round_trips_through_apply() {
        let original = "a\nb\nc\n";
        let modified = "a\nB\nc\n";
        let patch = create_patch(original, modified);
        assert_eq!(diffy::apply(original, &patch).unwrap(), modified);
    }

    #[test]
    fn longest_common_subsequence_finds_shared_lines_in_order() {
        let a = ["one", "two", "three"];
        let b = ["zero", "one", "three"];
        let a_refs: Vec<&str> = a.to_vec();
        let b_refs: Vec<&str> = b.to_vec();
        assert_eq!(longest_common_subsequence(&a_refs, &b_refs), vec![(0, 1), (2, 2)]);
    }
}

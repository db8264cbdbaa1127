//! L4: history operations (spec §4.7) — walking, diffing, and attributing
//! commit history above the object store. [`commit_walk`] is grounded on
//! the teacher crate's `rev/revwalk.rs`; [`merge_base`] and [`blame`] on its
//! `rev/` and (for blame) `cmd/bit_blame.rs`-adjacent logic; [`tree_diff`] on
//! `diff/tree_diff.rs`'s dual-iterator driver, adapted to walk [`Tree`]
//! objects directly since there is no index/workspace layer here;
//! [`tree_builder`] on the index's `write_tree` path, minus the index.

pub mod blame;
pub mod commit_walk;
pub mod merge_base;
pub mod tree_builder;
pub mod tree_diff;

pub use commit_walk::{ancestors_of, range_three_dot, range_two_dot, CommitWalk, Order, WalkOpts};
pub use merge_base::merge_base;
pub use tree_diff::{diff_trees, DiffStatus, TreeDiffEntry};

//! Tree: an ordered sequence of `{mode, name, child_id}` entries, sorted by
//! name with a trailing `/` appended for directory entries (spec §3).
//! Grounded on the teacher crate's `obj/tree.rs`.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;

use super::{BitObject, BitObjType, FileMode};
use crate::error::{BitError, BitResult};
use crate::hash::Oid;
use crate::io::{BufReadExt, ReadExt};
use crate::serialize::{Deserialize, DeserializeSized, Serialize};

#[derive(PartialEq, Debug, Default, Clone)]
pub struct Tree {
    pub entries: BTreeSet<TreeEntry>,
}

impl Display for Tree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl Serialize for Tree {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        for entry in &self.entries {
            entry.serialize(writer)?;
        }
        Ok(())
    }
}

impl DeserializeSized for Tree {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> BitResult<Self> {
        let r = &mut reader.take(size);
        let mut tree = Self::default();
        while !r.is_at_eof()? {
            tree.entries.insert(TreeEntry::deserialize(r)?);
        }
        Ok(tree)
    }
}

impl BitObject for Tree {
    fn obj_type(&self) -> BitObjType {
        BitObjType::Tree
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<String>, oid: Oid) -> BitResult<Self> {
        let name = name.into();
        if name.contains('/') || name.contains('\0') || name.is_empty() {
            bail!("invalid tree entry name `{}`", name);
        }
        Ok(Self { mode, name, oid })
    }

    /// Entries are ordered by: the name with a trailing `/` appended when
    /// the entry is a directory, compared byte-wise — this is what makes
    /// `index.rs` sort before `index/`'s contents.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode == FileMode::DIR {
            key.push(b'/');
        }
        key
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Display for TreeEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#} {} {}\t{}", self.mode, self.mode.infer_obj_type(), self.oid, self.name)
    }
}

impl Deserialize for TreeEntry {
    fn deserialize(reader: &mut impl BufRead) -> BitResult<Self> {
        let mode_str = reader.read_ascii_str(b' ')?;
        let mode = mode_str.parse::<FileMode>().map_err(|_| BitError::InvalidMode(0))?;
        let name = reader.read_null_terminated()?;
        let name = String::from_utf8(name).map_err(|_| anyhow!("non-utf8 tree entry name"))?;
        let oid = reader.read_oid()?;
        TreeEntry::new(mode, name, oid)
    }
}

impl Serialize for TreeEntry {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        write!(writer, "{:#}", self.mode)?;
        writer.write_all(b" ")?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b"\0")?;
        writer.write_all(self.oid.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::BitObjKind;

    #[test]
    fn empty_tree_hashes_to_spec_constant() {
        let tree = BitObjKind::Tree(Tree::default());
        let (oid, _) = tree.serialize_with_header().unwrap();
        assert_eq!(oid, crate::hash::EMPTY_TREE);
    }

    /// A tree with a single subdirectory entry (the subdirectory itself
    /// empty) must serialize the `DIR` mode as unpadded octal (`40000`, not
    /// `040000`) to match git's own object bytes — this is a known id
    /// (`git mktree` with a single `40000 dir\t<empty tree>` line).
    #[test]
    fn tree_with_subdirectory_hashes_to_git_known_id() {
        let mut tree = Tree::default();
        tree.entries.insert(TreeEntry::new(FileMode::DIR, "dir", crate::hash::EMPTY_TREE).unwrap());
        let (oid, _) = BitObjKind::Tree(tree).serialize_with_header().unwrap();
        assert_eq!(oid.hex(), "9a756a3533b1a0d1c5164cf4475ed4a0d34a812b");
    }

    #[test]
    fn tree_entries_sort_files_before_directories_with_shared_prefix() {
        let mut tree = Tree::default();
        tree.entries.insert(TreeEntry::new(FileMode::DIR, "foo", Oid::UNKNOWN).unwrap());
        tree.entries.insert(TreeEntry::new(FileMode::REG, "foo.txt", Oid::UNKNOWN).unwrap());
        let names: Vec<_> = tree.entries.iter().map(|e| e.name.clone()).collect();
        // "foo.txt" < "foo/" byte-wise ('.' = 0x2e < '/' = 0x2f)
        assert_eq!(names, vec!["foo.txt".to_owned(), "foo".to_owned()]);
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let mut tree = Tree::default();
        tree.entries.insert(TreeEntry::new(FileMode::REG, "a", crate::hash::sha1(b"a")).unwrap());
        tree.entries.insert(TreeEntry::new(FileMode::DIR, "b", crate::hash::sha1(b"b")).unwrap());
        let mut bytes = vec![];
        tree.serialize(&mut bytes).unwrap();
        let parsed = Tree::deserialize_sized_unbuffered(bytes.as_slice(), bytes.len() as u64).unwrap();
        assert_eq!(tree, parsed);
    }

    #[test]
    fn rejects_name_containing_slash() {
        assert!(TreeEntry::new(FileMode::REG, "a/b", Oid::UNKNOWN).is_err());
    }
}

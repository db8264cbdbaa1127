//! Commit: `{tree_id, parents[0..n], author, committer, message,
//! gpg_signature?, extra_headers?}` (spec §3). Parents are ordered — index 0
//! is the first parent. Grounded on the teacher crate's `obj/commit.rs`,
//! generalized from its single `parent: Option<Oid>` field to support
//! multi-parent (octopus merge) commits.

use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;

use indexmap::IndexMap;

use super::{BitObject, BitObjType};
use crate::error::BitResult;
use crate::hash::Oid;
use crate::io::{BufReadExt, ReadExt, WriteExt};
use crate::serialize::{Deserialize, DeserializeSized, Serialize};
use crate::signature::BitSignature;

#[derive(PartialEq, Debug, Clone)]
pub struct Commit {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: BitSignature,
    pub committer: BitSignature,
    /// Headers other than `tree`/`parent`/`author`/`committer`/`gpgsig`,
    /// preserved in encounter order (e.g. `encoding`, `mergetag`).
    pub extra_headers: IndexMap<String, String>,
    pub gpgsig: Option<String>,
    pub message: String,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Multi-line header values are continued on following lines each prefixed
/// with a single space, exactly as git encodes e.g. gpg signatures.
fn write_header_value(writer: &mut dyn Write, key: &str, value: &str) -> BitResult<()> {
    writeln!(writer, "{} {}", key, value.replace('\n', "\n "))?;
    Ok(())
}

impl Serialize for Commit {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        writeln!(writer, "tree {}", self.tree)?;
        for parent in &self.parents {
            writeln!(writer, "parent {}", parent)?;
        }
        write_header_value(writer, "author", &self.author.to_string())?;
        write_header_value(writer, "committer", &self.committer.to_string())?;
        for (key, value) in &self.extra_headers {
            write_header_value(writer, key, value)?;
        }
        if let Some(gpgsig) = &self.gpgsig {
            write_header_value(writer, "gpgsig", gpgsig)?;
        }
        writer.write_all(b"\n")?;
        writer.write_all(self.message.as_bytes())?;
        Ok(())
    }
}

impl DeserializeSized for Commit {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> BitResult<Self> {
        let mut r = reader.take(size);

        let mut tree = None;
        let mut parents = vec![];
        let mut author = None;
        let mut committer = None;
        let mut extra_headers = IndexMap::new();
        let mut gpgsig = None;

        let mut current_key: Option<String> = None;
        let mut current_value = String::new();

        macro_rules! flush {
            () => {
                if let Some(key) = current_key.take() {
                    match key.as_str() {
                        "tree" => tree = Some(current_value.parse()?),
                        "parent" => parents.push(current_value.parse()?),
                        "author" => author = Some(current_value.parse()?),
                        "committer" => committer = Some(current_value.parse()?),
                        "gpgsig" => gpgsig = Some(current_value.clone()),
                        other => {
                            extra_headers.insert(other.to_owned(), current_value.clone());
                        }
                    }
                    current_value.clear();
                }
            };
        }

        loop {
            let line = r.read_ascii_str(b'\n')?;
            if line.is_empty() {
                break;
            }
            if let Some(continuation) = line.strip_prefix(' ') {
                current_value.push('\n');
                current_value.push_str(continuation);
            } else {
                flush!();
                let (key, value) =
                    line.split_once(' ').ok_or_else(|| anyhow!("malformed commit header `{}`", line))?;
                current_key = Some(key.to_owned());
                current_value.push_str(value);
            }
        }
        flush!();

        let message = r.read_to_string_lossy()?;

        Ok(Self {
            tree: tree.ok_or_else(|| anyhow!("commit missing `tree` header"))?,
            parents,
            author: author.ok_or_else(|| anyhow!("commit missing `author` header"))?,
            committer: committer.ok_or_else(|| anyhow!("commit missing `committer` header"))?,
            extra_headers,
            gpgsig,
            message,
        })
    }
}

impl BitObject for Commit {
    fn obj_type(&self) -> BitObjType {
        BitObjType::Commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha1;
    use crate::obj::BitObjKind;
    use std::str::FromStr;

    fn sig() -> BitSignature {
        BitSignature::from_str("A U Thor <a@u.test> 1600000000 +0000").unwrap()
    }

    #[test]
    fn root_commit_round_trips() {
        let commit = Commit {
            tree: sha1(b"tree 0\0"),
            parents: vec![],
            author: sig(),
            committer: sig(),
            extra_headers: IndexMap::new(),
            gpgsig: None,
            message: "initial commit\n".to_owned(),
        };
        let obj = BitObjKind::Commit(commit.clone());
        let (_, bytes) = obj.serialize_with_header().unwrap();
        let parsed = BitObjKind::parse(&bytes).unwrap().into_commit().unwrap();
        assert_eq!(parsed, commit);
        assert!(parsed.parents.is_empty());
        assert!(!parsed.is_merge());
    }

    #[test]
    fn merge_commit_preserves_parent_order() {
        let p1 = sha1(b"p1");
        let p2 = sha1(b"p2");
        let commit = Commit {
            tree: sha1(b"tree 0\0"),
            parents: vec![p1, p2],
            author: sig(),
            committer: sig(),
            extra_headers: IndexMap::new(),
            gpgsig: None,
            message: "merge\n".to_owned(),
        };
        let bytes = commit.serialize_to_vec().unwrap();
        let parsed = Commit::deserialize_from_slice(&bytes).unwrap();
        assert_eq!(parsed.parents, vec![p1, p2]);
        assert_eq!(parsed.first_parent(), Some(p1));
        assert!(parsed.is_merge());
    }

    #[test]
    fn multiline_gpgsig_round_trips() {
        let commit = Commit {
            tree: sha1(b"tree 0\0"),
            parents: vec![],
            author: sig(),
            committer: sig(),
            extra_headers: IndexMap::new(),
            gpgsig: Some("-----BEGIN PGP SIGNATURE-----\n\nabcd\n-----END PGP SIGNATURE-----".to_owned()),
            message: "signed\n".to_owned(),
        };
        let bytes = commit.serialize_to_vec().unwrap();
        let parsed = Commit::deserialize_from_slice(&bytes).unwrap();
        assert_eq!(parsed.gpgsig, commit.gpgsig);
    }
}

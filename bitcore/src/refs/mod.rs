//! L2: the ref layer (spec §4.6). `BitRef`/`SymbolicRef` are grounded on the
//! teacher crate's `refs.rs`, generalized away from its arena-interned
//! `BitPath` to plain owned `String` ref names since this crate has no
//! string interner. See [`store`] for the on-disk `FileRefStore` backend.

pub mod refspec;
pub mod store;

use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{BitError, BitGenericError, BitResult};
use crate::hash::Oid;
use crate::serialize::{Deserialize, Serialize};

pub use refspec::Refspec;

lazy_static! {
    /// A reference name is invalid if any of the following hold: a path
    /// component begins with `.` (`^.` or `/.`); it contains `..`; it
    /// contains any of `* : ? [ \ ^ ~` space or tab; it ends with `/` or
    /// `.lock`; it contains `@{`; it starts with `/` or contains an empty
    /// component (`//`); or it contains an ASCII control character.
    static ref INVALID_REF_REGEX: Regex = Regex::new(
        r#"^\.|/\.|\.\.|\*|:|\?|\[|\\|\^|~| |\t|/$|\.lock$|@\{|^/|//|[\x00-\x1f\x7f]"#
    )
    .unwrap();
}

pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && !INVALID_REF_REGEX.is_match(s)
}

fn validate_name(s: &str) -> BitResult<()> {
    if is_valid_name(s) { Ok(()) } else { Err(BitError::InvalidRefName(s.to_owned()).into()) }
}

/// Non-validated parsed representation of a reference's literal contents
/// (spec §3/§4.6): either a direct object id, or the name of another
/// reference to follow.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum BitRef {
    Direct(Oid),
    Symbolic(SymbolicRef),
}

impl BitRef {
    pub fn head() -> Self {
        Self::Symbolic(SymbolicRef::head())
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct(..))
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::Symbolic(..))
    }

    pub fn into_direct(self) -> Option<Oid> {
        match self {
            Self::Direct(oid) => Some(oid),
            Self::Symbolic(..) => None,
        }
    }
}

impl From<Oid> for BitRef {
    fn from(oid: Oid) -> Self {
        Self::Direct(oid)
    }
}

impl From<SymbolicRef> for BitRef {
    fn from(sym: SymbolicRef) -> Self {
        Self::Symbolic(sym)
    }
}

impl Display for BitRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(oid) => write!(f, "{}", oid),
            Self::Symbolic(sym) => write!(f, "{}", sym),
        }
    }
}

impl Serialize for BitRef {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        match self {
            Self::Direct(oid) => write!(writer, "{}\n", oid.hex())?,
            Self::Symbolic(sym) => write!(writer, "ref: {}\n", sym.name())?,
        };
        Ok(())
    }
}

impl Deserialize for BitRef {
    fn deserialize(reader: &mut impl BufRead) -> BitResult<Self> {
        let mut s = String::new();
        reader.read_to_string(&mut s)?;
        s.trim_end().parse()
    }
}

const SYMBOLIC_REF_PREFIX: &str = "ref: ";

impl FromStr for BitRef {
    type Err = BitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        if let Ok(oid) = Oid::from_str(s) {
            return Ok(Self::Direct(oid));
        }
        SymbolicRef::from_str(s).map(Self::Symbolic)
    }
}

/// A validated ref name, classified by the namespace it falls into so
/// callers can distinguish `HEAD`, branches, tags, and remote-tracking refs
/// without re-parsing the string each time.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SymbolicRef {
    name: String,
    kind: SymbolicRefKind,
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum SymbolicRefKind {
    Head,
    Branch,
    Remote,
    Tag,
    Unknown,
}

impl SymbolicRef {
    pub fn head() -> Self {
        Self { name: "HEAD".to_owned(), kind: SymbolicRefKind::Head }
    }

    pub fn new(name: impl Into<String>) -> BitResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        let kind = Self::calculate_kind(&name);
        Ok(Self { name, kind })
    }

    pub fn new_branch(short_name: &str) -> BitResult<Self> {
        Self::new(format!("refs/heads/{}", short_name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SymbolicRefKind {
        self.kind
    }

    fn calculate_kind(name: &str) -> SymbolicRefKind {
        if name == "HEAD" {
            SymbolicRefKind::Head
        } else if name.starts_with("refs/heads/") {
            SymbolicRefKind::Branch
        } else if name.starts_with("refs/remotes/") {
            SymbolicRefKind::Remote
        } else if name.starts_with("refs/tags/") {
            SymbolicRefKind::Tag
        } else {
            SymbolicRefKind::Unknown
        }
    }

    /// An abbreviated form with the namespace prefix stripped, as shown to
    /// users (`master` rather than `refs/heads/master`).
    pub fn short(&self) -> &str {
        for prefix in ["refs/heads/", "refs/tags/", "refs/remotes/"] {
            if let Some(stripped) = self.name().strip_prefix(prefix) {
                return stripped;
            }
        }
        self.name()
    }
}

impl Display for SymbolicRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() { write!(f, "{}", self.short()) } else { write!(f, "{}", self.name()) }
    }
}

impl FromStr for SymbolicRef {
    type Err = BitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name =
            if let Some(stripped) = s.strip_prefix(SYMBOLIC_REF_PREFIX) { stripped } else { s };
        Ok(Self::new(name.trim_end())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dotted_components_and_parent_traversal() {
        assert!(!is_valid_name(".hidden/branch"));
        assert!(!is_valid_name("refs/heads/../escape"));
        assert!(!is_valid_name("refs/heads/"));
        assert!(!is_valid_name("refs/heads//master"));
        assert!(!is_valid_name("refs/heads/foo.lock"));
        assert!(!is_valid_name("refs/heads/foo bar"));
        assert!(!is_valid_name("refs/heads/foo@{1}"));
    }

    #[test]
    fn accepts_ordinary_branch_and_tag_names() {
        assert!(is_valid_name("refs/heads/master"));
        assert!(is_valid_name("refs/tags/v1.0.0"));
        assert!(is_valid_name("HEAD"));
    }

    #[test]
    fn direct_ref_round_trips_through_serialize() {
        let oid = crate::hash::sha1(b"some commit");
        let r = BitRef::Direct(oid);
        let bytes = r.serialize_to_vec().unwrap();
        assert_eq!(BitRef::deserialize_unbuffered(bytes.as_slice()).unwrap(), r);
    }

    #[test]
    fn symbolic_ref_round_trips_through_serialize() {
        let sym = SymbolicRef::new("refs/heads/master").unwrap();
        let r = BitRef::Symbolic(sym.clone());
        let bytes = r.serialize_to_vec().unwrap();
        assert_eq!(BitRef::deserialize_unbuffered(bytes.as_slice()).unwrap(), r);
    }

    #[test]
    fn kind_classification_matches_namespace() {
        assert_eq!(SymbolicRef::new("HEAD").unwrap().kind(), SymbolicRefKind::Head);
        assert_eq!(SymbolicRef::new("refs/heads/main").unwrap().kind(), SymbolicRefKind::Branch);
        assert_eq!(
            SymbolicRef::new("refs/remotes/origin/main").unwrap().kind(),
            SymbolicRefKind::Remote
        );
        assert_eq!(SymbolicRef::new("refs/tags/v1").unwrap().kind(), SymbolicRefKind::Tag);
        assert_eq!(SymbolicRef::new("FETCH_HEAD").unwrap().kind(), SymbolicRefKind::Unknown);
    }
}

//! Refspec parsing (spec §4.6): `[+]src[:dst]`. Grounded on the teacher
//! crate's ref-name validation approach in `refs.rs` (single regex compiled
//! once via `lazy_static`) applied to the refspec grammar instead.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::{BitError, BitGenericError, BitResult};

use super::is_valid_name;

/// A parsed `[+]src[:dst]` refspec. `dst` defaults to `src` when the colon
/// form is omitted (spec §4.6); `force` is the leading `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    pub src: String,
    pub dst: String,
}

impl Refspec {
    /// Whether `src` literally matches `name` — wildcard patterns expand
    /// `*` to the text matched on the other side of `:`; a refspec with no
    /// colon (`dst == src`) is already literal and this degrades to
    /// equality.
    pub fn matches(&self, name: &str) -> bool {
        match self.src.find('*') {
            None => self.src == name,
            Some(star) => {
                let (prefix, suffix) = (&self.src[..star], &self.src[star + 1..]);
                name.len() >= prefix.len() + suffix.len()
                    && name.starts_with(prefix)
                    && name.ends_with(suffix)
            }
        }
    }

    /// Expands `src`'s wildcard capture (if any) into `dst`'s `*`.
    pub fn apply(&self, name: &str) -> Option<String> {
        if !self.matches(name) {
            return None;
        }
        match (self.src.find('*'), self.dst.find('*')) {
            (Some(src_star), Some(dst_star)) => {
                let prefix_len = src_star;
                let suffix_len = self.src.len() - src_star - 1;
                let captured = &name[prefix_len..name.len() - suffix_len];
                Some(format!("{}{}{}", &self.dst[..dst_star], captured, &self.dst[dst_star + 1..]))
            }
            _ => Some(self.dst.clone()),
        }
    }
}

impl Display for Refspec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.force {
            write!(f, "+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

fn validate_side(side: &str) -> BitResult<()> {
    if side.matches('*').count() > 1 {
        return Err(BitError::InvalidRefspec(side.to_owned()).into());
    }
    // Wildcard sides are checked against the literal-name validator with the
    // `*` stripped, since `is_valid_name` has no notion of a glob.
    let literal: String = side.replacen('*', "glob", 1);
    if !literal.is_empty() && !is_valid_name(&literal) {
        return Err(BitError::InvalidRefspec(side.to_owned()).into());
    }
    Ok(())
}

impl FromStr for Refspec {
    type Err = BitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (force, rest) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if rest.is_empty() {
            return Err(BitError::InvalidRefspec(s.to_owned()).into());
        }

        let (src, dst) = match rest.split_once(':') {
            Some((src, dst)) => (src, dst),
            None => (rest, rest),
        };
        validate_side(src)?;
        validate_side(dst)?;

        let src_has_star = src.contains('*');
        let dst_has_star = dst.contains('*');
        if src_has_star != dst_has_star {
            return Err(BitError::InvalidRefspec(s.to_owned()).into());
        }

        Ok(Self { force, src: src.to_owned(), dst: dst.to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_refspec_defaults_dst_to_src() {
        let spec: Refspec = "refs/heads/master".parse().unwrap();
        assert!(!spec.force);
        assert_eq!(spec.src, "refs/heads/master");
        assert_eq!(spec.dst, "refs/heads/master");
    }

    #[test]
    fn colon_form_splits_src_and_dst() {
        let spec: Refspec = "refs/heads/master:refs/remotes/origin/master".parse().unwrap();
        assert_eq!(spec.src, "refs/heads/master");
        assert_eq!(spec.dst, "refs/remotes/origin/master");
    }

    #[test]
    fn leading_plus_forces() {
        let spec: Refspec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        assert!(spec.force);
    }

    #[test]
    fn unbalanced_wildcards_are_rejected() {
        assert!("refs/heads/*:refs/remotes/origin/master".parse::<Refspec>().is_err());
    }

    #[test]
    fn more_than_one_star_per_side_is_rejected() {
        assert!("refs/heads/*/*:refs/remotes/origin/*".parse::<Refspec>().is_err());
    }

    #[test]
    fn wildcard_refspec_expands_captured_segment() {
        let spec: Refspec = "refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        assert!(spec.matches("refs/heads/feature"));
        assert_eq!(spec.apply("refs/heads/feature").unwrap(), "refs/remotes/origin/feature");
        assert!(!spec.matches("refs/tags/v1"));
    }
}

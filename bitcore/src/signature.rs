//! Author/committer/tagger identity (spec §3), grounded on the teacher
//! crate's `signature.rs`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::{BitError, BitResult};
use crate::repo::Repo;

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct BitEpochTime(pub i64);

impl Display for BitEpochTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BitEpochTime {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self).map_err(|_| BitError::InvalidIdentity(s.to_owned()))
    }
}

/// Minutes east of UTC, formatted as `(+|-)HHMM` per spec's
/// `/^[+-]\d{4}$/` requirement.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct BitTimeZoneOffset(pub i32);

impl Display for BitTimeZoneOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { '-' } else { '+' };
        let abs = self.0.abs();
        write!(f, "{}{:02}{:02}", sign, abs / 60, abs % 60)
    }
}

impl FromStr for BitTimeZoneOffset {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 5 || (bytes[0] != b'+' && bytes[0] != b'-') {
            return Err(BitError::InvalidIdentity(s.to_owned()));
        }
        let hours: i32 =
            s[1..3].parse().map_err(|_| BitError::InvalidIdentity(s.to_owned()))?;
        let minutes: i32 =
            s[3..5].parse().map_err(|_| BitError::InvalidIdentity(s.to_owned()))?;
        let magnitude = hours * 60 + minutes;
        Ok(Self(if bytes[0] == b'-' { -magnitude } else { magnitude }))
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct BitTime {
    pub time: BitEpochTime,
    pub offset: BitTimeZoneOffset,
}

impl Display for BitTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time, self.offset)
    }
}

/// `{name, email, unix_timestamp, timezone_offset}`, serialized as
/// `"Name <email> <epoch> <tz>"`.
#[derive(PartialEq, Eq, Debug, Clone, Hash)]
pub struct BitSignature {
    pub name: String,
    pub email: String,
    pub time: BitTime,
}

impl Display for BitSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.time)
    }
}

impl FromStr for BitSignature {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BitError::InvalidIdentity(s.to_owned());
        let lt = s.find('<').ok_or_else(invalid)?;
        let gt = s.find('>').ok_or_else(invalid)?;
        if gt < lt {
            return Err(invalid());
        }
        let name = s[..lt].trim().to_owned();
        let email = s[lt + 1..gt].to_owned();
        let rest = s[gt + 1..].trim();
        let mut parts = rest.split_whitespace();
        let epoch = parts.next().ok_or_else(invalid)?;
        let tz = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            name,
            email,
            time: BitTime { time: epoch.parse()?, offset: tz.parse()? },
        })
    }
}

impl Repo {
    /// The identity new commits/tags are authored under — `user.name`/
    /// `user.email` from config, stamped with the repo's [`crate::time::Clock`].
    pub fn user_signature(&self) -> BitResult<BitSignature> {
        let name = self.config().name()?;
        let email = self.config().email()?;
        match (name, email) {
            (Some(name), Some(email)) => Ok(BitSignature { name, email, time: self.clock.now() }),
            _ => bail!(
                "no identity configured: set `user.name` and `user.email` in `.git/config` or `~/.gitconfig`"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn signature_round_trips() {
        let s = "A U Thor <a@u.test> 1600000000 +0000";
        let sig = BitSignature::from_str(s).unwrap();
        assert_eq!(sig.name, "A U Thor");
        assert_eq!(sig.email, "a@u.test");
        assert_eq!(sig.time.time.0, 1600000000);
        assert_eq!(sig.to_string(), s);
    }

    #[test]
    fn negative_offset_formats_correctly() {
        let tz = BitTimeZoneOffset(-330);
        assert_eq!(tz.to_string(), "-0530");
        assert_eq!(BitTimeZoneOffset::from_str("-0530").unwrap(), tz);
    }

    /// Bounded to a day either side of UTC so the `(+|-)HHMM` encoding never
    /// overflows its fixed width (the offset itself is only ever `±14:00` in
    /// practice, but the format's invariant just needs `< 24h`).
    impl Arbitrary for BitTimeZoneOffset {
        fn arbitrary(g: &mut Gen) -> Self {
            Self((u32::arbitrary(g) % (24 * 60)) as i32 - 12 * 60)
        }
    }

    impl Arbitrary for BitSignature {
        fn arbitrary(g: &mut Gen) -> Self {
            let name: String = (0..g.size().min(40) + 1)
                .map(|_| *g.choose(b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ _").unwrap() as char)
                .collect();
            let email: String = (0..g.size().min(40) + 1)
                .map(|_| *g.choose(b"abcdefghijklmnopqrstuvwxyz0123456789._").unwrap() as char)
                .collect();
            Self {
                name: name.trim().to_owned(),
                email,
                time: BitTime {
                    time: BitEpochTime(i64::from(u32::arbitrary(g))),
                    offset: BitTimeZoneOffset::arbitrary(g),
                },
            }
        }
    }

    #[quickcheck]
    fn timezone_offset_serialize_then_parse_round_trips(offset: BitTimeZoneOffset) -> bool {
        offset.to_string().parse::<BitTimeZoneOffset>().unwrap() == offset
    }

    #[quickcheck]
    fn signature_serialize_then_parse_round_trips(sig: BitSignature) -> bool {
        // an empty name trims to nothing, which isn't re-parseable as the
        // `name <email>` grammar's name component.
        if sig.name.is_empty() {
            return true;
        }
        sig.to_string().parse::<BitSignature>().unwrap() == sig
    }
}

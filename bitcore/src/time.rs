//! `Clock` collaborator (spec §6): the sole source of wall-clock time for
//! new commit/tag identities, so tests can inject a fixed clock instead of
//! relying on the teacher crate's `cfg!(test)`-special-cased `BitTime::now`.

use crate::signature::{BitEpochTime, BitTime, BitTimeZoneOffset};

pub trait Clock: Send + Sync {
    fn now(&self) -> BitTime;
}

/// Production clock: real wall-clock time, local timezone offset.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> BitTime {
        let now = chrono::Local::now();
        BitTime {
            time: BitEpochTime(now.timestamp()),
            offset: BitTimeZoneOffset(now.offset().local_minus_utc() / 60),
        }
    }
}

/// Test clock returning a fixed instant, so commit ids built from it are
/// reproducible across runs and platforms.
pub struct FixedClock(pub BitTime);

impl FixedClock {
    pub fn new(epoch_seconds: i64, tz_offset_minutes: i32) -> Self {
        Self(BitTime { time: BitEpochTime(epoch_seconds), offset: BitTimeZoneOffset(tz_offset_minutes) })
    }
}

impl Clock for FixedClock {
    fn now(&self) -> BitTime {
        self.0
    }
}

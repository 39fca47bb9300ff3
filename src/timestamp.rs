//! `PreciseTimestamp`: ISO-8601 millisecond timestamp plus a monotonic
//! counter, per Design Note "Ad-hoc timestamps ... → Centralize on a
//! PreciseTimestamp". All chain ordering (I-5) goes through this type
//! rather than raw wall-clock comparisons.

use std::cmp::Ordering;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreciseTimestamp {
    millis: DateTime<Utc>,
    /// Disambiguates two timestamps whose millisecond component collided
    /// (I-5: "If the wall clock returns a value <= the previous, the
    /// suffix is incremented so ordering is preserved").
    monotonic: u64,
}

impl PreciseTimestamp {
    pub fn now() -> Self {
        Self {
            millis: Utc::now().trunc_subsecs(3),
            monotonic: 0,
        }
    }

    pub fn from_parts(millis: DateTime<Utc>, monotonic: u64) -> Self {
        Self {
            millis: millis.trunc_subsecs(3),
            monotonic,
        }
    }

    /// Produce the next timestamp in a sequence, given the previous one.
    /// Strictly greater than `prev` per I-5.
    pub fn next_after(prev: Option<&PreciseTimestamp>) -> Self {
        let now = Self::now();
        match prev {
            None => now,
            Some(prev) if now > *prev => now,
            Some(prev) => Self {
                millis: prev.millis,
                monotonic: prev.monotonic + 1,
            },
        }
    }

    pub fn to_rfc3339(&self) -> String {
        self.millis.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    pub fn hour_utc(&self) -> u32 {
        use chrono::Timelike;
        self.millis.hour()
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.millis
    }

    pub fn monotonic(&self) -> u64 {
        self.monotonic
    }
}

impl PartialOrd for PreciseTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreciseTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis
            .cmp(&other.millis)
            .then(self.monotonic.cmp(&other.monotonic))
    }
}

impl std::fmt::Display for PreciseTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.to_rfc3339(), self.monotonic)
    }
}

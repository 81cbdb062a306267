//! Cube product identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A StatCan cube identifier.
///
/// Product ids are published as 8-digit numbers (e.g. `10100001`) but the
/// wire format is inconsistent, so the id is carried as a plain 64-bit
/// integer everywhere.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Whether the id matches StatCan's published 8-digit range.
    ///
    /// Used by response validation as a sanity check, not enforced at
    /// construction: the change log stores an out-of-range sentinel.
    pub fn in_published_range(&self) -> bool {
        (10_000_000..=99_999_999).contains(&self.0)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for ProductId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| crate::Error::InvalidProductId(s.to_string()))
    }
}

impl fmt::Debug for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProductId({})", self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

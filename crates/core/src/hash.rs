//! Content hashing for artifacts and the dimension registry.
//!
//! Every hash in cubehouse is the first 12 hex characters of a SHA-256
//! digest. The truncation is deliberate: the ids end up in file names,
//! database keys and log lines, and 48 bits is plenty for a catalog of a
//! few thousand cubes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters retained from a SHA-256 digest.
pub const HASH_LEN: usize = 12;

/// A truncated SHA-256 content hash (12 lowercase hex characters).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactHash(String);

impl ArtifactHash {
    /// Compute the hash of a byte payload.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex_prefix(&hasher.finalize()))
    }

    /// Create an incremental hasher for streaming verification.
    pub fn hasher() -> ArtifactHasher {
        ArtifactHasher(Sha256::new())
    }

    /// Parse a stored hash, validating length and character set.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != HASH_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(crate::Error::InvalidHash(format!(
                "expected {HASH_LEN} lowercase hex chars, got: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fanout prefix used for on-disk directory layout.
    pub fn fanout_prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Debug for ArtifactHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactHash({})", self.0)
    }
}

impl fmt::Display for ArtifactHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental hasher producing an [`ArtifactHash`].
pub struct ArtifactHasher(Sha256);

impl ArtifactHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> ArtifactHash {
        ArtifactHash(hex_prefix(&self.0.finalize()))
    }
}

fn hex_prefix(digest: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(HASH_LEN);
    for byte in digest.iter().take(HASH_LEN / 2) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Hash a member's structural identity.
///
/// The key is a pipe-joined tuple of member id, normalized English label,
/// parent member id and unit-of-measure code, with absent values encoded as
/// the empty string. Classification codes, geo level, vintage and
/// termination are excluded: two members that differ only in those fields
/// are the same member for harmonization purposes.
pub fn member_hash(
    member_id: i64,
    label_norm: &str,
    parent_member_id: Option<i64>,
    uom_code: Option<i64>,
) -> ArtifactHash {
    let key = format!(
        "{}|{}|{}|{}",
        member_id,
        label_norm,
        parent_member_id.map(|p| p.to_string()).unwrap_or_default(),
        uom_code.map(|u| u.to_string()).unwrap_or_default(),
    );
    ArtifactHash::digest(key.as_bytes())
}

/// Hash a dimension from its member hashes.
///
/// Callers must pass member hashes sorted by ascending member id; the
/// ordering is part of the identity.
pub fn dimension_hash<S: AsRef<str>>(member_hashes: &[S]) -> ArtifactHash {
    let joined = member_hashes
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("|");
    ArtifactHash::digest(joined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_prefix() {
        // SHA-256("hello world") = b94d27b9934d...
        let hash = ArtifactHash::digest(b"hello world");
        assert_eq!(hash.as_str(), "b94d27b9934d");
        assert_eq!(hash.fanout_prefix(), "b9");
    }

    #[test]
    fn parse_validates() {
        assert!(ArtifactHash::parse("b94d27b9934d").is_ok());
        assert!(ArtifactHash::parse("B94D27B9934D").is_err());
        assert!(ArtifactHash::parse("b94d27").is_err());
        assert!(ArtifactHash::parse("zzzzzzzzzzzz").is_err());
    }

    #[test]
    fn streaming_matches_oneshot() {
        let data = b"some longer payload for incremental hashing";
        let mut hasher = ArtifactHash::hasher();
        hasher.update(&data[..10]);
        hasher.update(&data[10..]);
        assert_eq!(hasher.finalize(), ArtifactHash::digest(data));
    }

    #[test]
    fn member_hash_null_sentinels() {
        // Absent parent and UOM encode as empty fields, so the key for a
        // root member is "1|canada||".
        let with_nulls = member_hash(1, "canada", None, None);
        let expected = ArtifactHash::digest(b"1|canada||");
        assert_eq!(with_nulls, expected);

        // A present parent must change the hash.
        assert_ne!(with_nulls, member_hash(1, "canada", Some(2), None));
    }

    #[test]
    fn member_hash_case_insensitive_via_normalized_label() {
        // The caller normalizes the label; identical normalized labels
        // yield identical hashes regardless of source casing.
        let a = member_hash(1, &crate::member_label_norm("Canada"), None, None);
        let b = member_hash(1, &crate::member_label_norm("canada"), None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn dimension_hash_is_pipe_joined() {
        let m = member_hash(1, "canada", None, None);
        let manual = ArtifactHash::digest(format!("{}|{}", m, m).as_bytes());
        assert_eq!(dimension_hash(&[m.as_str(), m.as_str()]), manual);
    }

    #[test]
    fn dimension_hash_order_sensitive() {
        let a = member_hash(1, "a", None, None);
        let b = member_hash(2, "b", None, None);
        assert_ne!(
            dimension_hash(&[a.as_str(), b.as_str()]),
            dimension_hash(&[b.as_str(), a.as_str()])
        );
    }
}

//! Core domain types and shared logic for cubehouse.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Product identifiers for StatCan cubes
//! - Artifact content hashes and the member/dimension hashing scheme
//! - Label normalization for cross-cube deduplication
//! - Configuration types shared by the pipeline and CLI

pub mod config;
pub mod error;
pub mod hash;
pub mod labels;
pub mod product;

pub use error::{Error, Result};
pub use hash::{dimension_hash, member_hash, ArtifactHash};
pub use labels::{member_label_norm, title_case, EnglishNormalizer, LabelNormalizer};
pub use product::ProductId;

/// Sentinel product id recorded in the change log for dates with no changes.
pub const NO_CHANGES_MARKER: i64 = -1;

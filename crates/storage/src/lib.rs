//! Content-addressed raw file store.
//!
//! Downloaded WDS artifacts (spine snapshots, cube zips, metadata JSON) are
//! archived under a root directory, addressed by the truncated SHA-256 of
//! their content. Publishing is atomic (temp file + fsync + rename) so a
//! crashed download never leaves a partial file at a final path.

pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{ArtifactKind, ContentStore, StoredArtifact};

//! Filesystem content store.

use crate::error::{StorageError, StorageResult};
use cubehouse_core::ArtifactHash;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming verification reads (64 KiB).
const VERIFY_CHUNK_SIZE: usize = 64 * 1024;

/// The three artifact families archived by the pipeline.
///
/// Each family gets its own subroot so a cube zip and a metadata file with
/// a colliding hash prefix can never shadow each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Full-catalog spine snapshots (JSON).
    Spine,
    /// Cube CSV downloads (ZIP).
    Cube,
    /// Per-cube bilingual metadata (JSON).
    Metadata,
}

impl ArtifactKind {
    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Spine => "spine",
            Self::Cube => "cubes",
            Self::Metadata => "metadata",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Spine => "json",
            Self::Cube => "zip",
            Self::Metadata => "json",
        }
    }
}

/// Handle to an archived artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredArtifact {
    pub hash: ArtifactHash,
    pub path: PathBuf,
}

/// Content-addressed store rooted at a directory.
///
/// Layout: `<root>/<family>/<hh>/<hash12>.<ext>` where `hh` is the first
/// two hex characters of the hash.
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if necessary) a store at the given root.
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for a hash within a family.
    pub fn path_for(&self, kind: ArtifactKind, hash: &ArtifactHash) -> PathBuf {
        self.root
            .join(kind.subdir())
            .join(hash.fanout_prefix())
            .join(format!("{}.{}", hash, kind.extension()))
    }

    /// Archive a payload, returning its hash and final path.
    ///
    /// Idempotent: if the content is already archived the existing path is
    /// returned without rewriting. Publishing is temp file + fsync +
    /// rename, so concurrent puts of the same payload race benignly.
    #[instrument(skip(self, payload), fields(kind = ?kind, size = payload.len()))]
    pub async fn put(&self, kind: ArtifactKind, payload: &[u8]) -> StorageResult<StoredArtifact> {
        let hash = ArtifactHash::digest(payload);
        let path = self.path_for(kind, &hash);

        if fs::try_exists(&path).await? {
            tracing::debug!(hash = %hash, "artifact already archived");
            return Ok(StoredArtifact { hash, path });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers of the same hash never
        // clobber each other's in-flight file.
        let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(payload).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;

        tracing::debug!(hash = %hash, path = %path.display(), "artifact archived");
        Ok(StoredArtifact { hash, path })
    }

    /// Stream a file and compare its content hash against `expected`.
    ///
    /// Returns `Ok(false)` on mismatch and `Err(NotFound)` when the file
    /// is gone; the caller decides how to reconcile.
    #[instrument(skip(self, expected), fields(path = %path.as_ref().display()))]
    pub async fn verify(
        &self,
        path: impl AsRef<Path>,
        expected: &ArtifactHash,
    ) -> StorageResult<bool> {
        let path = path.as_ref();
        let mut file = fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let mut hasher = ArtifactHash::hasher();
        let mut buf = vec![0u8; VERIFY_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(&hasher.finalize() == expected)
    }

    /// Best-effort removal of an archived file.
    ///
    /// Missing files are not an error; the registry row is the caller's
    /// problem.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub async fn delete(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        match fs::remove_file(path.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Verify the root directory exists and is a directory.
    pub async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let stored = store.put(ArtifactKind::Cube, b"payload").await.unwrap();
        assert!(stored.path.starts_with(dir.path().join("cubes")));
        assert!(stored
            .path
            .to_string_lossy()
            .ends_with(&format!("{}.zip", stored.hash)));

        let prefix_dir = stored.path.parent().unwrap();
        assert_eq!(
            prefix_dir.file_name().unwrap().to_string_lossy(),
            stored.hash.fanout_prefix()
        );
    }

    #[tokio::test]
    async fn put_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let first = store.put(ArtifactKind::Metadata, b"{\"a\":1}").await.unwrap();
        let second = store.put(ArtifactKind::Metadata, b"{\"a\":1}").await.unwrap();
        assert_eq!(first, second);

        // Only one physical file under the family root.
        let mut count = 0;
        let mut stack = vec![dir.path().join("metadata")];
        while let Some(d) = stack.pop() {
            for entry in std::fs::read_dir(d).unwrap() {
                let entry = entry.unwrap();
                if entry.file_type().unwrap().is_dir() {
                    stack.push(entry.path());
                } else {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn verify_detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let stored = store.put(ArtifactKind::Cube, b"full content here").await.unwrap();
        assert!(store.verify(&stored.path, &stored.hash).await.unwrap());

        std::fs::write(&stored.path, b"full").unwrap();
        assert!(!store.verify(&stored.path, &stored.hash).await.unwrap());
    }

    #[tokio::test]
    async fn verify_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let hash = ArtifactHash::digest(b"never stored");
        let path = store.path_for(ArtifactKind::Spine, &hash);
        match store.verify(&path, &hash).await {
            Err(StorageError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_is_tolerant() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let stored = store.put(ArtifactKind::Cube, b"bye").await.unwrap();
        store.delete(&stored.path).await.unwrap();
        assert!(!stored.path.exists());

        // Deleting again is fine.
        store.delete(&stored.path).await.unwrap();
    }
}

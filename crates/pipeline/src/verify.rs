//! Verifier: reconcile the content store against the artifact registry.

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use cubehouse_core::ArtifactHash;
use cubehouse_storage::StorageError;

/// Counters for one artifact family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub checked: u64,
    pub ok: u64,
    pub repaired: u64,
}

/// Verification report across the three families.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyReport {
    pub spine: VerifySummary,
    pub cubes: VerifySummary,
    pub metadata: VerifySummary,
}

enum FileState {
    Ok,
    Missing,
    Corrupt,
}

/// Check every active artifact row: the file must exist and stream-hash to
/// its recorded `file_hash`. Mismatch or absence deletes the file (when
/// present) and the row, and flags the key pending so the next fetch pass
/// restores it.
pub async fn verify_files(ctx: &PipelineContext) -> PipelineResult<VerifyReport> {
    let mut report = VerifyReport::default();

    if let Some(row) = ctx.warehouse.active_spine().await? {
        report.spine.checked += 1;
        match check_file(ctx, &row.storage_location, &row.file_hash).await? {
            FileState::Ok => report.spine.ok += 1,
            state => {
                repair_file(ctx, &row.storage_location, matches!(state, FileState::Corrupt)).await?;
                ctx.warehouse.invalidate_spine_artifact(row.id).await?;
                report.spine.repaired += 1;
                tracing::warn!(hash = %row.file_hash, "spine artifact repaired");
            }
        }
    }

    for row in ctx.warehouse.active_cubes().await? {
        report.cubes.checked += 1;
        match check_file(ctx, &row.storage_location, &row.file_hash).await? {
            FileState::Ok => report.cubes.ok += 1,
            state => {
                repair_file(ctx, &row.storage_location, matches!(state, FileState::Corrupt)).await?;
                ctx.warehouse
                    .invalidate_cube_artifact(row.id, row.productid)
                    .await?;
                report.cubes.repaired += 1;
                tracing::warn!(productid = row.productid, hash = %row.file_hash, "cube artifact repaired");
            }
        }
    }

    for row in ctx.warehouse.active_metadata_files().await? {
        report.metadata.checked += 1;
        match check_file(ctx, &row.storage_location, &row.file_hash).await? {
            FileState::Ok => report.metadata.ok += 1,
            state => {
                repair_file(ctx, &row.storage_location, matches!(state, FileState::Corrupt)).await?;
                ctx.warehouse
                    .invalidate_metadata_artifact(row.id, row.productid)
                    .await?;
                report.metadata.repaired += 1;
                tracing::warn!(productid = row.productid, hash = %row.file_hash, "metadata artifact repaired");
            }
        }
    }

    tracing::info!(
        spine = ?report.spine,
        cubes = ?report.cubes,
        metadata = ?report.metadata,
        "verification complete"
    );
    Ok(report)
}

async fn check_file(
    ctx: &PipelineContext,
    path: &str,
    recorded_hash: &str,
) -> PipelineResult<FileState> {
    // An unparseable recorded hash can never match its file.
    let Ok(expected) = ArtifactHash::parse(recorded_hash) else {
        tracing::warn!(path = path, hash = recorded_hash, "malformed recorded hash");
        return Ok(FileState::Corrupt);
    };

    match ctx.content.verify(path, &expected).await {
        Ok(true) => Ok(FileState::Ok),
        Ok(false) => Ok(FileState::Corrupt),
        Err(StorageError::NotFound(_)) => Ok(FileState::Missing),
        Err(e) => Err(e.into()),
    }
}

async fn repair_file(ctx: &PipelineContext, path: &str, delete: bool) -> PipelineResult<()> {
    if delete {
        ctx.content.delete(path).await?;
    }
    Ok(())
}

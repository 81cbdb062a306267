//! Ingestion scheduler: the per-artifact fetch state machine.
//!
//! Three pipelines share one shape: find pending keys, fetch, archive,
//! record the outcome in a single warehouse transaction. Fetch failures
//! are recovered locally (logged, key left pending) so a pass always
//! makes monotonic progress; warehouse and storage failures are fatal.

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use cubehouse_core::{ArtifactHash, ProductId};
use cubehouse_metadata::models::DownloadOutcome;
use cubehouse_storage::ArtifactKind;
use cubehouse_wds::parse_spine;
use futures::StreamExt;
use time::{Date, OffsetDateTime, Time};
use tokio_util::sync::CancellationToken;

/// Result of a spine fetch pass.
#[derive(Debug, Clone)]
pub struct SpineFetchSummary {
    pub outcome: DownloadOutcome,
    pub hash: ArtifactHash,
    pub cube_count: usize,
}

/// Result of a change discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    pub days_checked: u32,
    pub changes_recorded: u64,
    pub flagged: u64,
}

/// Result of a status seeding pass.
#[derive(Debug, Clone, Default)]
pub struct SeedSummary {
    pub cubes_seeded: u64,
    pub metadata_seeded: u64,
}

/// Result of a fetch loop pass.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub attempted: usize,
    pub adopted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: usize,
}

enum FetchOutcome {
    Adopted,
    Unchanged,
    Failed,
    Cancelled,
}

impl FetchSummary {
    fn tally(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Adopted => self.adopted += 1,
            FetchOutcome::Unchanged => self.unchanged += 1,
            FetchOutcome::Failed => self.failed += 1,
            FetchOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Fetch the spine snapshot and adopt it if the content changed.
pub async fn fetch_spine(ctx: &PipelineContext) -> PipelineResult<SpineFetchSummary> {
    let bytes = ctx.wds.list_all_cubes().await?;
    let records = parse_spine(&bytes)?;
    validate_spine_snapshot(&records, ctx.config.ingest.spine_min_cubes)?;

    let hash = ArtifactHash::digest(&bytes);
    let now = OffsetDateTime::now_utc();

    // Identical to the active snapshot: refresh status, drop the bytes.
    if let Some(active) = ctx.warehouse.active_spine().await? {
        if active.file_hash == hash.as_str() {
            ctx.warehouse
                .record_spine_download(&active.file_hash, &active.storage_location, now)
                .await?;
            tracing::info!(hash = %hash, "spine unchanged");
            return Ok(SpineFetchSummary {
                outcome: DownloadOutcome::Unchanged,
                hash,
                cube_count: records.len(),
            });
        }
    }

    let stored = ctx.content.put(ArtifactKind::Spine, &bytes).await?;
    let outcome = ctx
        .warehouse
        .record_spine_download(
            stored.hash.as_str(),
            &stored.path.to_string_lossy(),
            now,
        )
        .await?;
    tracing::info!(hash = %stored.hash, cubes = records.len(), outcome = ?outcome, "spine snapshot recorded");

    Ok(SpineFetchSummary {
        outcome,
        hash: stored.hash,
        cube_count: records.len(),
    })
}

/// Reject truncated or structurally broken snapshots before archiving.
fn validate_spine_snapshot(
    records: &[cubehouse_wds::SpineCubeRecord],
    min_cubes: usize,
) -> PipelineResult<()> {
    if records.len() < min_cubes {
        return Err(PipelineError::SpineRejected(format!(
            "only {} cubes returned, expected at least {min_cubes}",
            records.len()
        )));
    }

    for (i, record) in records.iter().take(10).enumerate() {
        match record.product_id {
            Some(pid) if pid > 0 => {}
            other => {
                return Err(PipelineError::SpineRejected(format!(
                    "record {i} has invalid product id {other:?}"
                )));
            }
        }
        if record
            .cube_title_en
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(PipelineError::SpineRejected(format!(
                "record {i} (product {:?}) has an empty English title",
                record.product_id
            )));
        }
    }
    Ok(())
}

/// Walk the change feed from the last checked date through the effective
/// release date, then flag affected cubes for re-download.
pub async fn discover_changes(ctx: &PipelineContext) -> PipelineResult<DiscoverySummary> {
    let cutoff = ctx.config.ingest.release_cutoff()?;
    let today = effective_release_date(OffsetDateTime::now_utc(), cutoff);

    let last_checked = ctx.warehouse.last_checked_date().await?;
    let spine_date = ctx
        .warehouse
        .spine_status()
        .await?
        .last_download
        .map(|t| t.date());
    let baseline_anchor = ctx
        .config
        .ingest
        .change_baseline
        .previous_day()
        .unwrap_or(ctx.config.ingest.change_baseline);

    let anchor = [last_checked, spine_date]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(baseline_anchor);

    let mut summary = DiscoverySummary::default();
    let mut current = anchor.next_day();

    while let Some(date) = current {
        if date > today {
            break;
        }
        match ctx.wds.changed_cube_list(date).await {
            Ok(entries) => {
                let productids: Vec<i64> =
                    entries.iter().filter_map(|e| e.product_id).collect();
                let inserted = ctx.warehouse.record_changes(date, &productids).await?;
                summary.days_checked += 1;
                summary.changes_recorded += inserted;
                tracing::info!(date = %date, changes = productids.len(), "change feed checked");
            }
            Err(e) => {
                // Stop the scan: recording later dates would advance the
                // cursor past this one and it would never be revisited.
                tracing::warn!(date = %date, error = %e, "change feed failed, stopping scan");
                break;
            }
        }
        current = date.next_day();
    }

    summary.flagged = flag_pending_from_changes(ctx).await?;
    Ok(summary)
}

/// Flag every cube whose logged change postdates its last download,
/// measured against the daily release instant.
pub async fn flag_pending_from_changes(ctx: &PipelineContext) -> PipelineResult<u64> {
    let cutoff = ctx.config.ingest.release_cutoff()?;
    let mut flagged = 0u64;

    for change in ctx.warehouse.latest_change_dates().await? {
        let (productid, change_date) = (change.productid, change.change_date);
        let Some(status) = ctx.warehouse.cube_status(productid).await? else {
            // Not seeded yet; seeding will start it pending anyway.
            continue;
        };
        if status.download_pending {
            continue;
        }

        let released_at = change_date.with_time(cutoff).assume_utc();
        let stale = match status.last_download {
            None => true,
            Some(last) => last < released_at,
        };
        if stale {
            ctx.warehouse.mark_cube_pending(productid).await?;
            flagged += 1;
            tracing::debug!(productid = productid, change_date = %change_date, "cube flagged for download");
        }
    }

    Ok(flagged)
}

/// Seed status rows for every catalog product missing one.
pub async fn seed_status(ctx: &PipelineContext) -> PipelineResult<SeedSummary> {
    let mut summary = SeedSummary::default();
    for productid in ctx.warehouse.spine_product_ids().await? {
        if ctx.warehouse.ensure_cube_status(productid).await? {
            summary.cubes_seeded += 1;
        }
        if ctx.warehouse.ensure_metadata_status(productid).await? {
            summary.metadata_seeded += 1;
        }
    }
    tracing::info!(
        cubes = summary.cubes_seeded,
        metadata = summary.metadata_seeded,
        "status rows seeded"
    );
    Ok(summary)
}

/// Fetch every pending cube zip through the bounded worker pool.
pub async fn fetch_cubes(
    ctx: &PipelineContext,
    cancel: &CancellationToken,
) -> PipelineResult<FetchSummary> {
    let pending = ctx.warehouse.pending_cubes().await?;
    let workers = ctx.config.ingest.cube_workers.max(1);
    run_fetch_pool(pending, workers, cancel, |pid| fetch_one_cube(ctx, pid)).await
}

/// Fetch every pending metadata document through the bounded worker pool.
pub async fn fetch_metadata(
    ctx: &PipelineContext,
    cancel: &CancellationToken,
) -> PipelineResult<FetchSummary> {
    let pending = ctx.warehouse.pending_metadata().await?;
    let workers = ctx.config.ingest.metadata_workers.max(1);
    run_fetch_pool(pending, workers, cancel, |pid| fetch_one_metadata(ctx, pid)).await
}

async fn run_fetch_pool<'a, F, Fut>(
    pending: Vec<i64>,
    workers: usize,
    cancel: &'a CancellationToken,
    fetch_one: F,
) -> PipelineResult<FetchSummary>
where
    F: Fn(ProductId) -> Fut + 'a,
    Fut: std::future::Future<Output = PipelineResult<FetchOutcome>> + 'a,
{
    let mut summary = FetchSummary {
        attempted: pending.len(),
        ..Default::default()
    };

    let fetch_one = &fetch_one;
    let results: Vec<PipelineResult<FetchOutcome>> = futures::stream::iter(
        pending.into_iter().map(|pid| async move {
            // Cooperative cancellation between claims; in-flight fetches
            // drain naturally.
            if cancel.is_cancelled() {
                return Ok(FetchOutcome::Cancelled);
            }
            fetch_one(ProductId::new(pid)).await
        }),
    )
    .buffer_unordered(workers)
    .collect()
    .await;

    for result in results {
        summary.tally(result?);
    }
    Ok(summary)
}

async fn fetch_one_cube(
    ctx: &PipelineContext,
    productid: ProductId,
) -> PipelineResult<FetchOutcome> {
    let bytes = match ctx.wds.download_cube_csv(productid).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(productid = %productid, error = %e, "cube download failed, left pending");
            ctx.warehouse
                .note_cube_attempt(productid.as_i64(), OffsetDateTime::now_utc())
                .await?;
            return Ok(FetchOutcome::Failed);
        }
    };

    let stored = ctx.content.put(ArtifactKind::Cube, &bytes).await?;
    let outcome = ctx
        .warehouse
        .record_cube_download(
            productid.as_i64(),
            stored.hash.as_str(),
            &stored.path.to_string_lossy(),
            OffsetDateTime::now_utc(),
        )
        .await?;

    tracing::info!(productid = %productid, hash = %stored.hash, outcome = ?outcome, "cube recorded");
    Ok(match outcome {
        DownloadOutcome::Adopted => FetchOutcome::Adopted,
        DownloadOutcome::Unchanged => FetchOutcome::Unchanged,
    })
}

async fn fetch_one_metadata(
    ctx: &PipelineContext,
    productid: ProductId,
) -> PipelineResult<FetchOutcome> {
    let bytes = match ctx.wds.cube_metadata(productid).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(productid = %productid, error = %e, "metadata download failed, left pending");
            ctx.warehouse
                .note_metadata_attempt(productid.as_i64(), OffsetDateTime::now_utc())
                .await?;
            return Ok(FetchOutcome::Failed);
        }
    };

    let stored = ctx.content.put(ArtifactKind::Metadata, &bytes).await?;
    let outcome = ctx
        .warehouse
        .record_metadata_download(
            productid.as_i64(),
            stored.hash.as_str(),
            &stored.path.to_string_lossy(),
            OffsetDateTime::now_utc(),
        )
        .await?;

    tracing::info!(productid = %productid, hash = %stored.hash, outcome = ?outcome, "metadata recorded");
    Ok(match outcome {
        DownloadOutcome::Adopted => FetchOutcome::Adopted,
        DownloadOutcome::Unchanged => FetchOutcome::Unchanged,
    })
}

/// The latest date whose releases are fully published.
///
/// Before the daily cutoff the current date's releases are still rolling
/// out, so the previous day is the effective end of the scan.
fn effective_release_date(now: OffsetDateTime, cutoff: Time) -> Date {
    if now.time() >= cutoff {
        now.date()
    } else {
        now.date().previous_day().unwrap_or_else(|| now.date())
    }
}

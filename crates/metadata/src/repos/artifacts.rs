//! Artifact bookkeeping repositories.
//!
//! Three families share the same lifecycle: at most one `active` row per
//! key, history retained as inactive rows, and a status row driving the
//! scheduler. The spine family is keyless (one logical artifact); cube
//! and metadata are keyed by product id.

use crate::error::WarehouseResult;
use crate::models::{
    CubeArtifactRow, CubeStatusRow, DownloadOutcome, MetadataArtifactRow, MetadataStatusRow,
    SpineArtifactRow, SpineStatusRow,
};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for spine snapshot artifacts.
#[async_trait]
pub trait SpineFileRepo: Send + Sync {
    /// Record a completed spine download in one transaction.
    ///
    /// A hash already present in the family's history is the "no change"
    /// signal: only the status row is refreshed. Otherwise all prior rows
    /// are deactivated and a new active row is inserted.
    async fn record_spine_download(
        &self,
        file_hash: &str,
        storage_location: &str,
        now: OffsetDateTime,
    ) -> WarehouseResult<DownloadOutcome>;

    /// The currently active spine artifact, if any.
    async fn active_spine(&self) -> WarehouseResult<Option<SpineArtifactRow>>;

    /// All spine artifact rows, newest first.
    async fn spine_history(&self) -> WarehouseResult<Vec<SpineArtifactRow>>;

    /// Delete an inactive history row. Removing the active row is refused;
    /// corruption repair goes through [`invalidate_spine_artifact`].
    ///
    /// [`invalidate_spine_artifact`]: SpineFileRepo::invalidate_spine_artifact
    async fn remove_spine_artifact(&self, id: i64) -> WarehouseResult<()>;

    /// Corruption repair: delete the row and set the status pending, in
    /// one transaction.
    async fn invalidate_spine_artifact(&self, id: i64) -> WarehouseResult<()>;

    /// Flag the spine for (re)download.
    async fn mark_spine_pending(&self) -> WarehouseResult<()>;

    /// The singleton spine status row.
    async fn spine_status(&self) -> WarehouseResult<SpineStatusRow>;
}

/// Repository for cube zip artifacts.
#[async_trait]
pub trait CubeFileRepo: Send + Sync {
    /// Record a completed cube download in one transaction; see
    /// [`SpineFileRepo::record_spine_download`] for the dedup contract.
    /// The `(productid, file_hash)` unique constraint backstops the
    /// duplicate check.
    async fn record_cube_download(
        &self,
        productid: i64,
        file_hash: &str,
        storage_location: &str,
        now: OffsetDateTime,
    ) -> WarehouseResult<DownloadOutcome>;

    /// Record a failed attempt: refresh `last_download`, keep the pending
    /// flag so the next pass retries.
    async fn note_cube_attempt(&self, productid: i64, now: OffsetDateTime)
        -> WarehouseResult<()>;

    /// The active artifact for a product, if any.
    async fn active_cube(&self, productid: i64) -> WarehouseResult<Option<CubeArtifactRow>>;

    /// All active cube artifacts, ordered by product id (verifier input).
    async fn active_cubes(&self) -> WarehouseResult<Vec<CubeArtifactRow>>;

    /// A product's artifact rows, newest first.
    async fn cube_history(&self, productid: i64) -> WarehouseResult<Vec<CubeArtifactRow>>;

    /// Delete an inactive history row; refuses the active row.
    async fn remove_cube_artifact(&self, id: i64) -> WarehouseResult<()>;

    /// Corruption repair: delete the row and mark the product pending, in
    /// one transaction.
    async fn invalidate_cube_artifact(&self, id: i64, productid: i64) -> WarehouseResult<()>;

    /// Insert a pending status row if the product has none. Returns true
    /// when a row was created.
    async fn ensure_cube_status(&self, productid: i64) -> WarehouseResult<bool>;

    /// Flag a product for (re)download.
    async fn mark_cube_pending(&self, productid: i64) -> WarehouseResult<()>;

    /// A product's status row.
    async fn cube_status(&self, productid: i64) -> WarehouseResult<Option<CubeStatusRow>>;

    /// All status rows.
    async fn cube_statuses(&self) -> WarehouseResult<Vec<CubeStatusRow>>;

    /// Product ids currently flagged for download, ascending.
    async fn pending_cubes(&self) -> WarehouseResult<Vec<i64>>;
}

/// Repository for metadata JSON artifacts. Identical lifecycle to the cube
/// family plus the raw-load watermark used by the dimension loader.
#[async_trait]
pub trait MetadataFileRepo: Send + Sync {
    async fn record_metadata_download(
        &self,
        productid: i64,
        file_hash: &str,
        storage_location: &str,
        now: OffsetDateTime,
    ) -> WarehouseResult<DownloadOutcome>;

    async fn note_metadata_attempt(
        &self,
        productid: i64,
        now: OffsetDateTime,
    ) -> WarehouseResult<()>;

    async fn active_metadata(&self, productid: i64)
        -> WarehouseResult<Option<MetadataArtifactRow>>;

    async fn active_metadata_files(&self) -> WarehouseResult<Vec<MetadataArtifactRow>>;

    async fn metadata_history(&self, productid: i64)
        -> WarehouseResult<Vec<MetadataArtifactRow>>;

    async fn remove_metadata_artifact(&self, id: i64) -> WarehouseResult<()>;

    async fn invalidate_metadata_artifact(&self, id: i64, productid: i64) -> WarehouseResult<()>;

    async fn ensure_metadata_status(&self, productid: i64) -> WarehouseResult<bool>;

    async fn mark_metadata_pending(&self, productid: i64) -> WarehouseResult<()>;

    async fn metadata_status(&self, productid: i64)
        -> WarehouseResult<Option<MetadataStatusRow>>;

    async fn pending_metadata(&self) -> WarehouseResult<Vec<i64>>;

    /// Products whose fetched metadata has not been parsed into the raw
    /// dictionary tables yet: not pending, fetched hash differs from the
    /// loaded watermark.
    async fn metadata_ready_for_load(&self) -> WarehouseResult<Vec<MetadataStatusRow>>;

    /// Advance the raw-load watermark after a successful parse.
    async fn set_metadata_loaded_hash(
        &self,
        productid: i64,
        file_hash: &str,
    ) -> WarehouseResult<()>;
}

//! Processed and canonical registry repository.
//!
//! Each layer is rebuilt wholesale by the registry builder, so every write
//! here is truncate-and-insert inside one transaction. Rebuilding the same
//! input twice must produce byte-identical tables.

use crate::error::WarehouseResult;
use crate::models::{
    DimensionSetMemberRow, DimensionSetRow, ProcessedDimensionRow, ProcessedMemberRow,
};
use async_trait::async_trait;

/// Repository for the processed and canonical dimension tables.
#[async_trait]
pub trait RegistryRepo: Send + Sync {
    /// Rebuild `processed_member`.
    async fn replace_processed_members(
        &self,
        rows: &[ProcessedMemberRow],
    ) -> WarehouseResult<()>;

    /// Rebuild `processed_dimension` and backfill `dimension_hash` onto
    /// each product's processed members, in one transaction.
    async fn replace_processed_dimensions(
        &self,
        rows: &[ProcessedDimensionRow],
    ) -> WarehouseResult<()>;

    async fn processed_members(&self) -> WarehouseResult<Vec<ProcessedMemberRow>>;

    async fn processed_dimensions(&self) -> WarehouseResult<Vec<ProcessedDimensionRow>>;

    /// Rebuild the canonical `dimension_set`.
    async fn replace_dimension_set(&self, rows: &[DimensionSetRow]) -> WarehouseResult<()>;

    /// Rebuild the canonical `dimension_set_member`.
    async fn replace_dimension_set_members(
        &self,
        rows: &[DimensionSetMemberRow],
    ) -> WarehouseResult<()>;

    async fn dimension_set(&self) -> WarehouseResult<Vec<DimensionSetRow>>;

    async fn dimension_set_members(&self) -> WarehouseResult<Vec<DimensionSetMemberRow>>;

    /// Overwrite `base_name` for the given canonical members. Returns the
    /// number of rows updated.
    async fn update_member_base_names(
        &self,
        names: &[(String, i64, String)],
    ) -> WarehouseResult<u64>;
}

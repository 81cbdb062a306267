//! Raw dictionary repository.

use crate::error::WarehouseResult;
use crate::models::{RawDimensionRow, RawMemberRow};
use async_trait::async_trait;

/// Repository for the raw dimension and member tables.
#[async_trait]
pub trait DictionaryRepo: Send + Sync {
    /// Replace one product's raw rows in a single transaction: delete the
    /// product's dimensions and members, then insert the new parse.
    ///
    /// The per-product delete keeps a metadata refresh from leaving stale
    /// members behind when a dimension shrinks.
    async fn replace_raw_product(
        &self,
        productid: i64,
        dimensions: &[RawDimensionRow],
        members: &[RawMemberRow],
    ) -> WarehouseResult<()>;

    /// Every raw dimension row, ordered by (productid, position).
    async fn raw_dimensions(&self) -> WarehouseResult<Vec<RawDimensionRow>>;

    /// Every raw member row, ordered by (productid, position, member_id).
    async fn raw_members(&self) -> WarehouseResult<Vec<RawMemberRow>>;

    /// Row counts, for operator summaries.
    async fn raw_counts(&self) -> WarehouseResult<(u64, u64)>;
}

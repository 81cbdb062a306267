//! Change detection log repository.

use crate::error::WarehouseResult;
use crate::models::ChangedCubeRow;
use async_trait::async_trait;
use time::Date;

/// Repository for the append-only change log.
#[async_trait]
pub trait ChangeLogRepo: Send + Sync {
    /// Record the changed products reported for a date. An empty slice
    /// records the no-changes marker so the scan never revisits the date.
    /// Duplicate (productid, date) pairs are ignored. Returns the number
    /// of rows actually inserted.
    async fn record_changes(&self, date: Date, productids: &[i64]) -> WarehouseResult<u64>;

    /// The most recent date present in the log (markers included), i.e.
    /// the last date the upstream change feed was checked.
    async fn last_checked_date(&self) -> WarehouseResult<Option<Date>>;

    /// Latest change date per product, markers excluded.
    async fn latest_change_dates(&self) -> WarehouseResult<Vec<ChangedCubeRow>>;
}

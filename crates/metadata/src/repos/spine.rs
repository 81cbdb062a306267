//! Spine catalog repository.

use crate::error::WarehouseResult;
use crate::models::{CubeSubjectRow, CubeSurveyRow, SpineCubeRow};
use async_trait::async_trait;

/// Repository for the cube catalog tables.
///
/// The spine is small enough that full replacement is the contract; there
/// is no incremental diffing.
#[async_trait]
pub trait SpineRepo: Send + Sync {
    /// Replace the entire catalog in one transaction: truncate the three
    /// tables, then bulk insert the new rows.
    async fn replace_spine(
        &self,
        cubes: &[SpineCubeRow],
        subjects: &[CubeSubjectRow],
        surveys: &[CubeSurveyRow],
    ) -> WarehouseResult<()>;

    /// All catalog product ids, ascending. Drives status seeding.
    async fn spine_product_ids(&self) -> WarehouseResult<Vec<i64>>;

    /// Number of cubes in the catalog.
    async fn spine_cube_count(&self) -> WarehouseResult<u64>;

    /// One catalog row.
    async fn spine_cube(&self, productid: i64) -> WarehouseResult<Option<SpineCubeRow>>;

    /// Subject links for a product.
    async fn cube_subjects(&self, productid: i64) -> WarehouseResult<Vec<CubeSubjectRow>>;

    /// Survey links for a product.
    async fn cube_surveys(&self, productid: i64) -> WarehouseResult<Vec<CubeSurveyRow>>;
}

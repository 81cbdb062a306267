//! Database models mapping to the warehouse schema.

use sqlx::FromRow;
use time::{Date, OffsetDateTime};

// =============================================================================
// raw_files: artifact bookkeeping
// =============================================================================

/// Spine snapshot artifact record.
#[derive(Debug, Clone, FromRow)]
pub struct SpineArtifactRow {
    pub id: i64,
    pub file_hash: String,
    pub download_time: OffsetDateTime,
    pub active: bool,
    pub storage_location: String,
}

/// Cube zip artifact record.
#[derive(Debug, Clone, FromRow)]
pub struct CubeArtifactRow {
    pub id: i64,
    pub productid: i64,
    pub file_hash: String,
    pub download_time: OffsetDateTime,
    pub active: bool,
    pub storage_location: String,
}

/// Metadata JSON artifact record. Same shape as the cube family.
#[derive(Debug, Clone, FromRow)]
pub struct MetadataArtifactRow {
    pub id: i64,
    pub productid: i64,
    pub file_hash: String,
    pub download_time: OffsetDateTime,
    pub active: bool,
    pub storage_location: String,
}

/// Singleton spine download status.
#[derive(Debug, Clone, FromRow)]
pub struct SpineStatusRow {
    pub last_download: Option<OffsetDateTime>,
    pub download_pending: bool,
    pub last_file_hash: Option<String>,
}

/// Per-cube download status.
#[derive(Debug, Clone, FromRow)]
pub struct CubeStatusRow {
    pub productid: i64,
    pub last_download: Option<OffsetDateTime>,
    pub download_pending: bool,
    pub last_file_hash: Option<String>,
}

/// Per-cube metadata download status, with the raw-load watermark.
#[derive(Debug, Clone, FromRow)]
pub struct MetadataStatusRow {
    pub productid: i64,
    pub last_download: Option<OffsetDateTime>,
    pub download_pending: bool,
    pub last_file_hash: Option<String>,
    pub last_loaded_hash: Option<String>,
}

/// Change log entry.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChangedCubeRow {
    pub productid: i64,
    pub change_date: Date,
}

/// Outcome of recording a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// New content: archived and promoted to the active row.
    Adopted,
    /// Hash already known for this key; only status was refreshed.
    Unchanged,
}

// =============================================================================
// spine: cube catalog
// =============================================================================

/// Catalog entry for one cube.
#[derive(Debug, Clone, FromRow)]
pub struct SpineCubeRow {
    pub productid: i64,
    pub cansim_id: Option<String>,
    pub title_en: String,
    pub title_fr: Option<String>,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
    pub release_date: Option<Date>,
    pub archived: Option<i64>,
    pub frequency_code: Option<i64>,
    pub issue_date: Option<Date>,
}

/// Cube-to-subject link.
#[derive(Debug, Clone, FromRow)]
pub struct CubeSubjectRow {
    pub productid: i64,
    pub subject_code: String,
}

/// Cube-to-survey link.
#[derive(Debug, Clone, FromRow)]
pub struct CubeSurveyRow {
    pub productid: i64,
    pub survey_code: String,
}

// =============================================================================
// dictionary: raw -> processed -> canonical
// =============================================================================

/// Raw dimension definition as parsed from cube metadata.
#[derive(Debug, Clone, FromRow)]
pub struct RawDimensionRow {
    pub productid: i64,
    pub dimension_position: i64,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub has_uom: Option<bool>,
}

/// Raw member definition as parsed from cube metadata.
#[derive(Debug, Clone, FromRow)]
pub struct RawMemberRow {
    pub productid: i64,
    pub dimension_position: i64,
    pub member_id: i64,
    pub parent_member_id: Option<i64>,
    pub classification_code: Option<String>,
    pub classification_type_code: Option<String>,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub uom_code: Option<i64>,
    pub geo_level: Option<i64>,
    pub vintage: Option<i64>,
    pub terminated: bool,
}

/// Raw member enriched with its identity hash.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProcessedMemberRow {
    pub productid: i64,
    pub dimension_position: i64,
    pub member_id: i64,
    pub member_hash: String,
    pub dimension_hash: Option<String>,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub parent_member_id: Option<i64>,
    pub uom_code: Option<i64>,
    pub member_label_norm: String,
}

/// Per-cube dimension with its structural hash.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProcessedDimensionRow {
    pub productid: i64,
    pub dimension_position: i64,
    pub dimension_hash: String,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub has_uom: bool,
}

/// Canonical (deduplicated) dimension definition.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DimensionSetRow {
    pub dimension_hash: String,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub usage_count: i64,
    pub has_uom: bool,
    pub is_tree: bool,
    pub is_hetero: bool,
    pub has_total: bool,
    pub is_grabbag: bool,
    pub is_exclusive: Option<bool>,
}

/// Canonical member definition within a dimension.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DimensionSetMemberRow {
    pub dimension_hash: String,
    pub member_id: i64,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub parent_member_id: Option<i64>,
    pub uom_code: Option<i64>,
    pub usage_count: i64,
    pub tree_level: Option<i64>,
    pub base_name: Option<String>,
}

//! Pipeline error types.

use thiserror::Error;

/// Errors surfaced by pipeline phases.
///
/// Per-artifact failures are recovered inside the fetch loops and never
/// reach this type; what does reach it is phase-fatal (warehouse down,
/// storage root unwritable, active artifact missing).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Warehouse(#[from] cubehouse_metadata::WarehouseError),

    #[error(transparent)]
    Storage(#[from] cubehouse_storage::StorageError),

    #[error(transparent)]
    Wds(#[from] cubehouse_wds::WdsError),

    #[error(transparent)]
    Core(#[from] cubehouse_core::Error),

    #[error("no active {0} artifact; run the fetch stage first")]
    NoActiveArtifact(&'static str),

    #[error("spine snapshot rejected: {0}")]
    SpineRejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

//! Typed client for the Statistics Canada Web Data Service (WDS).
//!
//! Four remote operations, retried with backoff and paced below StatCan's
//! published rate floor. The client returns raw payload bytes (or a thin
//! typed projection for the change feed) and never touches disk or the
//! warehouse; that is the scheduler's job.

pub mod client;
pub mod error;
pub mod payload;

pub use client::{HttpWdsClient, WdsApi};
pub use error::{WdsError, WdsResult};
pub use payload::{
    parse_cube_metadata, parse_download_envelope, parse_spine, ChangedCubeEntry, CubeMetadata,
    DimensionMeta, MemberMeta, SpineCubeRecord,
};

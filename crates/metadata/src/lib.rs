//! SQLite warehouse store for cubehouse.
//!
//! Bookkeeping for the three artifact families (spine snapshots, cube
//! zips, metadata JSON), the change-detection log, the spine catalog, and
//! the raw/processed/canonical dimension layers.

pub mod error;
pub mod models;
pub mod repos;
pub mod sqlite;
pub mod store;

pub use error::{WarehouseError, WarehouseResult};
pub use store::{SqliteStore, WarehouseStore};

//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Time;

/// Top-level application configuration.
///
/// Loaded by the CLI from a TOML file merged with `CUBEHOUSE_`-prefixed
/// environment variables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wds: WdsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Configuration rooted under a scratch directory.
    ///
    /// **For testing only.** Network settings point at the production WDS
    /// host but tests inject a stub client and never dial out.
    pub fn for_testing(base: &Path) -> Self {
        Self {
            database: DatabaseConfig {
                path: base.join("warehouse.db"),
            },
            storage: StorageConfig {
                root: base.join("raw"),
            },
            wds: WdsConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// SQLite warehouse location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Raw-file archive location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the content-addressed store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Upstream WDS client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WdsConfig {
    /// Base URL of the WDS REST endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// User-Agent sent on every request. StatCan requires one.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Deadline for metadata-class calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Deadline for cube zip downloads, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Politeness floor between metadata-class calls, in milliseconds.
    #[serde(default = "default_metadata_delay_ms")]
    pub metadata_delay_ms: u64,
    /// Politeness floor between cube downloads, in milliseconds.
    #[serde(default = "default_cube_delay_ms")]
    pub cube_delay_ms: u64,
    /// Attempts per call before a transient failure is surfaced.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between retries, doubled per attempt, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for WdsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            metadata_delay_ms: default_metadata_delay_ms(),
            cube_delay_ms: default_cube_delay_ms(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// Scheduler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Concurrent workers in the cube fetch pool.
    #[serde(default = "default_workers")]
    pub cube_workers: usize,
    /// Concurrent workers in the metadata fetch pool.
    #[serde(default = "default_workers")]
    pub metadata_workers: usize,
    /// First date checked when the change log is empty (ISO date).
    #[serde(default = "default_change_baseline")]
    pub change_baseline: time::Date,
    /// Daily release cutoff, UTC, as `HH:MM`.
    ///
    /// StatCan publishes at 08:30 local Eastern time; the source never
    /// states the zone, so the cutoff is configurable and defaults to the
    /// Eastern release expressed in UTC.
    #[serde(default = "default_release_cutoff")]
    pub release_cutoff_utc: String,
    /// Minimum cube count a spine snapshot must carry to be archived.
    /// Protects the catalog from truncated upstream responses.
    #[serde(default = "default_spine_min_cubes")]
    pub spine_min_cubes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cube_workers: default_workers(),
            metadata_workers: default_workers(),
            change_baseline: default_change_baseline(),
            release_cutoff_utc: default_release_cutoff(),
            spine_min_cubes: default_spine_min_cubes(),
        }
    }
}

impl IngestConfig {
    /// Parse the release cutoff into a wall-clock time.
    pub fn release_cutoff(&self) -> crate::Result<Time> {
        let format = time::macros::format_description!("[hour]:[minute]");
        Time::parse(&self.release_cutoff_utc, format).map_err(|e| {
            crate::Error::Config(format!(
                "invalid release_cutoff_utc '{}': {e}",
                self.release_cutoff_utc
            ))
        })
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cubehouse.db")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("raw")
}

fn default_base_url() -> String {
    "https://www150.statcan.gc.ca/t1/wds/rest".to_string()
}

fn default_user_agent() -> String {
    format!("cubehouse/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_metadata_delay_ms() -> u64 {
    1000
}

fn default_cube_delay_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_workers() -> usize {
    4
}

fn default_change_baseline() -> time::Date {
    time::macros::date!(2024 - 01 - 01)
}

fn default_release_cutoff() -> String {
    // 08:30 Eastern == 13:30 UTC during standard time.
    "13:30".to_string()
}

fn default_spine_min_cubes() -> usize {
    1000
}

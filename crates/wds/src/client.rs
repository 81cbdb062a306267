//! HTTP client for the WDS REST endpoints.

use crate::error::{WdsError, WdsResult};
use crate::payload::{self, ChangedCubeEntry};
use async_trait::async_trait;
use bytes::Bytes;
use cubehouse_core::config::WdsConfig;
use cubehouse_core::ProductId;
use std::time::{Duration, Instant};
use time::Date;
use tokio::sync::Mutex;
use tracing::instrument;

/// The four WDS operations the pipeline depends on.
///
/// Injectable so the scheduler can run against a stub in tests.
#[async_trait]
pub trait WdsApi: Send + Sync {
    /// Full catalog snapshot (`getAllCubesListLite`), raw JSON bytes.
    async fn list_all_cubes(&self) -> WdsResult<Bytes>;

    /// Cubes changed on a date (`getChangedCubeList`), entries with a
    /// success status code only.
    async fn changed_cube_list(&self, date: Date) -> WdsResult<Vec<ChangedCubeEntry>>;

    /// Bilingual cube metadata (`getCubeMetadata`), raw JSON bytes.
    async fn cube_metadata(&self, productid: ProductId) -> WdsResult<Bytes>;

    /// Cube CSV zip (`getFullTableDownloadCSV` + signed URL), raw bytes.
    async fn download_cube_csv(&self, productid: ProductId) -> WdsResult<Bytes>;
}

/// Politeness class of a call; each class has its own rate floor.
#[derive(Clone, Copy, Debug)]
enum CallClass {
    Metadata,
    CubeDownload,
}

/// Production WDS client over reqwest.
pub struct HttpWdsClient {
    http: reqwest::Client,
    config: WdsConfig,
    metadata_gate: Mutex<Option<Instant>>,
    cube_gate: Mutex<Option<Instant>>,
}

impl HttpWdsClient {
    pub fn new(config: WdsConfig) -> WdsResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| WdsError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            http,
            config,
            metadata_gate: Mutex::new(None),
            cube_gate: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Enforce the politeness floor for a call class.
    ///
    /// The gate is held across the wait so concurrent workers serialize on
    /// the upstream host instead of bursting.
    async fn pace(&self, class: CallClass) {
        let (gate, floor) = match class {
            CallClass::Metadata => (
                &self.metadata_gate,
                Duration::from_millis(self.config.metadata_delay_ms),
            ),
            CallClass::CubeDownload => (
                &self.cube_gate,
                Duration::from_millis(self.config.cube_delay_ms),
            ),
        };

        let mut last = gate.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < floor {
                tokio::time::sleep(floor - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET with bounded retries and exponential backoff on transient
    /// failures (connect errors, timeouts, 5xx).
    async fn get_with_retry(
        &self,
        url: &str,
        endpoint: &str,
        deadline: Duration,
    ) -> WdsResult<reqwest::Response> {
        self.request_with_retry(endpoint, || self.http.get(url).timeout(deadline))
            .await
    }

    async fn request_with_retry<F>(
        &self,
        endpoint: &str,
        build: F,
    ) -> WdsResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    // Only 5xx is worth retrying; 4xx means the request
                    // itself is wrong.
                    if !status.is_server_error() || attempt >= self.config.max_attempts {
                        return Err(WdsError::Status {
                            endpoint: endpoint.to_string(),
                            status,
                        });
                    }
                }
                Err(source) => {
                    let transient =
                        source.is_connect() || source.is_timeout() || source.is_request();
                    if !transient || attempt >= self.config.max_attempts {
                        return Err(WdsError::Transient {
                            endpoint: endpoint.to_string(),
                            source,
                        });
                    }
                }
            }

            let backoff =
                Duration::from_millis(self.config.retry_base_delay_ms) * 2u32.pow(attempt - 1);
            tracing::warn!(
                endpoint = endpoint,
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                "transient WDS failure, backing off"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

#[async_trait]
impl WdsApi for HttpWdsClient {
    #[instrument(skip(self))]
    async fn list_all_cubes(&self) -> WdsResult<Bytes> {
        self.pace(CallClass::Metadata).await;
        let endpoint = "getAllCubesListLite";
        let url = self.endpoint(endpoint);
        let response = self
            .get_with_retry(&url, endpoint, self.request_deadline())
            .await?;
        response.bytes().await.map_err(|source| WdsError::Transient {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    #[instrument(skip(self), fields(date = %date))]
    async fn changed_cube_list(&self, date: Date) -> WdsResult<Vec<ChangedCubeEntry>> {
        self.pace(CallClass::Metadata).await;
        let endpoint = "getChangedCubeList";
        let url = self.endpoint(&format!("{endpoint}/{date}"));
        let response = self
            .get_with_retry(&url, endpoint, self.request_deadline())
            .await?;
        let bytes = response.bytes().await.map_err(|source| WdsError::Transient {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let entries = payload::parse_changed_cubes(&bytes)?;
        let mut changes = Vec::new();
        for entry in entries {
            // Non-zero entry status codes are normal; the entry just has
            // some upstream issue and is skipped.
            if entry.response_status_code != Some(0) {
                tracing::debug!(
                    product_id = ?entry.product_id,
                    code = ?entry.response_status_code,
                    "skipping change entry with non-success status"
                );
                continue;
            }
            match entry.product_id {
                Some(pid) if ProductId::new(pid).in_published_range() => changes.push(entry),
                other => {
                    tracing::warn!(product_id = ?other, "skipping change entry with invalid product id");
                }
            }
        }
        Ok(changes)
    }

    #[instrument(skip(self), fields(productid = %productid))]
    async fn cube_metadata(&self, productid: ProductId) -> WdsResult<Bytes> {
        self.pace(CallClass::Metadata).await;
        let endpoint = "getCubeMetadata";
        let url = self.endpoint(endpoint);
        let body = serde_json::json!([{ "productId": productid.as_i64() }]);
        let deadline = self.request_deadline();
        let response = self
            .request_with_retry(endpoint, || {
                self.http.post(&url).json(&body).timeout(deadline)
            })
            .await?;
        response.bytes().await.map_err(|source| WdsError::Transient {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    #[instrument(skip(self), fields(productid = %productid))]
    async fn download_cube_csv(&self, productid: ProductId) -> WdsResult<Bytes> {
        self.pace(CallClass::CubeDownload).await;

        // Step 1: resolve the signed download URL from the JSON envelope.
        let endpoint = "getFullTableDownloadCSV";
        let url = self.endpoint(&format!("{endpoint}/{}/en", productid.as_i64()));
        let response = self
            .get_with_retry(&url, endpoint, self.request_deadline())
            .await?;
        let bytes = response.bytes().await.map_err(|source| WdsError::Transient {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let signed_url = payload::parse_download_envelope(&bytes)?;

        // Step 2: fetch the zip itself. reqwest follows the one redirect
        // hop the file host may add.
        let deadline = Duration::from_secs(self.config.download_timeout_secs);
        let response = self.get_with_retry(&signed_url, endpoint, deadline).await?;
        response.bytes().await.map_err(|source| WdsError::Transient {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_join_handles_trailing_slash() {
        let config = WdsConfig {
            base_url: "https://example.test/wds/rest/".to_string(),
            ..Default::default()
        };
        let client = HttpWdsClient::new(config).unwrap();
        assert_eq!(
            client.endpoint("getAllCubesListLite"),
            "https://example.test/wds/rest/getAllCubesListLite"
        );
    }

    #[tokio::test]
    async fn pace_enforces_floor() {
        let config = WdsConfig {
            metadata_delay_ms: 40,
            ..Default::default()
        };
        let client = HttpWdsClient::new(config).unwrap();

        let start = Instant::now();
        client.pace(CallClass::Metadata).await;
        client.pace(CallClass::Metadata).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn pace_classes_are_independent() {
        let config = WdsConfig {
            metadata_delay_ms: 500,
            cube_delay_ms: 500,
            ..Default::default()
        };
        let client = HttpWdsClient::new(config).unwrap();

        client.pace(CallClass::Metadata).await;
        let start = Instant::now();
        client.pace(CallClass::CubeDownload).await;
        // First call in its class never waits on the other class's gate.
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}

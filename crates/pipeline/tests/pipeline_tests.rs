//! End-to-end pipeline tests over a stub WDS client and a scratch
//! warehouse + content store.

use async_trait::async_trait;
use bytes::Bytes;
use cubehouse_core::config::AppConfig;
use cubehouse_core::{ArtifactHash, EnglishNormalizer, ProductId};
use cubehouse_metadata::models::DownloadOutcome;
use cubehouse_metadata::SqliteStore;
use cubehouse_pipeline::context::PipelineContext;
use cubehouse_pipeline::{dimensions, ingest, registry, spine, verify};
use cubehouse_storage::ContentStore;
use cubehouse_wds::{ChangedCubeEntry, WdsApi, WdsError, WdsResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use time::macros::{date, datetime};
use time::Date;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Programmable in-memory WDS.
#[derive(Default)]
struct StubWds {
    spine: Mutex<Option<Bytes>>,
    cubes: Mutex<HashMap<i64, Bytes>>,
    metadata: Mutex<HashMap<i64, Bytes>>,
    changes: Mutex<HashMap<Date, Vec<i64>>>,
    failing_cubes: Mutex<HashSet<i64>>,
}

impl StubWds {
    async fn set_spine(&self, bytes: impl Into<Bytes>) {
        *self.spine.lock().await = Some(bytes.into());
    }

    async fn set_cube(&self, productid: i64, bytes: impl Into<Bytes>) {
        self.cubes.lock().await.insert(productid, bytes.into());
    }

    async fn set_metadata(&self, productid: i64, bytes: impl Into<Bytes>) {
        self.metadata.lock().await.insert(productid, bytes.into());
    }

    async fn set_changes(&self, date: Date, productids: Vec<i64>) {
        self.changes.lock().await.insert(date, productids);
    }

    async fn fail_cube(&self, productid: i64) {
        self.failing_cubes.lock().await.insert(productid);
    }
}

fn unavailable(endpoint: &str) -> WdsError {
    WdsError::Malformed {
        endpoint: endpoint.to_string(),
        detail: "stub has no payload".to_string(),
    }
}

#[async_trait]
impl WdsApi for StubWds {
    async fn list_all_cubes(&self) -> WdsResult<Bytes> {
        self.spine
            .lock()
            .await
            .clone()
            .ok_or_else(|| unavailable("getAllCubesListLite"))
    }

    async fn changed_cube_list(&self, date: Date) -> WdsResult<Vec<ChangedCubeEntry>> {
        let changes = self.changes.lock().await;
        Ok(changes
            .get(&date)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|pid| ChangedCubeEntry {
                product_id: Some(pid),
                release_time: None,
                response_status_code: Some(0),
                extra: BTreeMap::new(),
            })
            .collect())
    }

    async fn cube_metadata(&self, productid: ProductId) -> WdsResult<Bytes> {
        self.metadata
            .lock()
            .await
            .get(&productid.as_i64())
            .cloned()
            .ok_or_else(|| unavailable("getCubeMetadata"))
    }

    async fn download_cube_csv(&self, productid: ProductId) -> WdsResult<Bytes> {
        if self.failing_cubes.lock().await.contains(&productid.as_i64()) {
            return Err(unavailable("getFullTableDownloadCSV"));
        }
        self.cubes
            .lock()
            .await
            .get(&productid.as_i64())
            .cloned()
            .ok_or_else(|| unavailable("getFullTableDownloadCSV"))
    }
}

async fn ctx_from(stub: Arc<StubWds>, config: AppConfig) -> PipelineContext {
    let warehouse = Arc::new(SqliteStore::open(&config.database.path).await.unwrap());
    let content = Arc::new(ContentStore::open(&config.storage.root).await.unwrap());
    PipelineContext::new(
        warehouse,
        content,
        stub,
        Arc::new(EnglishNormalizer),
        config,
    )
}

async fn build_ctx(stub: Arc<StubWds>) -> (tempfile::TempDir, PipelineContext) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::for_testing(dir.path());
    config.ingest.spine_min_cubes = 1;
    let ctx = ctx_from(stub, config).await;
    (dir, ctx)
}

fn spine_json() -> String {
    serde_json::json!([
        {
            "productId": 10100001,
            "cubeTitleEn": "Federal government debt",
            "cubeTitleFr": "Dette du gouvernement fédéral",
            "cubeStartDate": "2008-04-01",
            "archived": 0,
            "frequencyCode": 12,
            "subjectCode": ["10"],
            "surveyCode": ["5174"]
        },
        {
            "productId": 10100002,
            "cubeTitleEn": "Central government operations",
            "cubeStartDate": "2020-01-01",
            "subjectCode": ["10"]
        }
    ])
    .to_string()
}

fn metadata_json(productid: i64) -> String {
    serde_json::json!([{
        "status": "SUCCESS",
        "object": {
            "productId": productid.to_string(),
            "cubeTitleEn": "Test cube",
            "dimension": [
                {
                    "dimensionPositionId": 1,
                    "dimensionNameEn": "Geography",
                    "dimensionNameFr": "Géographie",
                    "hasUom": false,
                    "member": [
                        {"memberId": 1, "memberNameEn": "Canada"},
                        {"memberId": 2, "memberNameEn": "Ontario", "parentMemberId": 1},
                        {"memberId": 3, "memberNameEn": "Toronto", "parentMemberId": 2}
                    ]
                },
                {
                    "dimensionPositionId": 2,
                    "dimensionNameEn": "Estimates",
                    "hasUom": true,
                    "member": [
                        {"memberId": 1, "memberNameEn": "Total, all estimates",
                         "memberUomCode": 223},
                        {"memberId": 2, "memberNameEn": "Dollars", "memberUomCode": 81}
                    ]
                }
            ]
        }
    }])
    .to_string()
}

/// S1: the same payload fetched twice lands once on disk, with one active
/// row and a cleared pending flag.
#[tokio::test]
async fn deduplicated_download() {
    let stub = Arc::new(StubWds::default());
    let payload = b"PK\x03\x04 fake cube zip".to_vec();
    stub.set_cube(10100001, payload.clone()).await;

    let (_dir, ctx) = build_ctx(stub).await;
    ctx.warehouse.ensure_cube_status(10100001).await.unwrap();

    let cancel = CancellationToken::new();
    let first = ingest::fetch_cubes(&ctx, &cancel).await.unwrap();
    assert_eq!((first.adopted, first.failed), (1, 0));

    // Re-flag and fetch the identical payload again.
    ctx.warehouse.mark_cube_pending(10100001).await.unwrap();
    let second = ingest::fetch_cubes(&ctx, &cancel).await.unwrap();
    assert_eq!((second.adopted, second.unchanged), (0, 1));

    let hash = ArtifactHash::digest(&payload);
    let path = ctx
        .content
        .path_for(cubehouse_storage::ArtifactKind::Cube, &hash);
    assert!(path.exists());

    let history = ctx.warehouse.cube_history(10100001).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].active);
    assert_eq!(history[0].storage_location, path.to_string_lossy());

    let status = ctx.warehouse.cube_status(10100001).await.unwrap().unwrap();
    assert!(!status.download_pending);
    assert_eq!(status.last_file_hash.as_deref(), Some(hash.as_str()));
}

/// S2: a logged change after the last download flags the cube pending.
#[tokio::test]
async fn change_detection_flags_pending() {
    let stub = Arc::new(StubWds::default());
    let (_dir, ctx) = build_ctx(stub).await;

    ctx.warehouse.ensure_cube_status(10100002).await.unwrap();
    ctx.warehouse
        .record_cube_download(
            10100002,
            "aaaaaaaaaaaa",
            "/p",
            datetime!(2024-01-04 09:00 UTC),
        )
        .await
        .unwrap();
    assert!(
        !ctx.warehouse
            .cube_status(10100002)
            .await
            .unwrap()
            .unwrap()
            .download_pending
    );

    ctx.warehouse
        .record_changes(date!(2024 - 01 - 05), &[10100002])
        .await
        .unwrap();

    let flagged = ingest::flag_pending_from_changes(&ctx).await.unwrap();
    assert_eq!(flagged, 1);
    assert!(
        ctx.warehouse
            .cube_status(10100002)
            .await
            .unwrap()
            .unwrap()
            .download_pending
    );
}

/// Discovery walks every unchecked date through the effective release
/// date, records markers for quiet days, and flags affected cubes.
#[tokio::test]
async fn discovery_walks_dates_and_flags() {
    let stub = Arc::new(StubWds::default());
    let today = time::OffsetDateTime::now_utc().date();
    let yesterday = today.previous_day().unwrap();
    stub.set_changes(yesterday, vec![10100002]).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::for_testing(dir.path());
    // Midnight cutoff makes "today" always fully released, and the
    // baseline bounds the scan to two days.
    config.ingest.release_cutoff_utc = "00:00".to_string();
    config.ingest.change_baseline = yesterday;
    let ctx = ctx_from(stub, config).await;

    ctx.warehouse.ensure_cube_status(10100002).await.unwrap();
    ctx.warehouse
        .record_cube_download(
            10100002,
            "aaaaaaaaaaaa",
            "/p",
            datetime!(2020-01-01 00:00 UTC),
        )
        .await
        .unwrap();

    let summary = ingest::discover_changes(&ctx).await.unwrap();
    assert_eq!(summary.days_checked, 2);
    assert_eq!(summary.changes_recorded, 1);
    assert_eq!(summary.flagged, 1);
    assert_eq!(ctx.warehouse.last_checked_date().await.unwrap(), Some(today));

    // A second pass finds nothing new to check.
    let again = ingest::discover_changes(&ctx).await.unwrap();
    assert_eq!(again.days_checked, 0);
    assert_eq!(again.flagged, 0);
}

/// A download on the change day but before the release instant is stale.
#[tokio::test]
async fn change_on_download_day_still_flags() {
    let stub = Arc::new(StubWds::default());
    let (_dir, ctx) = build_ctx(stub).await;

    ctx.warehouse.ensure_cube_status(10100002).await.unwrap();
    ctx.warehouse
        .record_cube_download(
            10100002,
            "aaaaaaaaaaaa",
            "/p",
            datetime!(2024-01-05 09:00 UTC),
        )
        .await
        .unwrap();
    ctx.warehouse
        .record_changes(date!(2024 - 01 - 05), &[10100002])
        .await
        .unwrap();

    // Release instant is 13:30 UTC; a 09:00 download predates it.
    assert_eq!(ingest::flag_pending_from_changes(&ctx).await.unwrap(), 1);
}

/// Spine fetch, load and status seeding.
#[tokio::test]
async fn spine_fetch_load_seed() {
    let stub = Arc::new(StubWds::default());
    stub.set_spine(spine_json()).await;
    let (_dir, ctx) = build_ctx(stub.clone()).await;

    let fetched = ingest::fetch_spine(&ctx).await.unwrap();
    assert_eq!(fetched.outcome, DownloadOutcome::Adopted);
    assert_eq!(fetched.cube_count, 2);

    // Unchanged on refetch.
    let refetched = ingest::fetch_spine(&ctx).await.unwrap();
    assert_eq!(refetched.outcome, DownloadOutcome::Unchanged);

    let loaded = spine::load_spine(&ctx).await.unwrap();
    assert_eq!(loaded.cubes, 2);
    assert_eq!(loaded.subjects, 2);
    assert_eq!(loaded.surveys, 1);

    let cube = ctx.warehouse.spine_cube(10100001).await.unwrap().unwrap();
    assert_eq!(cube.title_en, "Federal government debt");
    assert_eq!(cube.start_date, Some(date!(2008 - 04 - 01)));

    let seeded = ingest::seed_status(&ctx).await.unwrap();
    assert_eq!(seeded.cubes_seeded, 2);
    assert_eq!(seeded.metadata_seeded, 2);
    assert_eq!(
        ctx.warehouse.pending_cubes().await.unwrap(),
        vec![10100001, 10100002]
    );

    // Seeding is idempotent.
    let reseeded = ingest::seed_status(&ctx).await.unwrap();
    assert_eq!(reseeded.cubes_seeded, 0);
}

/// A failed download leaves the key pending; others still complete.
#[tokio::test]
async fn transient_failure_keeps_pending() {
    let stub = Arc::new(StubWds::default());
    stub.set_cube(10100001, b"payload one".to_vec()).await;
    stub.fail_cube(10100002).await;
    let (_dir, ctx) = build_ctx(stub).await;

    ctx.warehouse.ensure_cube_status(10100001).await.unwrap();
    ctx.warehouse.ensure_cube_status(10100002).await.unwrap();

    let cancel = CancellationToken::new();
    let summary = ingest::fetch_cubes(&ctx, &cancel).await.unwrap();
    assert_eq!((summary.adopted, summary.failed), (1, 1));

    let failed = ctx.warehouse.cube_status(10100002).await.unwrap().unwrap();
    assert!(failed.download_pending);
    assert!(failed.last_download.is_some());
    assert_eq!(ctx.warehouse.pending_cubes().await.unwrap(), vec![10100002]);
}

/// Cancellation before claiming skips the remaining work.
#[tokio::test]
async fn cancellation_skips_claims() {
    let stub = Arc::new(StubWds::default());
    stub.set_cube(10100001, b"payload".to_vec()).await;
    let (_dir, ctx) = build_ctx(stub).await;
    ctx.warehouse.ensure_cube_status(10100001).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = ingest::fetch_cubes(&ctx, &cancel).await.unwrap();
    assert_eq!(summary.cancelled, 1);
    assert!(
        ctx.warehouse
            .cube_status(10100001)
            .await
            .unwrap()
            .unwrap()
            .download_pending
    );
}

/// S6: a truncated file is repaired by the verifier and restored by the
/// next fetch cycle under the same content-addressed path.
#[tokio::test]
async fn corruption_repair_roundtrip() {
    let stub = Arc::new(StubWds::default());
    let payload = b"PK\x03\x04 cube payload".to_vec();
    stub.set_cube(10100001, payload.clone()).await;
    let (_dir, ctx) = build_ctx(stub).await;

    ctx.warehouse.ensure_cube_status(10100001).await.unwrap();
    let cancel = CancellationToken::new();
    ingest::fetch_cubes(&ctx, &cancel).await.unwrap();

    let row = ctx.warehouse.active_cube(10100001).await.unwrap().unwrap();
    std::fs::write(&row.storage_location, b"PK").unwrap();

    let report = verify::verify_files(&ctx).await.unwrap();
    assert_eq!(report.cubes.checked, 1);
    assert_eq!(report.cubes.repaired, 1);
    assert!(!std::path::Path::new(&row.storage_location).exists());
    assert!(ctx.warehouse.active_cube(10100001).await.unwrap().is_none());
    assert!(
        ctx.warehouse
            .cube_status(10100001)
            .await
            .unwrap()
            .unwrap()
            .download_pending
    );

    // Next cycle restores the same path.
    ingest::fetch_cubes(&ctx, &cancel).await.unwrap();
    let restored = ctx.warehouse.active_cube(10100001).await.unwrap().unwrap();
    assert_eq!(restored.storage_location, row.storage_location);
    assert!(std::path::Path::new(&restored.storage_location).exists());

    // Everything verifies clean afterwards.
    let report = verify::verify_files(&ctx).await.unwrap();
    assert_eq!(report.cubes.ok, 1);
    assert_eq!(report.cubes.repaired, 0);
}

/// A missing file (not just corrupt) is also repaired.
#[tokio::test]
async fn missing_file_repair() {
    let stub = Arc::new(StubWds::default());
    stub.set_cube(10100001, b"payload".to_vec()).await;
    let (_dir, ctx) = build_ctx(stub).await;

    ctx.warehouse.ensure_cube_status(10100001).await.unwrap();
    let cancel = CancellationToken::new();
    ingest::fetch_cubes(&ctx, &cancel).await.unwrap();

    let row = ctx.warehouse.active_cube(10100001).await.unwrap().unwrap();
    std::fs::remove_file(&row.storage_location).unwrap();

    let report = verify::verify_files(&ctx).await.unwrap();
    assert_eq!(report.cubes.repaired, 1);
    assert!(
        ctx.warehouse
            .cube_status(10100001)
            .await
            .unwrap()
            .unwrap()
            .download_pending
    );
}

/// Metadata fetch, raw dictionary load, watermark advance.
#[tokio::test]
async fn metadata_fetch_and_raw_load() {
    let stub = Arc::new(StubWds::default());
    stub.set_metadata(10100001, metadata_json(10100001)).await;
    let (_dir, ctx) = build_ctx(stub.clone()).await;

    ctx.warehouse.ensure_metadata_status(10100001).await.unwrap();
    let cancel = CancellationToken::new();
    let fetched = ingest::fetch_metadata(&ctx, &cancel).await.unwrap();
    assert_eq!(fetched.adopted, 1);

    let loaded = dimensions::load_raw_dimensions(&ctx).await.unwrap();
    assert_eq!(loaded.products, 1);
    assert_eq!(loaded.dimensions, 2);
    assert_eq!(loaded.members, 5);

    // Watermark advanced: nothing left to load.
    let reloaded = dimensions::load_raw_dimensions(&ctx).await.unwrap();
    assert_eq!(reloaded.products, 0);

    // A fresh metadata version re-arms the loader.
    stub.set_metadata(10100001, metadata_json(10100001).replace("Toronto", "Ottawa"))
        .await;
    ctx.warehouse.mark_metadata_pending(10100001).await.unwrap();
    ingest::fetch_metadata(&ctx, &cancel).await.unwrap();
    let reloaded = dimensions::load_raw_dimensions(&ctx).await.unwrap();
    assert_eq!(reloaded.products, 1);
}

/// Full registry build over two cubes sharing one dimension, then the
/// idempotence invariant: a second build produces identical tables.
#[tokio::test]
async fn registry_build_and_idempotence() {
    let stub = Arc::new(StubWds::default());
    stub.set_metadata(10100001, metadata_json(10100001)).await;
    stub.set_metadata(10100002, metadata_json(10100002)).await;
    let (_dir, ctx) = build_ctx(stub).await;

    for pid in [10100001, 10100002] {
        ctx.warehouse.ensure_metadata_status(pid).await.unwrap();
    }
    let cancel = CancellationToken::new();
    ingest::fetch_metadata(&ctx, &cancel).await.unwrap();
    dimensions::load_raw_dimensions(&ctx).await.unwrap();

    let summary = registry::build_registry(&ctx).await.unwrap();
    assert_eq!(summary.raw_members, 10);
    assert_eq!(summary.processed_dimensions, 4);
    // Identical dimensions across the two cubes collapse.
    assert_eq!(summary.canonical_dimensions, 2);
    assert_eq!(summary.canonical_members, 5);
    assert_eq!(summary.cycles, 0);

    let set_first = ctx.warehouse.dimension_set().await.unwrap();
    let members_first = ctx.warehouse.dimension_set_members().await.unwrap();

    // Geography is a tree with levels 1/2/3; estimates carry mixed UOMs
    // and a total member.
    let geo = set_first.iter().find(|d| d.is_tree).unwrap();
    assert_eq!(geo.name_en.as_deref(), Some("Geography"));
    assert_eq!(geo.usage_count, 2);
    let estimates = set_first.iter().find(|d| !d.is_tree).unwrap();
    assert!(estimates.is_hetero);
    assert!(estimates.has_total);

    let toronto = members_first
        .iter()
        .find(|m| m.name_en.as_deref() == Some("Toronto"))
        .unwrap();
    assert_eq!(toronto.tree_level, Some(3));
    assert_eq!(toronto.base_name.as_deref(), Some("toronto"));

    // Second build over unchanged raw tables: byte-identical output.
    registry::build_registry(&ctx).await.unwrap();
    assert_eq!(ctx.warehouse.dimension_set().await.unwrap(), set_first);
    assert_eq!(
        ctx.warehouse.dimension_set_members().await.unwrap(),
        members_first
    );
}

/// normalize-labels rewrites base names with the context normalizer.
#[tokio::test]
async fn normalize_labels_updates_base_names() {
    let stub = Arc::new(StubWds::default());
    stub.set_metadata(10100001, metadata_json(10100001)).await;
    let (_dir, ctx) = build_ctx(stub).await;

    ctx.warehouse.ensure_metadata_status(10100001).await.unwrap();
    let cancel = CancellationToken::new();
    ingest::fetch_metadata(&ctx, &cancel).await.unwrap();
    dimensions::load_raw_dimensions(&ctx).await.unwrap();
    registry::build_registry(&ctx).await.unwrap();

    let updated = registry::normalize_labels(&ctx).await.unwrap();
    assert_eq!(updated, 5);

    let members = ctx.warehouse.dimension_set_members().await.unwrap();
    let total = members
        .iter()
        .find(|m| m.name_en.as_deref() == Some("Total, all estimates"))
        .unwrap();
    // "all" is a stopword; tokens are sorted.
    assert_eq!(total.base_name.as_deref(), Some("estimates total"));
}

//! Integration tests for the SQLite warehouse store.

use cubehouse_metadata::models::*;
use cubehouse_metadata::repos::*;
use cubehouse_metadata::{SqliteStore, WarehouseError};
use time::macros::{date, datetime};

async fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("warehouse.db"))
        .await
        .unwrap();
    (dir, store)
}

#[tokio::test]
async fn cube_download_adopts_then_dedupes() {
    let (_dir, store) = open_store().await;
    let now = datetime!(2024-03-01 12:00 UTC);

    store.ensure_cube_status(10100001).await.unwrap();

    let first = store
        .record_cube_download(10100001, "abc123def456", "/raw/cubes/ab/abc123def456.zip", now)
        .await
        .unwrap();
    assert_eq!(first, DownloadOutcome::Adopted);

    // Same content again: no new row, pending stays cleared.
    let second = store
        .record_cube_download(10100001, "abc123def456", "/raw/cubes/ab/abc123def456.zip", now)
        .await
        .unwrap();
    assert_eq!(second, DownloadOutcome::Unchanged);

    let history = store.cube_history(10100001).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].active);

    let status = store.cube_status(10100001).await.unwrap().unwrap();
    assert!(!status.download_pending);
    assert_eq!(status.last_file_hash.as_deref(), Some("abc123def456"));
}

#[tokio::test]
async fn cube_download_new_hash_deactivates_predecessor() {
    let (_dir, store) = open_store().await;
    let now = datetime!(2024-03-01 12:00 UTC);

    store.ensure_cube_status(10100001).await.unwrap();
    store
        .record_cube_download(10100001, "aaaaaaaaaaaa", "/raw/cubes/aa/aaaaaaaaaaaa.zip", now)
        .await
        .unwrap();
    store
        .record_cube_download(10100001, "bbbbbbbbbbbb", "/raw/cubes/bb/bbbbbbbbbbbb.zip", now)
        .await
        .unwrap();

    let active: Vec<_> = store
        .cube_history(10100001)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].file_hash, "bbbbbbbbbbbb");

    let status = store.cube_status(10100001).await.unwrap().unwrap();
    assert_eq!(status.last_file_hash.as_deref(), Some("bbbbbbbbbbbb"));
}

#[tokio::test]
async fn remove_refuses_active_row() {
    let (_dir, store) = open_store().await;
    let now = datetime!(2024-03-01 12:00 UTC);

    store.ensure_cube_status(10100001).await.unwrap();
    store
        .record_cube_download(10100001, "aaaaaaaaaaaa", "/p", now)
        .await
        .unwrap();

    let row = store.active_cube(10100001).await.unwrap().unwrap();
    match store.remove_cube_artifact(row.id).await {
        Err(WarehouseError::ActiveRowRemoval(id)) => assert_eq!(id, row.id),
        other => panic!("expected ActiveRowRemoval, got {other:?}"),
    }

    // Inactive history rows can be removed.
    store
        .record_cube_download(10100001, "bbbbbbbbbbbb", "/p2", now)
        .await
        .unwrap();
    store.remove_cube_artifact(row.id).await.unwrap();
    assert_eq!(store.cube_history(10100001).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalidate_restores_pending() {
    let (_dir, store) = open_store().await;
    let now = datetime!(2024-03-01 12:00 UTC);

    store.ensure_cube_status(10100001).await.unwrap();
    store
        .record_cube_download(10100001, "aaaaaaaaaaaa", "/p", now)
        .await
        .unwrap();

    let row = store.active_cube(10100001).await.unwrap().unwrap();
    store.invalidate_cube_artifact(row.id, 10100001).await.unwrap();

    assert!(store.active_cube(10100001).await.unwrap().is_none());
    let status = store.cube_status(10100001).await.unwrap().unwrap();
    assert!(status.download_pending);
}

#[tokio::test]
async fn spine_download_lifecycle() {
    let (_dir, store) = open_store().await;
    let now = datetime!(2024-03-01 12:00 UTC);

    let status = store.spine_status().await.unwrap();
    assert!(status.download_pending);

    let outcome = store
        .record_spine_download("cafecafecafe", "/raw/spine/ca/cafecafecafe.json", now)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Adopted);

    let status = store.spine_status().await.unwrap();
    assert!(!status.download_pending);
    assert_eq!(status.last_file_hash.as_deref(), Some("cafecafecafe"));

    // Re-fetch with identical content is a no-op.
    let outcome = store
        .record_spine_download("cafecafecafe", "/raw/spine/ca/cafecafecafe.json", now)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Unchanged);
    assert_eq!(store.spine_history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn change_log_dedupes_and_tracks_dates() {
    let (_dir, store) = open_store().await;

    let inserted = store
        .record_changes(date!(2024 - 01 - 05), &[10100002, 10100003])
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    // Replays are ignored by the primary key.
    let inserted = store
        .record_changes(date!(2024 - 01 - 05), &[10100002])
        .await
        .unwrap();
    assert_eq!(inserted, 0);

    // A quiet day records the marker and advances the checked date.
    store.record_changes(date!(2024 - 01 - 06), &[]).await.unwrap();
    assert_eq!(
        store.last_checked_date().await.unwrap(),
        Some(date!(2024 - 01 - 06))
    );

    // Markers never surface as product changes.
    let latest = store.latest_change_dates().await.unwrap();
    assert_eq!(
        latest,
        vec![
            ChangedCubeRow {
                productid: 10100002,
                change_date: date!(2024 - 01 - 05),
            },
            ChangedCubeRow {
                productid: 10100003,
                change_date: date!(2024 - 01 - 05),
            },
        ]
    );
}

#[tokio::test]
async fn spine_replace_is_total() {
    let (_dir, store) = open_store().await;

    let cube = |pid: i64, title: &str| SpineCubeRow {
        productid: pid,
        cansim_id: None,
        title_en: title.to_string(),
        title_fr: None,
        start_date: Some(date!(2020 - 01 - 01)),
        end_date: None,
        release_date: None,
        archived: Some(0),
        frequency_code: Some(6),
        issue_date: None,
    };

    store
        .replace_spine(
            &[cube(10100001, "Old cube")],
            &[CubeSubjectRow {
                productid: 10100001,
                subject_code: "10".to_string(),
            }],
            &[],
        )
        .await
        .unwrap();

    store
        .replace_spine(
            &[cube(10100002, "New cube"), cube(10100003, "Another")],
            &[],
            &[CubeSurveyRow {
                productid: 10100002,
                survey_code: "5300".to_string(),
            }],
        )
        .await
        .unwrap();

    assert_eq!(store.spine_product_ids().await.unwrap(), vec![10100002, 10100003]);
    assert!(store.cube_subjects(10100001).await.unwrap().is_empty());
    assert_eq!(store.cube_surveys(10100002).await.unwrap().len(), 1);
}

#[tokio::test]
async fn raw_product_replace_drops_stale_members() {
    let (_dir, store) = open_store().await;

    let dim = RawDimensionRow {
        productid: 10100001,
        dimension_position: 1,
        name_en: Some("Geography".to_string()),
        name_fr: Some("Géographie".to_string()),
        has_uom: Some(false),
    };
    let member = |id: i64| RawMemberRow {
        productid: 10100001,
        dimension_position: 1,
        member_id: id,
        parent_member_id: None,
        classification_code: None,
        classification_type_code: None,
        name_en: Some(format!("Member {id}")),
        name_fr: None,
        uom_code: None,
        geo_level: None,
        vintage: None,
        terminated: false,
    };

    store
        .replace_raw_product(10100001, &[dim.clone()], &[member(1), member(2), member(3)])
        .await
        .unwrap();
    assert_eq!(store.raw_counts().await.unwrap(), (1, 3));

    // Refresh with a smaller dimension: stale member 3 must vanish.
    store
        .replace_raw_product(10100001, &[dim], &[member(1), member(2)])
        .await
        .unwrap();
    assert_eq!(store.raw_counts().await.unwrap(), (1, 2));
}

#[tokio::test]
async fn metadata_ready_for_load_tracks_watermark() {
    let (_dir, store) = open_store().await;
    let now = datetime!(2024-03-01 12:00 UTC);

    store.ensure_metadata_status(10100001).await.unwrap();
    store
        .record_metadata_download(10100001, "abcabcabcabc", "/p", now)
        .await
        .unwrap();

    let ready = store.metadata_ready_for_load().await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].productid, 10100001);

    store
        .set_metadata_loaded_hash(10100001, "abcabcabcabc")
        .await
        .unwrap();
    assert!(store.metadata_ready_for_load().await.unwrap().is_empty());

    // A new download re-arms the loader.
    store
        .record_metadata_download(10100001, "fedfedfedfed", "/p2", now)
        .await
        .unwrap();
    assert_eq!(store.metadata_ready_for_load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn registry_tables_roundtrip() {
    let (_dir, store) = open_store().await;

    let member = ProcessedMemberRow {
        productid: 10100001,
        dimension_position: 1,
        member_id: 1,
        member_hash: "aaaaaaaaaaaa".to_string(),
        dimension_hash: None,
        name_en: Some("Canada".to_string()),
        name_fr: Some("Canada".to_string()),
        parent_member_id: None,
        uom_code: None,
        member_label_norm: "canada".to_string(),
    };
    store.replace_processed_members(&[member]).await.unwrap();

    let dim = ProcessedDimensionRow {
        productid: 10100001,
        dimension_position: 1,
        dimension_hash: "dddddddddddd".to_string(),
        name_en: Some("Geography".to_string()),
        name_fr: None,
        has_uom: false,
    };
    store.replace_processed_dimensions(&[dim]).await.unwrap();

    // The backfill stamped the member with its dimension hash.
    let members = store.processed_members().await.unwrap();
    assert_eq!(members[0].dimension_hash.as_deref(), Some("dddddddddddd"));

    store
        .replace_dimension_set(&[DimensionSetRow {
            dimension_hash: "dddddddddddd".to_string(),
            name_en: Some("Geography".to_string()),
            name_fr: None,
            usage_count: 1,
            has_uom: false,
            is_tree: false,
            is_hetero: false,
            has_total: false,
            is_grabbag: false,
            is_exclusive: None,
        }])
        .await
        .unwrap();
    store
        .replace_dimension_set_members(&[DimensionSetMemberRow {
            dimension_hash: "dddddddddddd".to_string(),
            member_id: 1,
            name_en: Some("Canada".to_string()),
            name_fr: Some("Canada".to_string()),
            parent_member_id: None,
            uom_code: None,
            usage_count: 1,
            tree_level: None,
            base_name: None,
        }])
        .await
        .unwrap();

    let updated = store
        .update_member_base_names(&[("dddddddddddd".to_string(), 1, "canada".to_string())])
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let members = store.dimension_set_members().await.unwrap();
    assert_eq!(members[0].base_name.as_deref(), Some("canada"));
}

//! SQLite implementations of the repository traits.

use crate::error::{is_unique_violation, WarehouseError, WarehouseResult};
use crate::models::*;
use crate::repos::{
    ChangeLogRepo, CubeFileRepo, DictionaryRepo, MetadataFileRepo, RegistryRepo, SpineFileRepo,
    SpineRepo,
};
use crate::store::SqliteStore;
use async_trait::async_trait;
use cubehouse_core::NO_CHANGES_MARKER;
use time::{Date, OffsetDateTime};

#[async_trait]
impl SpineFileRepo for SqliteStore {
    async fn record_spine_download(
        &self,
        file_hash: &str,
        storage_location: &str,
        now: OffsetDateTime,
    ) -> WarehouseResult<DownloadOutcome> {
        let mut tx = self.pool().begin().await?;

        let duplicate: Option<i64> =
            sqlx::query_scalar("SELECT id FROM spine_artifacts WHERE file_hash = ?1")
                .bind(file_hash)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = if duplicate.is_some() {
            DownloadOutcome::Unchanged
        } else {
            sqlx::query("UPDATE spine_artifacts SET active = 0 WHERE active = 1")
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO spine_artifacts (file_hash, download_time, active, storage_location) \
                 VALUES (?1, ?2, 1, ?3)",
            )
            .bind(file_hash)
            .bind(now)
            .bind(storage_location)
            .execute(&mut *tx)
            .await?;
            DownloadOutcome::Adopted
        };

        sqlx::query(
            "UPDATE spine_status SET download_pending = 0, last_download = ?1, \
             last_file_hash = (SELECT file_hash FROM spine_artifacts WHERE active = 1) \
             WHERE id = 1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn active_spine(&self) -> WarehouseResult<Option<SpineArtifactRow>> {
        let row = sqlx::query_as::<_, SpineArtifactRow>(
            "SELECT * FROM spine_artifacts WHERE active = 1 ORDER BY download_time DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn spine_history(&self) -> WarehouseResult<Vec<SpineArtifactRow>> {
        let rows = sqlx::query_as::<_, SpineArtifactRow>(
            "SELECT * FROM spine_artifacts ORDER BY download_time DESC, id DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn remove_spine_artifact(&self, id: i64) -> WarehouseResult<()> {
        let row = sqlx::query_as::<_, SpineArtifactRow>(
            "SELECT * FROM spine_artifacts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| WarehouseError::NotFound(format!("spine artifact {id}")))?;

        if row.active {
            return Err(WarehouseError::ActiveRowRemoval(id));
        }

        sqlx::query("DELETE FROM spine_artifacts WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn invalidate_spine_artifact(&self, id: i64) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM spine_artifacts WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE spine_status SET download_pending = 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_spine_pending(&self) -> WarehouseResult<()> {
        sqlx::query("UPDATE spine_status SET download_pending = 1 WHERE id = 1")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn spine_status(&self) -> WarehouseResult<SpineStatusRow> {
        let row = sqlx::query_as::<_, SpineStatusRow>(
            "SELECT last_download, download_pending, last_file_hash FROM spine_status WHERE id = 1",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl CubeFileRepo for SqliteStore {
    async fn record_cube_download(
        &self,
        productid: i64,
        file_hash: &str,
        storage_location: &str,
        now: OffsetDateTime,
    ) -> WarehouseResult<DownloadOutcome> {
        let mut tx = self.pool().begin().await?;

        let duplicate: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM cube_artifacts WHERE productid = ?1 AND file_hash = ?2",
        )
        .bind(productid)
        .bind(file_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if duplicate.is_some() {
            DownloadOutcome::Unchanged
        } else {
            sqlx::query("UPDATE cube_artifacts SET active = 0 WHERE productid = ?1 AND active = 1")
                .bind(productid)
                .execute(&mut *tx)
                .await?;
            let insert = sqlx::query(
                "INSERT INTO cube_artifacts \
                 (productid, file_hash, download_time, active, storage_location) \
                 VALUES (?1, ?2, ?3, 1, ?4)",
            )
            .bind(productid)
            .bind(file_hash)
            .bind(now)
            .bind(storage_location)
            .execute(&mut *tx)
            .await;
            match insert {
                Ok(_) => DownloadOutcome::Adopted,
                // The unique constraint backstops the duplicate check.
                Err(e) if is_unique_violation(&e) => DownloadOutcome::Unchanged,
                Err(e) => return Err(e.into()),
            }
        };

        sqlx::query("INSERT OR IGNORE INTO cube_status (productid, download_pending) VALUES (?1, 1)")
            .bind(productid)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE cube_status SET download_pending = 0, last_download = ?2, \
             last_file_hash = (SELECT file_hash FROM cube_artifacts \
                               WHERE productid = ?1 AND active = 1) \
             WHERE productid = ?1",
        )
        .bind(productid)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn note_cube_attempt(
        &self,
        productid: i64,
        now: OffsetDateTime,
    ) -> WarehouseResult<()> {
        sqlx::query("UPDATE cube_status SET last_download = ?2 WHERE productid = ?1")
            .bind(productid)
            .bind(now)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn active_cube(&self, productid: i64) -> WarehouseResult<Option<CubeArtifactRow>> {
        let row = sqlx::query_as::<_, CubeArtifactRow>(
            "SELECT * FROM cube_artifacts WHERE productid = ?1 AND active = 1",
        )
        .bind(productid)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn active_cubes(&self) -> WarehouseResult<Vec<CubeArtifactRow>> {
        let rows = sqlx::query_as::<_, CubeArtifactRow>(
            "SELECT * FROM cube_artifacts WHERE active = 1 ORDER BY productid",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn cube_history(&self, productid: i64) -> WarehouseResult<Vec<CubeArtifactRow>> {
        let rows = sqlx::query_as::<_, CubeArtifactRow>(
            "SELECT * FROM cube_artifacts WHERE productid = ?1 \
             ORDER BY download_time DESC, id DESC",
        )
        .bind(productid)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn remove_cube_artifact(&self, id: i64) -> WarehouseResult<()> {
        let row =
            sqlx::query_as::<_, CubeArtifactRow>("SELECT * FROM cube_artifacts WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?
                .ok_or_else(|| WarehouseError::NotFound(format!("cube artifact {id}")))?;

        if row.active {
            return Err(WarehouseError::ActiveRowRemoval(id));
        }

        sqlx::query("DELETE FROM cube_artifacts WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn invalidate_cube_artifact(&self, id: i64, productid: i64) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM cube_artifacts WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO cube_status (productid, download_pending) VALUES (?1, 1)")
            .bind(productid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE cube_status SET download_pending = 1 WHERE productid = ?1")
            .bind(productid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_cube_status(&self, productid: i64) -> WarehouseResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO cube_status (productid, download_pending) VALUES (?1, 1)",
        )
        .bind(productid)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_cube_pending(&self, productid: i64) -> WarehouseResult<()> {
        sqlx::query("UPDATE cube_status SET download_pending = 1 WHERE productid = ?1")
            .bind(productid)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn cube_status(&self, productid: i64) -> WarehouseResult<Option<CubeStatusRow>> {
        let row = sqlx::query_as::<_, CubeStatusRow>(
            "SELECT * FROM cube_status WHERE productid = ?1",
        )
        .bind(productid)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn cube_statuses(&self) -> WarehouseResult<Vec<CubeStatusRow>> {
        let rows =
            sqlx::query_as::<_, CubeStatusRow>("SELECT * FROM cube_status ORDER BY productid")
                .fetch_all(self.pool())
                .await?;
        Ok(rows)
    }

    async fn pending_cubes(&self) -> WarehouseResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT productid FROM cube_status WHERE download_pending = 1 ORDER BY productid",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl MetadataFileRepo for SqliteStore {
    async fn record_metadata_download(
        &self,
        productid: i64,
        file_hash: &str,
        storage_location: &str,
        now: OffsetDateTime,
    ) -> WarehouseResult<DownloadOutcome> {
        let mut tx = self.pool().begin().await?;

        let duplicate: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM metadata_artifacts WHERE productid = ?1 AND file_hash = ?2",
        )
        .bind(productid)
        .bind(file_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if duplicate.is_some() {
            DownloadOutcome::Unchanged
        } else {
            sqlx::query(
                "UPDATE metadata_artifacts SET active = 0 WHERE productid = ?1 AND active = 1",
            )
            .bind(productid)
            .execute(&mut *tx)
            .await?;
            let insert = sqlx::query(
                "INSERT INTO metadata_artifacts \
                 (productid, file_hash, download_time, active, storage_location) \
                 VALUES (?1, ?2, ?3, 1, ?4)",
            )
            .bind(productid)
            .bind(file_hash)
            .bind(now)
            .bind(storage_location)
            .execute(&mut *tx)
            .await;
            match insert {
                Ok(_) => DownloadOutcome::Adopted,
                Err(e) if is_unique_violation(&e) => DownloadOutcome::Unchanged,
                Err(e) => return Err(e.into()),
            }
        };

        sqlx::query(
            "INSERT OR IGNORE INTO metadata_status (productid, download_pending) VALUES (?1, 1)",
        )
        .bind(productid)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE metadata_status SET download_pending = 0, last_download = ?2, \
             last_file_hash = (SELECT file_hash FROM metadata_artifacts \
                               WHERE productid = ?1 AND active = 1) \
             WHERE productid = ?1",
        )
        .bind(productid)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn note_metadata_attempt(
        &self,
        productid: i64,
        now: OffsetDateTime,
    ) -> WarehouseResult<()> {
        sqlx::query("UPDATE metadata_status SET last_download = ?2 WHERE productid = ?1")
            .bind(productid)
            .bind(now)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn active_metadata(
        &self,
        productid: i64,
    ) -> WarehouseResult<Option<MetadataArtifactRow>> {
        let row = sqlx::query_as::<_, MetadataArtifactRow>(
            "SELECT * FROM metadata_artifacts WHERE productid = ?1 AND active = 1",
        )
        .bind(productid)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn active_metadata_files(&self) -> WarehouseResult<Vec<MetadataArtifactRow>> {
        let rows = sqlx::query_as::<_, MetadataArtifactRow>(
            "SELECT * FROM metadata_artifacts WHERE active = 1 ORDER BY productid",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn metadata_history(
        &self,
        productid: i64,
    ) -> WarehouseResult<Vec<MetadataArtifactRow>> {
        let rows = sqlx::query_as::<_, MetadataArtifactRow>(
            "SELECT * FROM metadata_artifacts WHERE productid = ?1 \
             ORDER BY download_time DESC, id DESC",
        )
        .bind(productid)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn remove_metadata_artifact(&self, id: i64) -> WarehouseResult<()> {
        let row = sqlx::query_as::<_, MetadataArtifactRow>(
            "SELECT * FROM metadata_artifacts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| WarehouseError::NotFound(format!("metadata artifact {id}")))?;

        if row.active {
            return Err(WarehouseError::ActiveRowRemoval(id));
        }

        sqlx::query("DELETE FROM metadata_artifacts WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn invalidate_metadata_artifact(
        &self,
        id: i64,
        productid: i64,
    ) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM metadata_artifacts WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO metadata_status (productid, download_pending) VALUES (?1, 1)",
        )
        .bind(productid)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE metadata_status SET download_pending = 1 WHERE productid = ?1")
            .bind(productid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_metadata_status(&self, productid: i64) -> WarehouseResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO metadata_status (productid, download_pending) VALUES (?1, 1)",
        )
        .bind(productid)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_metadata_pending(&self, productid: i64) -> WarehouseResult<()> {
        sqlx::query("UPDATE metadata_status SET download_pending = 1 WHERE productid = ?1")
            .bind(productid)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn metadata_status(
        &self,
        productid: i64,
    ) -> WarehouseResult<Option<MetadataStatusRow>> {
        let row = sqlx::query_as::<_, MetadataStatusRow>(
            "SELECT * FROM metadata_status WHERE productid = ?1",
        )
        .bind(productid)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn pending_metadata(&self) -> WarehouseResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT productid FROM metadata_status WHERE download_pending = 1 ORDER BY productid",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    async fn metadata_ready_for_load(&self) -> WarehouseResult<Vec<MetadataStatusRow>> {
        let rows = sqlx::query_as::<_, MetadataStatusRow>(
            "SELECT * FROM metadata_status \
             WHERE download_pending = 0 AND last_file_hash IS NOT NULL \
               AND (last_loaded_hash IS NULL OR last_loaded_hash != last_file_hash) \
             ORDER BY productid",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn set_metadata_loaded_hash(
        &self,
        productid: i64,
        file_hash: &str,
    ) -> WarehouseResult<()> {
        sqlx::query("UPDATE metadata_status SET last_loaded_hash = ?2 WHERE productid = ?1")
            .bind(productid)
            .bind(file_hash)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeLogRepo for SqliteStore {
    async fn record_changes(&self, date: Date, productids: &[i64]) -> WarehouseResult<u64> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;

        if productids.is_empty() {
            sqlx::query(
                "INSERT OR IGNORE INTO changed_cubes_log (productid, change_date) VALUES (?1, ?2)",
            )
            .bind(NO_CHANGES_MARKER)
            .bind(date)
            .execute(&mut *tx)
            .await?;
        } else {
            for pid in productids {
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO changed_cubes_log (productid, change_date) \
                     VALUES (?1, ?2)",
                )
                .bind(pid)
                .bind(date)
                .execute(&mut *tx)
                .await?;
                inserted += result.rows_affected();
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn last_checked_date(&self) -> WarehouseResult<Option<Date>> {
        let date: Option<Date> =
            sqlx::query_scalar("SELECT MAX(change_date) FROM changed_cubes_log")
                .fetch_one(self.pool())
                .await?;
        Ok(date)
    }

    async fn latest_change_dates(&self) -> WarehouseResult<Vec<ChangedCubeRow>> {
        let rows = sqlx::query_as::<_, ChangedCubeRow>(
            "SELECT productid, MAX(change_date) AS change_date FROM changed_cubes_log \
             WHERE productid != ?1 GROUP BY productid ORDER BY productid",
        )
        .bind(NO_CHANGES_MARKER)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SpineRepo for SqliteStore {
    async fn replace_spine(
        &self,
        cubes: &[SpineCubeRow],
        subjects: &[CubeSubjectRow],
        surveys: &[CubeSurveyRow],
    ) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM spine_cube").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM spine_cube_subject")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM spine_cube_survey")
            .execute(&mut *tx)
            .await?;

        for cube in cubes {
            sqlx::query(
                "INSERT INTO spine_cube \
                 (productid, cansim_id, title_en, title_fr, start_date, end_date, \
                  release_date, archived, frequency_code, issue_date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(cube.productid)
            .bind(&cube.cansim_id)
            .bind(&cube.title_en)
            .bind(&cube.title_fr)
            .bind(cube.start_date)
            .bind(cube.end_date)
            .bind(cube.release_date)
            .bind(cube.archived)
            .bind(cube.frequency_code)
            .bind(cube.issue_date)
            .execute(&mut *tx)
            .await?;
        }

        for subject in subjects {
            sqlx::query(
                "INSERT OR IGNORE INTO spine_cube_subject (productid, subject_code) \
                 VALUES (?1, ?2)",
            )
            .bind(subject.productid)
            .bind(&subject.subject_code)
            .execute(&mut *tx)
            .await?;
        }

        for survey in surveys {
            sqlx::query(
                "INSERT OR IGNORE INTO spine_cube_survey (productid, survey_code) \
                 VALUES (?1, ?2)",
            )
            .bind(survey.productid)
            .bind(&survey.survey_code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn spine_product_ids(&self) -> WarehouseResult<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT productid FROM spine_cube ORDER BY productid")
                .fetch_all(self.pool())
                .await?;
        Ok(ids)
    }

    async fn spine_cube_count(&self) -> WarehouseResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spine_cube")
            .fetch_one(self.pool())
            .await?;
        Ok(count as u64)
    }

    async fn spine_cube(&self, productid: i64) -> WarehouseResult<Option<SpineCubeRow>> {
        let row =
            sqlx::query_as::<_, SpineCubeRow>("SELECT * FROM spine_cube WHERE productid = ?1")
                .bind(productid)
                .fetch_optional(self.pool())
                .await?;
        Ok(row)
    }

    async fn cube_subjects(&self, productid: i64) -> WarehouseResult<Vec<CubeSubjectRow>> {
        let rows = sqlx::query_as::<_, CubeSubjectRow>(
            "SELECT * FROM spine_cube_subject WHERE productid = ?1 ORDER BY subject_code",
        )
        .bind(productid)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn cube_surveys(&self, productid: i64) -> WarehouseResult<Vec<CubeSurveyRow>> {
        let rows = sqlx::query_as::<_, CubeSurveyRow>(
            "SELECT * FROM spine_cube_survey WHERE productid = ?1 ORDER BY survey_code",
        )
        .bind(productid)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl DictionaryRepo for SqliteStore {
    async fn replace_raw_product(
        &self,
        productid: i64,
        dimensions: &[RawDimensionRow],
        members: &[RawMemberRow],
    ) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM raw_dimension WHERE productid = ?1")
            .bind(productid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM raw_member WHERE productid = ?1")
            .bind(productid)
            .execute(&mut *tx)
            .await?;

        for dim in dimensions {
            sqlx::query(
                "INSERT OR IGNORE INTO raw_dimension \
                 (productid, dimension_position, name_en, name_fr, has_uom) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(dim.productid)
            .bind(dim.dimension_position)
            .bind(&dim.name_en)
            .bind(&dim.name_fr)
            .bind(dim.has_uom)
            .execute(&mut *tx)
            .await?;
        }

        for member in members {
            sqlx::query(
                "INSERT OR IGNORE INTO raw_member \
                 (productid, dimension_position, member_id, parent_member_id, \
                  classification_code, classification_type_code, name_en, name_fr, \
                  uom_code, geo_level, vintage, terminated) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .bind(member.productid)
            .bind(member.dimension_position)
            .bind(member.member_id)
            .bind(member.parent_member_id)
            .bind(&member.classification_code)
            .bind(&member.classification_type_code)
            .bind(&member.name_en)
            .bind(&member.name_fr)
            .bind(member.uom_code)
            .bind(member.geo_level)
            .bind(member.vintage)
            .bind(member.terminated)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn raw_dimensions(&self) -> WarehouseResult<Vec<RawDimensionRow>> {
        let rows = sqlx::query_as::<_, RawDimensionRow>(
            "SELECT * FROM raw_dimension ORDER BY productid, dimension_position",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn raw_members(&self) -> WarehouseResult<Vec<RawMemberRow>> {
        let rows = sqlx::query_as::<_, RawMemberRow>(
            "SELECT * FROM raw_member ORDER BY productid, dimension_position, member_id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn raw_counts(&self) -> WarehouseResult<(u64, u64)> {
        let dims: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_dimension")
            .fetch_one(self.pool())
            .await?;
        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_member")
            .fetch_one(self.pool())
            .await?;
        Ok((dims as u64, members as u64))
    }
}

#[async_trait]
impl RegistryRepo for SqliteStore {
    async fn replace_processed_members(
        &self,
        rows: &[ProcessedMemberRow],
    ) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM processed_member")
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO processed_member \
                 (productid, dimension_position, member_id, member_hash, dimension_hash, \
                  name_en, name_fr, parent_member_id, uom_code, member_label_norm) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(row.productid)
            .bind(row.dimension_position)
            .bind(row.member_id)
            .bind(&row.member_hash)
            .bind(&row.dimension_hash)
            .bind(&row.name_en)
            .bind(&row.name_fr)
            .bind(row.parent_member_id)
            .bind(row.uom_code)
            .bind(&row.member_label_norm)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_processed_dimensions(
        &self,
        rows: &[ProcessedDimensionRow],
    ) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM processed_dimension")
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO processed_dimension \
                 (productid, dimension_position, dimension_hash, name_en, name_fr, has_uom) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(row.productid)
            .bind(row.dimension_position)
            .bind(&row.dimension_hash)
            .bind(&row.name_en)
            .bind(&row.name_fr)
            .bind(row.has_uom)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE processed_member SET dimension_hash = ?3 \
                 WHERE productid = ?1 AND dimension_position = ?2",
            )
            .bind(row.productid)
            .bind(row.dimension_position)
            .bind(&row.dimension_hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn processed_members(&self) -> WarehouseResult<Vec<ProcessedMemberRow>> {
        let rows = sqlx::query_as::<_, ProcessedMemberRow>(
            "SELECT * FROM processed_member ORDER BY productid, dimension_position, member_id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn processed_dimensions(&self) -> WarehouseResult<Vec<ProcessedDimensionRow>> {
        let rows = sqlx::query_as::<_, ProcessedDimensionRow>(
            "SELECT * FROM processed_dimension ORDER BY productid, dimension_position",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn replace_dimension_set(&self, rows: &[DimensionSetRow]) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM dimension_set")
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO dimension_set \
                 (dimension_hash, name_en, name_fr, usage_count, has_uom, is_tree, \
                  is_hetero, has_total, is_grabbag, is_exclusive) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(&row.dimension_hash)
            .bind(&row.name_en)
            .bind(&row.name_fr)
            .bind(row.usage_count)
            .bind(row.has_uom)
            .bind(row.is_tree)
            .bind(row.is_hetero)
            .bind(row.has_total)
            .bind(row.is_grabbag)
            .bind(row.is_exclusive)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_dimension_set_members(
        &self,
        rows: &[DimensionSetMemberRow],
    ) -> WarehouseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM dimension_set_member")
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO dimension_set_member \
                 (dimension_hash, member_id, name_en, name_fr, parent_member_id, \
                  uom_code, usage_count, tree_level, base_name) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&row.dimension_hash)
            .bind(row.member_id)
            .bind(&row.name_en)
            .bind(&row.name_fr)
            .bind(row.parent_member_id)
            .bind(row.uom_code)
            .bind(row.usage_count)
            .bind(row.tree_level)
            .bind(&row.base_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn dimension_set(&self) -> WarehouseResult<Vec<DimensionSetRow>> {
        let rows = sqlx::query_as::<_, DimensionSetRow>(
            "SELECT * FROM dimension_set ORDER BY dimension_hash",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn dimension_set_members(&self) -> WarehouseResult<Vec<DimensionSetMemberRow>> {
        let rows = sqlx::query_as::<_, DimensionSetMemberRow>(
            "SELECT * FROM dimension_set_member ORDER BY dimension_hash, member_id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn update_member_base_names(
        &self,
        names: &[(String, i64, String)],
    ) -> WarehouseResult<u64> {
        let mut tx = self.pool().begin().await?;
        let mut updated = 0u64;
        for (dimension_hash, member_id, base_name) in names {
            let result = sqlx::query(
                "UPDATE dimension_set_member SET base_name = ?3 \
                 WHERE dimension_hash = ?1 AND member_id = ?2",
            )
            .bind(dimension_hash)
            .bind(member_id)
            .bind(base_name)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }
}

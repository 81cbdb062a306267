//! Spine loader: active snapshot JSON into the catalog tables.

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use cubehouse_metadata::models::{CubeSubjectRow, CubeSurveyRow, SpineCubeRow};
use cubehouse_wds::{parse_spine, SpineCubeRecord};
use std::collections::BTreeSet;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

const ISO_DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Result of a spine load.
#[derive(Debug, Clone, Default)]
pub struct SpineLoadSummary {
    pub cubes: usize,
    pub subjects: usize,
    pub surveys: usize,
}

/// Replace the catalog tables from the active spine snapshot.
///
/// Runs as an exclusive phase; the replace itself is one transaction, so
/// a rejected snapshot leaves the previous catalog untouched.
pub async fn load_spine(ctx: &PipelineContext) -> PipelineResult<SpineLoadSummary> {
    let _guard = ctx.phase_guard().await;

    let active = ctx
        .warehouse
        .active_spine()
        .await?
        .ok_or(PipelineError::NoActiveArtifact("spine"))?;

    let bytes = tokio::fs::read(&active.storage_location).await?;
    let records = parse_spine(&bytes)?;
    let (cubes, subjects, surveys) = project_spine(&records, ctx.config.ingest.spine_min_cubes)?;

    let summary = SpineLoadSummary {
        cubes: cubes.len(),
        subjects: subjects.len(),
        surveys: surveys.len(),
    };

    ctx.warehouse
        .replace_spine(&cubes, &subjects, &surveys)
        .await?;

    tracing::info!(
        cubes = summary.cubes,
        subjects = summary.subjects,
        surveys = summary.surveys,
        "spine catalog replaced"
    );
    Ok(summary)
}

/// Project raw records into catalog rows, validating before any truncate.
fn project_spine(
    records: &[SpineCubeRecord],
    min_cubes: usize,
) -> PipelineResult<(Vec<SpineCubeRow>, Vec<CubeSubjectRow>, Vec<CubeSurveyRow>)> {
    let mut cubes = Vec::with_capacity(records.len());
    let mut subjects = Vec::new();
    let mut surveys = Vec::new();
    let mut seen = BTreeSet::new();

    for record in records {
        let Some(productid) = record.product_id else {
            return Err(PipelineError::SpineRejected(
                "record with missing product id".to_string(),
            ));
        };
        if !seen.insert(productid) {
            return Err(PipelineError::SpineRejected(format!(
                "duplicate product id {productid}"
            )));
        }

        let title_en = record
            .cube_title_en
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        if title_en.is_empty() {
            return Err(PipelineError::SpineRejected(format!(
                "product {productid} has an empty English title"
            )));
        }

        cubes.push(SpineCubeRow {
            productid,
            cansim_id: record.cansim_id.clone(),
            title_en: title_en.to_string(),
            title_fr: record.cube_title_fr.clone(),
            start_date: parse_date_prefix(record.cube_start_date.as_deref()),
            end_date: parse_date_prefix(record.cube_end_date.as_deref()),
            release_date: parse_date_prefix(record.release_time.as_deref()),
            archived: record.archived,
            frequency_code: record.frequency_code,
            issue_date: parse_date_prefix(record.issue_date.as_deref()),
        });

        for code in &record.subject_code {
            subjects.push(CubeSubjectRow {
                productid,
                subject_code: code.clone(),
            });
        }
        for code in &record.survey_code {
            surveys.push(CubeSurveyRow {
                productid,
                survey_code: code.clone(),
            });
        }
    }

    if cubes.len() < min_cubes {
        return Err(PipelineError::SpineRejected(format!(
            "only {} cubes staged, expected at least {min_cubes}",
            cubes.len()
        )));
    }

    Ok((cubes, subjects, surveys))
}

/// Parse the date prefix of a WDS date or datetime string.
///
/// The feed mixes plain dates with timestamps like
/// `2024-01-05T08:30`; only the date part is kept.
fn parse_date_prefix(value: Option<&str>) -> Option<Date> {
    let value = value?.trim();
    let prefix = value.get(..10)?;
    Date::parse(prefix, ISO_DATE).ok()
}

//! Raw dimension loader: active metadata JSON into the dictionary tables.

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use cubehouse_metadata::models::{MetadataStatusRow, RawDimensionRow, RawMemberRow};
use cubehouse_wds::{parse_cube_metadata, CubeMetadata};

/// Result of a raw dimension load pass.
#[derive(Debug, Clone, Default)]
pub struct RawLoadSummary {
    pub products: usize,
    pub failed: usize,
    pub dimensions: u64,
    pub members: u64,
}

/// Parse every product whose fetched metadata is ahead of the raw-load
/// watermark. One product failing must not abort the pass.
pub async fn load_raw_dimensions(ctx: &PipelineContext) -> PipelineResult<RawLoadSummary> {
    let ready = ctx.warehouse.metadata_ready_for_load().await?;
    let mut summary = RawLoadSummary::default();

    for status in &ready {
        match load_one_product(ctx, status).await {
            Ok((dimensions, members)) => {
                summary.products += 1;
                summary.dimensions += dimensions;
                summary.members += members;
            }
            Err(e) => {
                // The product keeps its current status flags and will be
                // retried once a new metadata file arrives (or the same
                // one, on the next pass after the problem is fixed).
                summary.failed += 1;
                tracing::warn!(productid = status.productid, error = %e, "metadata parse failed, product skipped");
            }
        }
    }

    tracing::info!(
        products = summary.products,
        failed = summary.failed,
        dimensions = summary.dimensions,
        members = summary.members,
        "raw dimension load complete"
    );
    Ok(summary)
}

async fn load_one_product(
    ctx: &PipelineContext,
    status: &MetadataStatusRow,
) -> PipelineResult<(u64, u64)> {
    let productid = status.productid;
    let artifact = ctx
        .warehouse
        .active_metadata(productid)
        .await?
        .ok_or(PipelineError::NoActiveArtifact("metadata"))?;

    let bytes = tokio::fs::read(&artifact.storage_location).await?;
    let metadata = parse_cube_metadata(&bytes)?;
    inspect_unknown_fields(productid, &metadata);

    let (dimensions, members) = project_dictionary(productid, &metadata);
    ctx.warehouse
        .replace_raw_product(productid, &dimensions, &members)
        .await?;
    ctx.warehouse
        .set_metadata_loaded_hash(productid, &artifact.file_hash)
        .await?;

    Ok((dimensions.len() as u64, members.len() as u64))
}

/// Surface WDS keys the decoder does not know about, so upstream schema
/// drift shows up in the logs instead of disappearing.
fn inspect_unknown_fields(productid: i64, metadata: &CubeMetadata) {
    let mut keys: Vec<&str> = metadata.extra.keys().map(String::as_str).collect();
    for dimension in &metadata.dimension {
        keys.extend(dimension.extra.keys().map(String::as_str));
        for member in &dimension.member {
            keys.extend(member.extra.keys().map(String::as_str));
        }
    }
    keys.sort_unstable();
    keys.dedup();
    if !keys.is_empty() {
        tracing::debug!(productid = productid, keys = ?keys, "unrecognized metadata fields");
    }
}

/// Project parsed metadata into raw dictionary rows, skipping entries
/// without usable keys the way the feed occasionally requires.
fn project_dictionary(
    productid: i64,
    metadata: &CubeMetadata,
) -> (Vec<RawDimensionRow>, Vec<RawMemberRow>) {
    let mut dimensions = Vec::new();
    let mut members = Vec::new();

    for dimension in &metadata.dimension {
        let Some(position) = dimension.dimension_position_id else {
            tracing::warn!(productid = productid, "dimension without position skipped");
            continue;
        };

        dimensions.push(RawDimensionRow {
            productid,
            dimension_position: position,
            name_en: dimension.dimension_name_en.clone(),
            name_fr: dimension.dimension_name_fr.clone(),
            has_uom: dimension.has_uom,
        });

        for member in &dimension.member {
            let Some(member_id) = member.member_id else {
                tracing::debug!(
                    productid = productid,
                    position = position,
                    "member without id skipped"
                );
                continue;
            };

            members.push(RawMemberRow {
                productid,
                dimension_position: position,
                member_id,
                parent_member_id: member.parent_member_id,
                classification_code: member.classification_code.clone(),
                classification_type_code: member.classification_type_code.clone(),
                name_en: member.member_name_en.clone(),
                name_fr: member.member_name_fr.clone(),
                uom_code: member.member_uom_code,
                geo_level: member.geo_level,
                vintage: member.vintage,
                terminated: member.terminated.unwrap_or(0) != 0,
            });
        }
    }

    (dimensions, members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_skips_keyless_entries() {
        let json = serde_json::json!({
            "productId": "10100001",
            "dimension": [
                {
                    "dimensionPositionId": 1,
                    "dimensionNameEn": "Geography",
                    "member": [
                        {"memberId": 1, "memberNameEn": "Canada"},
                        {"memberNameEn": "No id, skipped"}
                    ]
                },
                {"dimensionNameEn": "No position, skipped"}
            ]
        });
        let metadata: CubeMetadata = serde_json::from_value(json).unwrap();
        let (dimensions, members) = project_dictionary(10100001, &metadata);
        assert_eq!(dimensions.len(), 1);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].member_id, 1);
    }

    #[test]
    fn project_coerces_terminated_flag() {
        let json = serde_json::json!({
            "dimension": [{
                "dimensionPositionId": 1,
                "member": [
                    {"memberId": 1, "terminated": 1},
                    {"memberId": 2, "terminated": 0},
                    {"memberId": 3}
                ]
            }]
        });
        let metadata: CubeMetadata = serde_json::from_value(json).unwrap();
        let (_, members) = project_dictionary(1, &metadata);
        assert!(members[0].terminated);
        assert!(!members[1].terminated);
        assert!(!members[2].terminated);
    }
}

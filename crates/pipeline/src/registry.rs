//! Dimension registry builder.
//!
//! Four deterministic stages over the raw dictionary tables:
//!
//! 1. processed members: normalize labels, hash member identity
//! 2. processed dimensions: hash sorted member hashes per cube dimension
//! 3. canonical `dimension_set`: dedupe by dimension hash, label consensus
//! 4. canonical `dimension_set_member`: per-member consensus, tree levels,
//!    base names
//!
//! Every stage rebuilds its table wholesale, so running the builder twice
//! over unchanged raw tables produces byte-identical output. All grouping
//! uses ordered maps and every tie is broken (count, then lexicographic,
//! then product id), which is what makes that guarantee hold.

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use cubehouse_core::{dimension_hash, member_hash, member_label_norm, title_case, LabelNormalizer};
use cubehouse_metadata::models::{
    DimensionSetMemberRow, DimensionSetRow, ProcessedDimensionRow, ProcessedMemberRow,
    RawDimensionRow, RawMemberRow,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Pluggable grab-bag heuristic.
///
/// The upstream rule ("name includes 'characteristics' or 'other'") is
/// ambiguous for non-English cubes, so the classifier is swappable on the
/// context.
pub trait GrabbagClassifier: Send + Sync {
    fn is_grabbag(&self, name_en: &str) -> bool;
}

/// Default English-name heuristic.
pub struct NameHeuristicClassifier;

impl GrabbagClassifier for NameHeuristicClassifier {
    fn is_grabbag(&self, name_en: &str) -> bool {
        let lower = name_en.to_lowercase();
        ["characteristics", "other", "miscellaneous"]
            .iter()
            .any(|term| lower.contains(term))
    }
}

/// Result of a registry build.
#[derive(Debug, Clone, Default)]
pub struct RegistryBuildSummary {
    pub raw_members: usize,
    pub processed_members: usize,
    pub processed_dimensions: usize,
    pub canonical_dimensions: usize,
    pub canonical_members: usize,
    pub cycles: usize,
}

/// Run stages 1 through 4 against the warehouse.
pub async fn build_registry(ctx: &PipelineContext) -> PipelineResult<RegistryBuildSummary> {
    let _guard = ctx.phase_guard().await;

    let raw_members = ctx.warehouse.raw_members().await?;
    let raw_dimensions = ctx.warehouse.raw_dimensions().await?;

    // Stage 1
    let mut processed_members = stage_processed_members(&raw_members);
    ctx.warehouse
        .replace_processed_members(&processed_members)
        .await?;

    // Stage 2 (also stamps dimension_hash onto the in-memory members)
    let processed_dimensions =
        stage_processed_dimensions(&mut processed_members, &raw_dimensions);
    ctx.warehouse
        .replace_processed_dimensions(&processed_dimensions)
        .await?;

    // Member consensus feeds both canonical layers.
    let consensus = consensus_members(&processed_members);

    // Stage 3
    let dimension_set = stage_dimension_set(
        &processed_dimensions,
        &consensus,
        ctx.normalizer.as_ref(),
        ctx.grabbag.as_ref(),
    );
    ctx.warehouse.replace_dimension_set(&dimension_set).await?;

    // Stage 4
    let (canonical_members, cycles) =
        stage_dimension_set_members(&consensus, &dimension_set, ctx.normalizer.as_ref());
    ctx.warehouse
        .replace_dimension_set_members(&canonical_members)
        .await?;

    let summary = RegistryBuildSummary {
        raw_members: raw_members.len(),
        processed_members: processed_members.len(),
        processed_dimensions: processed_dimensions.len(),
        canonical_dimensions: dimension_set.len(),
        canonical_members: canonical_members.len(),
        cycles,
    };
    tracing::info!(
        raw_members = summary.raw_members,
        dimensions = summary.processed_dimensions,
        canonical_dimensions = summary.canonical_dimensions,
        canonical_members = summary.canonical_members,
        cycles = summary.cycles,
        "registry build complete"
    );
    Ok(summary)
}

/// Recompute `base_name` on the canonical members with the context's
/// normalizer. Used when swapping in a different normalizer without
/// rebuilding the whole registry.
pub async fn normalize_labels(ctx: &PipelineContext) -> PipelineResult<u64> {
    let members = ctx.warehouse.dimension_set_members().await?;
    let names: Vec<(String, i64, String)> = members
        .iter()
        .filter_map(|m| {
            m.name_en.as_deref().map(|name| {
                (
                    m.dimension_hash.clone(),
                    m.member_id,
                    ctx.normalizer.normalize(name),
                )
            })
        })
        .collect();
    let updated = ctx.warehouse.update_member_base_names(&names).await?;
    tracing::info!(updated = updated, "base names normalized");
    Ok(updated)
}

// =============================================================================
// Stage 1: processed members
// =============================================================================

pub fn stage_processed_members(raw: &[RawMemberRow]) -> Vec<ProcessedMemberRow> {
    raw.iter()
        .map(|m| {
            let label_norm = member_label_norm(m.name_en.as_deref().unwrap_or(""));
            let hash = member_hash(m.member_id, &label_norm, m.parent_member_id, m.uom_code);
            ProcessedMemberRow {
                productid: m.productid,
                dimension_position: m.dimension_position,
                member_id: m.member_id,
                member_hash: hash.to_string(),
                dimension_hash: None,
                name_en: m.name_en.clone(),
                name_fr: m.name_fr.clone(),
                parent_member_id: m.parent_member_id,
                uom_code: m.uom_code,
                member_label_norm: label_norm,
            }
        })
        .collect()
}

// =============================================================================
// Stage 2: processed dimensions
// =============================================================================

pub fn stage_processed_dimensions(
    members: &mut [ProcessedMemberRow],
    raw_dimensions: &[RawDimensionRow],
) -> Vec<ProcessedDimensionRow> {
    let names: BTreeMap<(i64, i64), &RawDimensionRow> = raw_dimensions
        .iter()
        .map(|d| ((d.productid, d.dimension_position), d))
        .collect();

    let mut groups: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, member) in members.iter().enumerate() {
        groups
            .entry((member.productid, member.dimension_position))
            .or_default()
            .push(i);
    }

    let mut out = Vec::with_capacity(groups.len());
    for ((productid, dimension_position), mut indexes) in groups {
        indexes.sort_by_key(|&i| members[i].member_id);
        let hashes: Vec<&str> = indexes
            .iter()
            .map(|&i| members[i].member_hash.as_str())
            .collect();
        let hash = dimension_hash(&hashes).to_string();
        let has_uom = indexes.iter().any(|&i| members[i].uom_code.is_some());

        for &i in &indexes {
            members[i].dimension_hash = Some(hash.clone());
        }

        let raw = names.get(&(productid, dimension_position));
        out.push(ProcessedDimensionRow {
            productid,
            dimension_position,
            dimension_hash: hash,
            name_en: raw.and_then(|d| d.name_en.clone()),
            name_fr: raw.and_then(|d| d.name_fr.clone()),
            has_uom,
        });
    }
    out
}

// =============================================================================
// Member consensus
// =============================================================================

/// Consensus attributes for one `(dimension_hash, member_id)` pair.
#[derive(Debug, Clone)]
pub struct MemberConsensus {
    pub dimension_hash: String,
    pub member_id: i64,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub parent_member_id: Option<i64>,
    pub uom_code: Option<i64>,
    pub usage_count: i64,
}

/// Reduce processed members to one consensus row per
/// `(dimension_hash, member_id)`.
pub fn consensus_members(members: &[ProcessedMemberRow]) -> Vec<MemberConsensus> {
    let mut groups: BTreeMap<(&str, i64), Vec<&ProcessedMemberRow>> = BTreeMap::new();
    for member in members {
        let Some(hash) = member.dimension_hash.as_deref() else {
            continue;
        };
        groups.entry((hash, member.member_id)).or_default().push(member);
    }

    groups
        .into_iter()
        .map(|((hash, member_id), rows)| {
            let usage_count = rows
                .iter()
                .map(|r| (r.productid, r.dimension_position))
                .collect::<BTreeSet<_>>()
                .len() as i64;

            MemberConsensus {
                dimension_hash: hash.to_string(),
                member_id,
                name_en: mode_string(rows.iter().map(|r| (r.name_en.as_deref(), r.productid))),
                name_fr: mode_string(rows.iter().map(|r| (r.name_fr.as_deref(), r.productid))),
                parent_member_id: mode_i64(
                    rows.iter().map(|r| (r.parent_member_id, r.productid)),
                ),
                uom_code: mode_i64(rows.iter().map(|r| (r.uom_code, r.productid))),
                usage_count,
            }
        })
        .collect()
}

/// Mode over non-null strings: highest count wins, ties break to the
/// lexicographically smallest value, then the smallest contributing
/// product id. `None` wins only when nothing else was observed.
fn mode_string<'a>(values: impl Iterator<Item = (Option<&'a str>, i64)>) -> Option<String> {
    let mut counts: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
    for (value, productid) in values {
        let Some(value) = value else { continue };
        let entry = counts.entry(value).or_insert((0, productid));
        entry.0 += 1;
        entry.1 = entry.1.min(productid);
    }

    let mut entries: Vec<(&str, usize, i64)> =
        counts.into_iter().map(|(v, (c, p))| (v, c, p)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)).then(a.2.cmp(&b.2)));
    entries.first().map(|e| e.0.to_string())
}

/// Same contract as [`mode_string`] for integer attributes; "lexicographic"
/// becomes ascending numeric order.
fn mode_i64(values: impl Iterator<Item = (Option<i64>, i64)>) -> Option<i64> {
    let mut counts: BTreeMap<i64, (usize, i64)> = BTreeMap::new();
    for (value, productid) in values {
        let Some(value) = value else { continue };
        let entry = counts.entry(value).or_insert((0, productid));
        entry.0 += 1;
        entry.1 = entry.1.min(productid);
    }

    let mut entries: Vec<(i64, usize, i64)> =
        counts.into_iter().map(|(v, (c, p))| (v, c, p)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)).then(a.2.cmp(&b.2)));
    entries.first().map(|e| e.0)
}

// =============================================================================
// Stage 3: canonical dimension_set
// =============================================================================

pub fn stage_dimension_set(
    dimensions: &[ProcessedDimensionRow],
    members: &[MemberConsensus],
    normalizer: &dyn LabelNormalizer,
    grabbag: &dyn GrabbagClassifier,
) -> Vec<DimensionSetRow> {
    let mut groups: BTreeMap<&str, Vec<&ProcessedDimensionRow>> = BTreeMap::new();
    for dimension in dimensions {
        groups
            .entry(dimension.dimension_hash.as_str())
            .or_default()
            .push(dimension);
    }

    let mut members_by_hash: BTreeMap<&str, Vec<&MemberConsensus>> = BTreeMap::new();
    for member in members {
        members_by_hash
            .entry(member.dimension_hash.as_str())
            .or_default()
            .push(member);
    }

    groups
        .into_iter()
        .map(|(hash, group)| {
            let name_en =
                mode_string(group.iter().map(|d| (d.name_en.as_deref(), d.productid)))
                    .map(|n| title_case(&n));
            let name_fr =
                mode_string(group.iter().map(|d| (d.name_fr.as_deref(), d.productid)))
                    .map(|n| title_case(&n));

            let empty = Vec::new();
            let dim_members = members_by_hash.get(hash).unwrap_or(&empty);

            let is_tree = dim_members.iter().any(|m| m.parent_member_id.is_some());
            let distinct_uoms: BTreeSet<i64> =
                dim_members.iter().filter_map(|m| m.uom_code).collect();
            let has_total = dim_members.iter().any(|m| {
                m.name_en
                    .as_deref()
                    .is_some_and(|n| normalizer.has_total_token(n))
                    || m.name_fr
                        .as_deref()
                        .is_some_and(|n| normalizer.has_total_token(n))
            });

            DimensionSetRow {
                dimension_hash: hash.to_string(),
                is_grabbag: name_en
                    .as_deref()
                    .is_some_and(|n| grabbag.is_grabbag(n)),
                name_en,
                name_fr,
                usage_count: group.len() as i64,
                has_uom: group.iter().any(|d| d.has_uom),
                is_tree,
                is_hetero: distinct_uoms.len() > 1,
                has_total,
                is_exclusive: None,
            }
        })
        .collect()
}

// =============================================================================
// Stage 4: canonical dimension_set_member
// =============================================================================

pub fn stage_dimension_set_members(
    consensus: &[MemberConsensus],
    dimension_set: &[DimensionSetRow],
    normalizer: &dyn LabelNormalizer,
) -> (Vec<DimensionSetMemberRow>, usize) {
    let tree_hashes: BTreeSet<&str> = dimension_set
        .iter()
        .filter(|d| d.is_tree)
        .map(|d| d.dimension_hash.as_str())
        .collect();

    let mut groups: BTreeMap<&str, Vec<&MemberConsensus>> = BTreeMap::new();
    for member in consensus {
        groups
            .entry(member.dimension_hash.as_str())
            .or_default()
            .push(member);
    }

    let mut out = Vec::with_capacity(consensus.len());
    let mut cycles = 0usize;

    for (hash, group) in groups {
        let levels = if tree_hashes.contains(hash) {
            let edges: Vec<(i64, Option<i64>)> = group
                .iter()
                .map(|m| (m.member_id, m.parent_member_id))
                .collect();
            match compute_tree_levels(&edges) {
                Some(levels) => Some(levels),
                None => {
                    cycles += 1;
                    tracing::warn!(
                        dimension_hash = hash,
                        "parent cycle detected, tree levels left null"
                    );
                    None
                }
            }
        } else {
            None
        };

        for member in group {
            out.push(DimensionSetMemberRow {
                dimension_hash: member.dimension_hash.clone(),
                member_id: member.member_id,
                name_en: member.name_en.clone(),
                name_fr: member.name_fr.clone(),
                parent_member_id: member.parent_member_id,
                uom_code: member.uom_code,
                usage_count: member.usage_count,
                tree_level: levels
                    .as_ref()
                    .and_then(|l| l.get(&member.member_id).copied()),
                base_name: member.name_en.as_deref().map(|n| normalizer.normalize(n)),
            });
        }
    }

    (out, cycles)
}

/// BFS levels from the roots of one dimension's parent forest.
///
/// Roots are members with no parent or a parent absent from the
/// dimension; they get level 1, children one more than their parent.
/// Returns `None` when a cycle leaves members unreachable.
pub fn compute_tree_levels(edges: &[(i64, Option<i64>)]) -> Option<BTreeMap<i64, i64>> {
    let ids: BTreeSet<i64> = edges.iter().map(|(id, _)| *id).collect();

    let mut children: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();

    for (id, parent) in edges {
        match parent {
            Some(parent) if ids.contains(parent) && parent != id => {
                children.entry(*parent).or_default().push(*id);
            }
            // Orphaned parents count as roots rather than poisoning the
            // whole dimension; a self-reference is a cycle.
            Some(parent) if parent == id => {}
            _ => queue.push_back((*id, 1)),
        }
    }

    let mut levels: BTreeMap<i64, i64> = BTreeMap::new();
    while let Some((id, level)) = queue.pop_front() {
        if levels.contains_key(&id) {
            continue;
        }
        levels.insert(id, level);
        if let Some(kids) = children.get(&id) {
            for &kid in kids {
                if !levels.contains_key(&kid) {
                    queue.push_back((kid, level + 1));
                }
            }
        }
    }

    (levels.len() == ids.len()).then_some(levels)
}

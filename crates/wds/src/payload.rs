//! WDS payload types and tolerant decoding.
//!
//! The WDS emits inconsistently typed JSON: product ids arrive as numbers
//! in the spine but strings in cube metadata, flags flip between booleans
//! and 0/1, and new keys appear without notice. Known fields decode
//! through coercing helpers; everything unrecognized is captured in an
//! `extra` map so schema drift is observable instead of silent.

use crate::error::{WdsError, WdsResult};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Standard WDS response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub object: T,
}

impl<T> Envelope<T> {
    fn into_success(self, endpoint: &str) -> WdsResult<T> {
        if self.status != "SUCCESS" {
            return Err(WdsError::Upstream {
                endpoint: endpoint.to_string(),
                status: self.status,
            });
        }
        Ok(self.object)
    }
}

/// One entry of the change feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedCubeEntry {
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub release_time: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub response_status_code: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One cube of the spine snapshot (`getAllCubesListLite`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpineCubeRecord {
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub product_id: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_string")]
    pub cansim_id: Option<String>,
    #[serde(default)]
    pub cube_title_en: Option<String>,
    #[serde(default)]
    pub cube_title_fr: Option<String>,
    #[serde(default)]
    pub cube_start_date: Option<String>,
    #[serde(default)]
    pub cube_end_date: Option<String>,
    #[serde(default)]
    pub release_time: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub archived: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub frequency_code: Option<i64>,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default, deserialize_with = "flex::string_vec")]
    pub subject_code: Vec<String>,
    #[serde(default, deserialize_with = "flex::string_vec")]
    pub survey_code: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Cube metadata object (`getCubeMetadata`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeMetadata {
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub cube_title_en: Option<String>,
    #[serde(default)]
    pub cube_title_fr: Option<String>,
    #[serde(default)]
    pub dimension: Vec<DimensionMeta>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One dimension definition inside cube metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionMeta {
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub dimension_position_id: Option<i64>,
    #[serde(default)]
    pub dimension_name_en: Option<String>,
    #[serde(default)]
    pub dimension_name_fr: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_bool")]
    pub has_uom: Option<bool>,
    #[serde(default)]
    pub member: Vec<MemberMeta>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One member definition inside a dimension.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMeta {
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub member_id: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub parent_member_id: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_string")]
    pub classification_code: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_string")]
    pub classification_type_code: Option<String>,
    #[serde(default)]
    pub member_name_en: Option<String>,
    #[serde(default)]
    pub member_name_fr: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub member_uom_code: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub geo_level: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub vintage: Option<i64>,
    #[serde(default, deserialize_with = "flex::opt_i64")]
    pub terminated: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Decode a spine snapshot payload.
pub fn parse_spine(bytes: &[u8]) -> WdsResult<Vec<SpineCubeRecord>> {
    serde_json::from_slice(bytes).map_err(|e| WdsError::Malformed {
        endpoint: "getAllCubesListLite".to_string(),
        detail: e.to_string(),
    })
}

/// Decode a cube metadata payload.
///
/// The endpoint wraps the object in a one-element array of envelopes.
pub fn parse_cube_metadata(bytes: &[u8]) -> WdsResult<CubeMetadata> {
    let endpoint = "getCubeMetadata";
    let envelopes: Vec<Envelope<CubeMetadata>> =
        serde_json::from_slice(bytes).map_err(|e| WdsError::Malformed {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;
    envelopes
        .into_iter()
        .next()
        .ok_or_else(|| WdsError::Malformed {
            endpoint: endpoint.to_string(),
            detail: "empty response array".to_string(),
        })?
        .into_success(endpoint)
}

/// Decode a cube download envelope into the signed URL.
pub fn parse_download_envelope(bytes: &[u8]) -> WdsResult<String> {
    let endpoint = "getFullTableDownloadCSV";
    let envelope: Envelope<String> =
        serde_json::from_slice(bytes).map_err(|e| WdsError::Malformed {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;
    envelope.into_success(endpoint)
}

pub(crate) fn parse_changed_cubes(bytes: &[u8]) -> WdsResult<Vec<ChangedCubeEntry>> {
    let endpoint = "getChangedCubeList";
    let envelope: Envelope<Vec<ChangedCubeEntry>> =
        serde_json::from_slice(bytes).map_err(|e| WdsError::Malformed {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;
    envelope.into_success(endpoint)
}

/// Coercing deserializers for the WDS's loosely typed JSON.
mod flex {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    s.parse::<i64>().ok()
                }
            }
            Some(Value::Bool(b)) => Some(i64::from(b)),
            Some(_) => None,
        })
    }

    pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(b),
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" | "" => Some(false),
                _ => None,
            },
            Some(_) => None,
        })
    }

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                let s = s.trim().to_string();
                (!s.is_empty()).then_some(s)
            }
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) => None,
        })
    }

    pub fn string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => {
                        let s = s.trim().to_string();
                        (!s.is_empty()).then_some(s)
                    }
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }
}

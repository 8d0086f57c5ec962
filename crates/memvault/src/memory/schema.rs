//! On-disk schema generations and their normalization
//!
//! Two generations of record files coexist in a store. The current
//! generation is the serialized [`MemoryRecord`] tagged with
//! `"schema_version"`. The legacy generation is the older free-form shape:
//! either a single `content` body or a `conversation` transcript, with a
//! loosely-typed timestamp, importance and tag set. Both are decoded into
//! [`RawRecord`] at the store boundary and normalized into a [`MemoryRecord`]
//! before anything else sees them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MemvaultError, Result};
use crate::memory::types::{DEFAULT_KIND, MemoryRecord};

/// Version tag written into every current-generation unit
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Importance given to legacy records that carry none
pub const LEGACY_DEFAULT_IMPORTANCE: f32 = 0.5;

/// Which on-disk generation a unit was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaGeneration {
    Legacy,
    Current,
}

impl fmt::Display for SchemaGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaGeneration::Legacy => write!(f, "legacy"),
            SchemaGeneration::Current => write!(f, "current"),
        }
    }
}

/// A current-generation unit as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRecord {
    pub schema_version: u32,
    #[serde(flatten)]
    pub record: MemoryRecord,
}

/// One turn of a legacy conversation transcript
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
}

/// A legacy-generation unit. Identity comes from the file name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyRecord {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub conversation: Option<Vec<LegacyMessage>>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub importance: Option<Value>,
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default)]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub source: Option<String>,
}

/// A decoded unit of either generation
#[derive(Debug, Clone)]
pub enum RawRecord {
    Legacy { id: String, record: LegacyRecord },
    Current(CurrentRecord),
}

impl RawRecord {
    /// Decode the bytes of the unit stored under `id`.
    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| MemvaultError::Schema(format!("record {id} is not valid JSON: {e}")))?;

        let Value::Object(ref object) = value else {
            return Err(MemvaultError::Schema(format!(
                "record {id} is not a JSON object"
            )));
        };

        if object.contains_key("schema_version") {
            let current: CurrentRecord = serde_json::from_value(value)
                .map_err(|e| MemvaultError::Schema(format!("record {id}: {e}")))?;
            if current.record.id != id {
                return Err(MemvaultError::Schema(format!(
                    "record file {id} contains identifier {}",
                    current.record.id
                )));
            }
            Ok(RawRecord::Current(current))
        } else {
            let record: LegacyRecord = serde_json::from_value(value)
                .map_err(|e| MemvaultError::Schema(format!("legacy record {id}: {e}")))?;
            Ok(RawRecord::Legacy {
                id: id.to_string(),
                record,
            })
        }
    }

    pub fn generation(&self) -> SchemaGeneration {
        match self {
            RawRecord::Legacy { .. } => SchemaGeneration::Legacy,
            RawRecord::Current(_) => SchemaGeneration::Current,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RawRecord::Legacy { id, .. } => id,
            RawRecord::Current(current) => &current.record.id,
        }
    }
}

impl From<MemoryRecord> for RawRecord {
    fn from(record: MemoryRecord) -> Self {
        RawRecord::Current(CurrentRecord {
            schema_version: CURRENT_SCHEMA_VERSION,
            record,
        })
    }
}

#[derive(Serialize)]
struct CurrentRecordRef<'a> {
    schema_version: u32,
    #[serde(flatten)]
    record: &'a MemoryRecord,
}

/// Serialize a record as a current-generation unit.
pub fn encode(record: &MemoryRecord) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(&CurrentRecordRef {
        schema_version: CURRENT_SCHEMA_VERSION,
        record,
    })
    .map_err(|e| MemvaultError::Serialization(format!("failed to encode record {}: {e}", record.id)))
}

/// Convert a decoded unit into the current record shape.
///
/// Current records pass through untouched apart from a range check.
pub fn normalize(raw: RawRecord) -> Result<MemoryRecord> {
    match raw {
        RawRecord::Current(current) => {
            if current.schema_version != CURRENT_SCHEMA_VERSION {
                return Err(MemvaultError::Schema(format!(
                    "record {} has unsupported schema_version {}",
                    current.record.id, current.schema_version
                )));
            }
            let importance = current.record.importance;
            if !importance.is_finite() || !(0.0..=1.0).contains(&importance) {
                return Err(MemvaultError::Schema(format!(
                    "record {} has importance {importance} outside [0, 1]",
                    current.record.id
                )));
            }
            Ok(current.record)
        }
        RawRecord::Legacy { id, record } => normalize_legacy(id, record),
    }
}

fn normalize_legacy(id: String, legacy: LegacyRecord) -> Result<MemoryRecord> {
    let content = match (legacy.content, legacy.conversation) {
        (Some(content), _) => content,
        (None, Some(turns)) if !turns.is_empty() => turns
            .iter()
            .map(|turn| match turn.role.as_deref() {
                Some(role) if !role.is_empty() => format!("{role}: {}", turn.content),
                _ => turn.content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        (None, Some(_)) => {
            return Err(MemvaultError::Schema(format!(
                "legacy record {id} has an empty conversation"
            )));
        }
        (None, None) => {
            return Err(MemvaultError::Schema(format!(
                "legacy record {id} has neither content nor conversation"
            )));
        }
    };

    let created_at = match legacy.timestamp.as_deref() {
        Some(raw) => parse_legacy_timestamp(raw).ok_or_else(|| {
            MemvaultError::Schema(format!(
                "legacy record {id} has unparsable timestamp {raw:?}"
            ))
        })?,
        None => legacy_epoch(),
    };

    let importance = match legacy.importance {
        None | Some(Value::Null) => LEGACY_DEFAULT_IMPORTANCE,
        Some(value) => parse_legacy_importance(&value).ok_or_else(|| {
            MemvaultError::Schema(format!(
                "legacy record {id} has non-numeric importance {value}"
            ))
        })?,
    };

    let mut tags = parse_legacy_tags(&id, legacy.tags.as_ref())?;
    let metadata = legacy.metadata.unwrap_or_default();
    tags.extend(parse_legacy_tags(&id, metadata.get("tags"))?);

    let kind = legacy
        .memory_type
        .or_else(|| {
            metadata
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_KIND.to_string());

    Ok(MemoryRecord {
        id,
        content,
        created_at,
        importance,
        tags,
        kind,
        source: legacy.source,
        metadata,
    })
}

/// Creation date assumed for legacy records without a timestamp
fn legacy_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Accepts RFC 3339, naive ISO-8601 date-times (taken as UTC) and bare dates.
pub fn parse_legacy_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_legacy_importance(value: &Value) -> Option<f32> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !parsed.is_finite() {
        return None;
    }
    Some(parsed.clamp(0.0, 1.0) as f32)
}

fn parse_legacy_tags(id: &str, value: Option<&Value>) -> Result<BTreeSet<String>> {
    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    MemvaultError::Schema(format!("legacy record {id} has non-string tag {item}"))
                })
            })
            .collect(),
        Some(other) => Err(MemvaultError::Schema(format!(
            "legacy record {id} has malformed tags {other}"
        ))),
    }
}

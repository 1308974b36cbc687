//! Versioned encoding of the persisted observation store.
//!
//! Current layout (version 1):
//!
//! ```json
//! {"version": 1, "records": [
//!   {"daysSinceOptIn": 0, "url": "example.com", "xpath": "d/m",
//!    "mostSignificantUnit": "day-first", "frequency": 3,
//!    "distanceStats": {"count": 3, "mean": 4.0, "sumSquaredDelta": 2.0}}
//! ]}
//! ```
//!
//! A bare array of records is the unversioned legacy layout and is read as
//! version 0. `distanceStats` is optional; an absent block means no distance
//! samples yet.

use std::collections::HashMap;

use msu_math::RunningStats;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::record::{MostSignificantUnit, ObservationKey, ObservationRecord};

/// Version written by [`encode_records`].
pub const STORE_FORMAT_VERSION: u64 = 1;

/// Errors decoding the persisted store.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported store format version {found} (supported: 0..={supported})")]
    UnsupportedVersion { found: u64, supported: u64 },

    #[error("Invalid store layout: {0}")]
    InvalidLayout(String),

    #[error("Record {index}: {source}")]
    Field {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    version: u64,
    records: Vec<StoredRecord<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord<'a> {
    days_since_opt_in: u32,
    url: &'a str,
    xpath: &'a str,
    most_significant_unit: MostSignificantUnit,
    frequency: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_stats: Option<StoredStats>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredStats {
    #[serde(default)]
    count: u64,
    #[serde(default, serialize_with = "finite_f64")]
    mean: f64,
    #[serde(default, serialize_with = "finite_f64")]
    sum_squared_delta: f64,
}

/// serde_json writes non-finite floats as `null`, which would not decode.
fn finite_f64<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(S::Error::custom(format!(
            "non-finite value {} cannot be stored",
            value
        )));
    }
    serializer.serialize_f64(*value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnedRecord {
    days_since_opt_in: u32,
    url: String,
    xpath: String,
    most_significant_unit: MostSignificantUnit,
    frequency: u64,
    #[serde(default)]
    distance_stats: Option<StoredStats>,
}

/// Encode records into the current persisted layout.
pub fn encode_records(records: &[ObservationRecord]) -> Result<Value, serde_json::Error> {
    let envelope = Envelope {
        version: STORE_FORMAT_VERSION,
        records: records
            .iter()
            .map(|r| {
                let stats = r.distance_stats();
                StoredRecord {
                    days_since_opt_in: r.days_since_opt_in(),
                    url: r.context(),
                    xpath: r.pattern(),
                    most_significant_unit: r.unit(),
                    frequency: r.frequency(),
                    distance_stats: (!stats.is_empty()).then(|| StoredStats {
                        count: stats.count(),
                        mean: stats.mean(),
                        sum_squared_delta: stats.sum_squared_delta(),
                    }),
                }
            })
            .collect(),
    };
    serde_json::to_value(envelope)
}

/// Decode a persisted store.
///
/// `null` decodes to an empty store. Duplicate records (same identity) are
/// merged so the result never holds two matching records.
pub fn decode_records(value: &Value) -> Result<Vec<ObservationRecord>, DecodeError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(map) => {
            let version = map
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| DecodeError::InvalidLayout("missing numeric version".into()))?;
            if version == 0 || version > STORE_FORMAT_VERSION {
                return Err(DecodeError::UnsupportedVersion {
                    found: version,
                    supported: STORE_FORMAT_VERSION,
                });
            }
            match map.get("records") {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => return Ok(Vec::new()),
                Some(_) => {
                    return Err(DecodeError::InvalidLayout(
                        "records must be an array".into(),
                    ))
                }
            }
        }
        other => {
            return Err(DecodeError::InvalidLayout(format!(
                "expected object or array, got {}",
                json_kind(other)
            )))
        }
    };

    let mut records: Vec<ObservationRecord> = Vec::with_capacity(items.len());
    let mut positions: HashMap<ObservationKey, usize> = HashMap::new();

    for (index, item) in items.iter().enumerate() {
        let record = decode_record(index, item)?;
        match positions.get(record.key()) {
            Some(&pos) => {
                tracing::warn!(
                    index,
                    context = record.context(),
                    pattern = record.pattern(),
                    "merging duplicate observation record"
                );
                if !records[pos].absorb(&record) {
                    return Err(DecodeError::InvalidRecord {
                        index,
                        reason: "merging duplicate record overflows frequency or distance stats"
                            .into(),
                    });
                }
            }
            None => {
                positions.insert(record.key().clone(), records.len());
                records.push(record);
            }
        }
    }

    Ok(records)
}

fn decode_record(index: usize, item: &Value) -> Result<ObservationRecord, DecodeError> {
    let stored =
        OwnedRecord::deserialize(item).map_err(|source| DecodeError::Field { index, source })?;

    let stats = match stored.distance_stats {
        Some(s) => RunningStats::from_parts(s.count, s.mean, s.sum_squared_delta).ok_or_else(
            || DecodeError::InvalidRecord {
                index,
                reason: format!(
                    "inconsistent distance stats (count={}, mean={}, sumSquaredDelta={})",
                    s.count, s.mean, s.sum_squared_delta
                ),
            },
        )?,
        None => RunningStats::new(),
    };

    let key = ObservationKey::new(
        stored.days_since_opt_in,
        stored.url,
        stored.xpath,
        stored.most_significant_unit,
    );
    let frequency = stored.frequency;
    ObservationRecord::from_parts(key, frequency, stats).ok_or_else(|| {
        DecodeError::InvalidRecord {
            index,
            reason: format!(
                "frequency {} must be >= 1 and >= distance sample count {}",
                frequency,
                stats.count()
            ),
        }
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

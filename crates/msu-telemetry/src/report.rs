//! Report payload sent to the collection endpoint.

use msu_math::StatsSummary;
use serde::{Deserialize, Serialize};

use crate::record::{MostSignificantUnit, ObservationRecord};

/// `{participantIdentifier, entries}` body of a `data_point` POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub participant_identifier: String,
    pub entries: Vec<ReportEntry>,
}

/// Transmissible summary of one observation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub days_since_opt_in: u32,
    pub url: String,
    pub xpath: String,
    pub most_significant_unit: MostSignificantUnit,
    pub frequency: u64,
    /// Present only when more than one distance sample was seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_stats: Option<StatsSummary>,
}

impl From<&ObservationRecord> for ReportEntry {
    fn from(record: &ObservationRecord) -> Self {
        Self {
            days_since_opt_in: record.days_since_opt_in(),
            url: record.context().to_string(),
            xpath: record.pattern().to_string(),
            most_significant_unit: record.unit(),
            frequency: record.frequency(),
            distance_stats: record.distance_stats().summary(),
        }
    }
}

impl Report {
    pub fn new(participant_identifier: impl Into<String>, records: &[ObservationRecord]) -> Self {
        Self {
            participant_identifier: participant_identifier.into(),
            entries: records.iter().map(ReportEntry::from).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Observation store and study enrollment state.
//!
//! All state lives in a [`DurableStore`] under four keys: the encoded
//! observation records, the opt-in date, the last report date and the
//! participant identifier. Recording a choice is a single atomic
//! read-modify-write of the records key.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{decode_records, encode_records, DecodeError};
use crate::kv::{DurableStore, KvError, Update};
use crate::record::{MostSignificantUnit, ObservationKey, ObservationRecord};
use crate::report::Report;
use crate::window::{bucket_for, format_study_date, parse_study_date, Clock};
use crate::{KEY_CHOICES, KEY_LAST_REPORT, KEY_OPT_IN_DATE, KEY_PARTICIPANT_ID};

/// Errors from observation store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("stored observations could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    #[error("observations could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("study is not initialized (missing participant id or opt-in date)")]
    NotEnrolled,
}

/// Participant identity and epoch of an initialized study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    pub participant_id: String,
    pub opt_in_date: NaiveDate,
}

/// Persisted study keys, each possibly absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudyState {
    pub participant_id: Option<String>,
    pub opt_in_date: Option<NaiveDate>,
    pub last_report_date: Option<NaiveDate>,
}

impl StudyState {
    /// Enrollment, when both the participant id and opt-in date are set.
    pub fn enrollment(&self) -> Option<Enrollment> {
        Some(Enrollment {
            participant_id: self.participant_id.clone()?,
            opt_in_date: self.opt_in_date?,
        })
    }
}

/// Keyed collection of observation records over a durable store.
#[derive(Clone)]
pub struct ObservationStore {
    kv: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ObservationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationStore")
            .field("today", &self.clock.today())
            .finish_non_exhaustive()
    }
}

impl ObservationStore {
    pub fn new(kv: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Current UTC date according to the store's clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    // -- enrollment ---------------------------------------------------------

    /// Generate a participant id and set the opt-in date, keeping any that
    /// already exist.
    pub fn init_study(&self) -> Result<Enrollment, StoreError> {
        self.kv.update(KEY_PARTICIPANT_ID, &mut |current| {
            if current.and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
                return Update::Keep;
            }
            let id = Uuid::new_v4().to_string();
            info!(participant_id = %id, "new participant id");
            Update::Put(Value::String(id))
        })?;

        let today = self.today();
        self.kv.update(KEY_OPT_IN_DATE, &mut |current| {
            if current.and_then(Value::as_str).and_then(|s| parse_study_date(s).ok()).is_some() {
                return Update::Keep;
            }
            info!(opt_in_date = %today, "new opt-in date");
            Update::Put(Value::String(format_study_date(today)))
        })?;

        self.study_state()?.enrollment().ok_or(StoreError::NotEnrolled)
    }

    /// Read the persisted study keys. Malformed dates read as absent.
    pub fn study_state(&self) -> Result<StudyState, StoreError> {
        let entries = self
            .kv
            .get(&[KEY_PARTICIPANT_ID, KEY_OPT_IN_DATE, KEY_LAST_REPORT])?;

        let participant_id = entries
            .get(KEY_PARTICIPANT_ID)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(StudyState {
            participant_id,
            opt_in_date: read_date(entries.get(KEY_OPT_IN_DATE), KEY_OPT_IN_DATE),
            last_report_date: read_date(entries.get(KEY_LAST_REPORT), KEY_LAST_REPORT),
        })
    }

    /// Remove all observations, the participant id, the opt-in date and the
    /// report watermark. Idempotent.
    pub fn purge(&self) -> Result<(), StoreError> {
        self.kv.remove(&[
            KEY_CHOICES,
            KEY_LAST_REPORT,
            KEY_PARTICIPANT_ID,
            KEY_OPT_IN_DATE,
        ])?;
        info!("study data purged");
        Ok(())
    }

    /// Purge and enroll again with a fresh identity and epoch.
    pub fn reset_study(&self) -> Result<Enrollment, StoreError> {
        self.purge()?;
        self.init_study()
    }

    /// Move the last report date forward to `date`. Never moves it back.
    pub fn advance_watermark(&self, date: NaiveDate) -> Result<NaiveDate, StoreError> {
        let mut result = date;
        self.kv.update(KEY_LAST_REPORT, &mut |current| {
            let existing = read_date(current, KEY_LAST_REPORT);
            match existing {
                Some(existing) if existing >= date => {
                    result = existing;
                    Update::Keep
                }
                _ => {
                    result = date;
                    Update::Put(Value::String(format_study_date(date)))
                }
            }
        })?;
        Ok(result)
    }

    // -- observations -------------------------------------------------------

    /// Record one choice and return the updated record.
    ///
    /// The read-modify-write runs as one store transaction. When the stored
    /// records cannot be decoded nothing is written.
    pub fn try_record_choice(
        &self,
        context: &str,
        pattern: &str,
        unit: MostSignificantUnit,
        distance: f64,
        days_since_opt_in: u32,
    ) -> Result<ObservationRecord, StoreError> {
        let key = ObservationKey::new(days_since_opt_in, context, pattern, unit);
        let mut outcome: Result<ObservationRecord, StoreError> = Err(StoreError::NotEnrolled);

        self.kv.update(KEY_CHOICES, &mut |current| {
            let mut records = match decode_records(current.unwrap_or(&Value::Null)) {
                Ok(records) => records,
                Err(err) => {
                    outcome = Err(err.into());
                    return Update::Keep;
                }
            };

            let pos = match records.iter().position(|r| r.key() == &key) {
                Some(pos) => pos,
                None => {
                    records.push(ObservationRecord::new(key.clone()));
                    records.len() - 1
                }
            };
            records[pos].increment(distance);

            match encode_records(&records) {
                Ok(value) => {
                    outcome = Ok(records[pos].clone());
                    Update::Put(value)
                }
                Err(err) => {
                    outcome = Err(err.into());
                    Update::Keep
                }
            }
        })?;

        let record = outcome?;
        debug!(
            day = record.days_since_opt_in(),
            context = record.context(),
            pattern = record.pattern(),
            unit = %record.unit(),
            frequency = record.frequency(),
            "recorded choice"
        );
        Ok(record)
    }

    /// Record one choice. Failures are logged and the call is a no-op.
    pub fn record_choice(
        &self,
        context: &str,
        pattern: &str,
        unit: MostSignificantUnit,
        distance: f64,
        days_since_opt_in: u32,
    ) {
        if let Err(err) =
            self.try_record_choice(context, pattern, unit, distance, days_since_opt_in)
        {
            warn!(error = %err, context, pattern, "failed to record choice");
        }
    }

    /// Record one choice into today's bucket relative to the opt-in date.
    pub fn record_choice_today(
        &self,
        context: &str,
        pattern: &str,
        unit: MostSignificantUnit,
        distance: f64,
    ) -> Result<ObservationRecord, StoreError> {
        let opt_in = self
            .study_state()?
            .opt_in_date
            .ok_or(StoreError::NotEnrolled)?;
        let day = bucket_for(opt_in, self.today());
        self.try_record_choice(context, pattern, unit, distance, day)
    }

    /// All stored records, or the decode/storage error.
    pub fn try_all_records(&self) -> Result<Vec<ObservationRecord>, StoreError> {
        let entries = self.kv.get(&[KEY_CHOICES])?;
        Ok(decode_records(entries.get(KEY_CHOICES).unwrap_or(&Value::Null))?)
    }

    /// All stored records. Unreadable storage is logged and reads as empty.
    pub fn all_records(&self) -> Vec<ObservationRecord> {
        self.try_all_records().unwrap_or_else(|err| {
            warn!(error = %err, "failed to load observations");
            Vec::new()
        })
    }

    /// Records with `days_since_opt_in >= min_day`.
    pub fn records_since(&self, min_day: u32) -> Vec<ObservationRecord> {
        filter_since(&self.all_records(), min_day)
    }

    /// Build a report of all records from `start_day` on, without sending it.
    pub fn build_report(&self, start_day: u32) -> Result<Report, StoreError> {
        let participant = self
            .study_state()?
            .participant_id
            .ok_or(StoreError::NotEnrolled)?;
        let records = filter_since(&self.try_all_records()?, start_day);
        Ok(Report::new(participant, &records))
    }
}

/// Records with `days_since_opt_in >= min_day`, in stored order.
pub fn filter_since(records: &[ObservationRecord], min_day: u32) -> Vec<ObservationRecord> {
    records
        .iter()
        .filter(|r| r.days_since_opt_in() >= min_day)
        .cloned()
        .collect()
}

fn read_date(value: Option<&Value>, key: &str) -> Option<NaiveDate> {
    let raw = value?;
    match raw.as_str().map(parse_study_date) {
        Some(Ok(date)) => Some(date),
        _ => {
            warn!(key, value = %raw, "ignoring malformed stored date");
            None
        }
    }
}

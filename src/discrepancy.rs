//! Discrepancy detector: stated versus restated values of the same line item
//!
//! Detection is read-only. The detector never changes which record is primary;
//! a large discrepancy is surfaced for human review instead.

use crate::error::{StoreError, ValidationError};
use crate::record_store::{FinancialLineItem, VersionedRecordStore};
use crate::traits::Validate;
use crate::types::{RecordId, RecordKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported percentages are rounded to this many parts per percent
///
/// Division leaves cent-valued amounts that differ by exactly 5% at
/// 4.999999999999997; after rounding they sit on the inclusive band edge.
const PERCENT_PRECISION: f64 = 1e9;

fn round_percent(percent: f64) -> f64 {
    (percent * PERCENT_PRECISION).round() / PERCENT_PRECISION
}

/// Severity of a stated/restated difference, by absolute percent difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancySeverity {
    Minor,
    Moderate,
    Major,
    Critical,
}

impl DiscrepancySeverity {
    pub fn requires_review(&self) -> bool {
        matches!(self, DiscrepancySeverity::Major | DiscrepancySeverity::Critical)
    }
}

/// Lower edges, in percent, of the moderate, major and critical bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscrepancyBands {
    pub moderate_percent: f64,
    pub major_percent: f64,
    pub critical_percent: f64,
}

impl Default for DiscrepancyBands {
    fn default() -> Self {
        Self {
            moderate_percent: 1.0,
            major_percent: 5.0,
            critical_percent: 10.0,
        }
    }
}

impl DiscrepancyBands {
    /// Band for an absolute percent difference; lower edges are inclusive
    pub fn severity(&self, abs_percent: f64) -> DiscrepancySeverity {
        if abs_percent >= self.critical_percent {
            DiscrepancySeverity::Critical
        } else if abs_percent >= self.major_percent {
            DiscrepancySeverity::Major
        } else if abs_percent >= self.moderate_percent {
            DiscrepancySeverity::Moderate
        } else {
            DiscrepancySeverity::Minor
        }
    }
}

impl Validate for DiscrepancyBands {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), ValidationError> {
        let edges = [self.moderate_percent, self.major_percent, self.critical_percent];
        if edges.iter().any(|edge| !edge.is_finite() || *edge <= 0.0) {
            return Err(ValidationError::InvalidSetting {
                name: "discrepancy_bands".to_string(),
                reason: "band edges must be positive percentages".to_string(),
            });
        }
        if !(edges[0] < edges[1] && edges[1] < edges[2]) {
            return Err(ValidationError::InvalidSetting {
                name: "discrepancy_bands".to_string(),
                reason: format!("band edges must increase, got {:?}", edges),
            });
        }
        Ok(())
    }
}

/// Who reviewed a discrepancy, and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewNote {
    pub reviewer: String,
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Stated primary value compared with a later restatement of the same key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestatementDiscrepancy {
    pub record_key: RecordKey,
    pub stated_record_id: RecordId,
    pub restated_record_id: RecordId,
    pub restated_in_cafr_year: i32,
    pub stated_value: f64,
    pub restated_value: f64,
    /// Restated minus stated
    pub difference: f64,
    /// Difference as a percentage of the stated value; `None` when stated is zero
    pub percent_difference: Option<f64>,
    pub severity: DiscrepancySeverity,
    pub reason: Option<String>,
    pub reviewed: bool,
    pub review: Option<ReviewNote>,
}

impl RestatementDiscrepancy {
    pub fn requires_review(&self) -> bool {
        self.severity.requires_review()
    }

    /// True while a major or critical discrepancy awaits review
    pub fn blocks_publication(&self) -> bool {
        self.requires_review() && !self.reviewed
    }

    pub fn mark_reviewed(
        &mut self,
        reviewer: impl Into<String>,
        notes: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.reviewed = true;
        self.review = Some(ReviewNote {
            reviewer: reviewer.into(),
            notes: notes.into(),
            reviewed_at: at,
        });
    }
}

/// Compares stated primaries against their restatements
#[derive(Debug, Clone, Default)]
pub struct DiscrepancyDetector {
    bands: DiscrepancyBands,
}

impl DiscrepancyDetector {
    pub fn new(bands: DiscrepancyBands) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &DiscrepancyBands {
        &self.bands
    }

    /// Classify the difference between a stated and a restated record
    pub fn compare(
        &self,
        stated: &FinancialLineItem,
        restated: &FinancialLineItem,
    ) -> RestatementDiscrepancy {
        let difference = restated.amount - stated.amount;
        let percent_difference =
            (stated.amount != 0.0).then(|| round_percent(difference * 100.0 / stated.amount.abs()));
        let severity = match percent_difference {
            Some(percent) => self.bands.severity(percent.abs()),
            None if difference == 0.0 => DiscrepancySeverity::Minor,
            None => DiscrepancySeverity::Critical,
        };

        RestatementDiscrepancy {
            record_key: stated.key(),
            stated_record_id: stated.id,
            restated_record_id: restated.id,
            restated_in_cafr_year: restated.source_cafr_year,
            stated_value: stated.amount,
            restated_value: restated.amount,
            difference,
            percent_difference,
            severity,
            reason: restated.restatement_reason.clone(),
            reviewed: false,
            review: None,
        }
    }

    /// Compare the stated primary for `key` with its newest restatement
    ///
    /// Returns `None` when either side is missing.
    pub fn detect(
        &self,
        store: &VersionedRecordStore,
        key: &RecordKey,
    ) -> Result<Option<RestatementDiscrepancy>, StoreError> {
        let stated = match store.get_primary(key) {
            Ok(record) => record,
            Err(StoreError::PrimaryNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let restated = store.latest_restatement(key)?;
        Ok(restated.map(|restated| self.compare(&stated, &restated)))
    }

    /// Compare the stated primary for `key` with every restatement of it,
    /// oldest CAFR first
    pub fn detect_all(
        &self,
        store: &VersionedRecordStore,
        key: &RecordKey,
    ) -> Result<Vec<RestatementDiscrepancy>, StoreError> {
        let stated = match store.get_primary(key) {
            Ok(record) => record,
            Err(StoreError::PrimaryNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(store
            .restatements(key)?
            .iter()
            .map(|restated| self.compare(&stated, restated))
            .collect())
    }
}

//! Score run history and run-to-run comparison

use crate::error::SerializationError;
use crate::hasher::ResultHasher;
use crate::risk_scoring::RiskScore;
use crate::types::{FiscalYear, ResultHash, RiskCategory, RiskLevel, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every score run per fiscal year, in calculation order
///
/// Recalculating a year appends a run; earlier runs are never replaced.
#[derive(Debug, Clone, Default)]
pub struct ScoreHistory {
    runs: BTreeMap<FiscalYear, Vec<RiskScore>>,
}

impl ScoreHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, score: RiskScore) {
        self.runs
            .entry(score.fiscal_year.clone())
            .or_default()
            .push(score);
    }

    pub fn runs(&self, fiscal_year: &FiscalYear) -> &[RiskScore] {
        self.runs.get(fiscal_year).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, fiscal_year: &FiscalYear) -> Option<&RiskScore> {
        self.runs(fiscal_year).last()
    }

    pub fn fiscal_years(&self) -> Vec<&FiscalYear> {
        self.runs.keys().collect()
    }

    /// Total number of runs across all fiscal years
    pub fn len(&self) -> usize {
        self.runs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Chain digest over the fingerprints of a year's runs
    pub fn chain_hash(
        &self,
        fiscal_year: &FiscalYear,
        hasher: &ResultHasher,
    ) -> Result<Option<ResultHash>, SerializationError> {
        let runs = self.runs(fiscal_year);
        if runs.is_empty() {
            return Ok(None);
        }
        let fingerprints = runs
            .iter()
            .map(|run| hasher.fingerprint(run))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(hasher.hash_chain(&fingerprints)))
    }
}

/// Change of one category between two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDelta {
    pub category: RiskCategory,
    pub baseline_score: Option<f64>,
    pub comparison_score: Option<f64>,
    /// `None` unless both runs scored the category
    pub delta: Option<f64>,
}

/// Change of one indicator between two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDelta {
    pub code: String,
    pub baseline_value: Option<f64>,
    pub comparison_value: Option<f64>,
    pub baseline_points: Option<f64>,
    pub comparison_points: Option<f64>,
    pub points_changed: bool,
}

/// Side-by-side view of two score runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComparison {
    pub baseline_fiscal_year: FiscalYear,
    pub comparison_fiscal_year: FiscalYear,
    pub baseline_version: Version,
    pub comparison_version: Version,
    pub overall_delta: f64,
    pub baseline_level: RiskLevel,
    pub comparison_level: RiskLevel,
    pub level_changed: bool,
    pub category_deltas: Vec<CategoryDelta>,
    pub indicator_deltas: Vec<IndicatorDelta>,
    pub input_hash_matches: bool,
    /// True when the runs are identical apart from their timestamps
    pub fingerprints_match: bool,
}

impl ScoreComparison {
    pub fn changed_indicators(&self) -> Vec<&IndicatorDelta> {
        self.indicator_deltas.iter().filter(|d| d.points_changed).collect()
    }
}

/// Compares two score runs, typically of the same year under different
/// data corrections or methodology versions
#[derive(Debug, Clone, Default)]
pub struct ScoreComparator {
    hasher: ResultHasher,
}

impl ScoreComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compare(
        &self,
        baseline: &RiskScore,
        comparison: &RiskScore,
    ) -> Result<ScoreComparison, SerializationError> {
        let fingerprints_match =
            self.hasher.fingerprint(baseline)? == self.hasher.fingerprint(comparison)?;

        let category_deltas = RiskCategory::ALL
            .iter()
            .map(|category| {
                let baseline_score = baseline.category(*category).and_then(|c| c.score);
                let comparison_score = comparison.category(*category).and_then(|c| c.score);
                CategoryDelta {
                    category: *category,
                    baseline_score,
                    comparison_score,
                    delta: baseline_score
                        .zip(comparison_score)
                        .map(|(before, after)| after - before),
                }
            })
            .collect();

        let mut codes: Vec<&str> = baseline
            .indicator_results
            .iter()
            .chain(&comparison.indicator_results)
            .map(|result| result.code.as_str())
            .collect();
        codes.sort_unstable();
        codes.dedup();

        let indicator_deltas = codes
            .into_iter()
            .map(|code| {
                let before = baseline.indicator(code);
                let after = comparison.indicator(code);
                let baseline_points = before.and_then(|r| r.points);
                let comparison_points = after.and_then(|r| r.points);
                IndicatorDelta {
                    code: code.to_string(),
                    baseline_value: before.and_then(|r| r.value),
                    comparison_value: after.and_then(|r| r.value),
                    baseline_points,
                    comparison_points,
                    points_changed: baseline_points != comparison_points,
                }
            })
            .collect();

        Ok(ScoreComparison {
            baseline_fiscal_year: baseline.fiscal_year.clone(),
            comparison_fiscal_year: comparison.fiscal_year.clone(),
            baseline_version: baseline.methodology_version.clone(),
            comparison_version: comparison.methodology_version.clone(),
            overall_delta: comparison.overall_score - baseline.overall_score,
            baseline_level: baseline.risk_level,
            comparison_level: comparison.risk_level,
            level_changed: baseline.risk_level != comparison.risk_level,
            category_deltas,
            indicator_deltas,
            input_hash_matches: baseline.input_hash == comparison.input_hash,
            fingerprints_match,
        })
    }
}

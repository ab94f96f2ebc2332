//! Scoring methodology: indicator definitions, thresholds and versioning
//!
//! A methodology is immutable once built. Changing a threshold or weight
//! means registering a new [`Version`] in the [`MethodologyRegistry`], so a
//! published score can always be traced to the exact table that produced it.

use crate::error::{ConfigError, ValidationError};
use crate::traits::Validate;
use crate::types::{RiskCategory, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Category weights in basis points of the overall score
pub const CATEGORY_WEIGHTS_BPS: [(RiskCategory, u32); 5] = [
    (RiskCategory::Liquidity, 2_500),
    (RiskCategory::StructuralBalance, 2_500),
    (RiskCategory::PensionStress, 3_000),
    (RiskCategory::RevenueSustainability, 1_000),
    (RiskCategory::DebtBurden, 1_000),
];

const fn total_category_weight_bps() -> u32 {
    let mut total = 0;
    let mut i = 0;
    while i < CATEGORY_WEIGHTS_BPS.len() {
        total += CATEGORY_WEIGHTS_BPS[i].1;
        i += 1;
    }
    total
}

const _: () = assert!(
    total_category_weight_bps() == 10_000,
    "category weights must sum to exactly 1.0"
);

/// Weight of a category in the overall score, as a fraction
pub fn category_weight(category: RiskCategory) -> f64 {
    CATEGORY_WEIGHTS_BPS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, bps)| f64::from(*bps) / 10_000.0)
        .unwrap_or(0.0)
}

/// Tolerance for indicator weights summing to one
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Band an indicator value falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdBand {
    Healthy,
    Adequate,
    Warning,
    Critical,
}

impl ThresholdBand {
    /// Stress points awarded for the band
    pub fn points(&self) -> f64 {
        match self {
            ThresholdBand::Healthy => 0.0,
            ThresholdBand::Adequate => 25.0,
            ThresholdBand::Warning => 50.0,
            ThresholdBand::Critical => 100.0,
        }
    }
}

/// The four cut points of an indicator
///
/// Each cut point is the inclusive edge of its band seen from the healthy
/// side. A value exactly on a boundary lands in the less severe band, and
/// anything past the warning edge is critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub healthy: f64,
    pub adequate: f64,
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub fn new(healthy: f64, adequate: f64, warning: f64, critical: f64) -> Self {
        Self {
            healthy,
            adequate,
            warning,
            critical,
        }
    }

    /// Classify a raw indicator value
    pub fn band_for(&self, value: f64, higher_is_better: bool) -> ThresholdBand {
        let meets = |edge: f64| {
            if higher_is_better {
                value >= edge
            } else {
                value <= edge
            }
        };

        if meets(self.healthy) {
            ThresholdBand::Healthy
        } else if meets(self.adequate) {
            ThresholdBand::Adequate
        } else if meets(self.warning) {
            ThresholdBand::Warning
        } else {
            ThresholdBand::Critical
        }
    }

    fn as_array(&self) -> [f64; 4] {
        [self.healthy, self.adequate, self.warning, self.critical]
    }

    fn is_ordered(&self, higher_is_better: bool) -> bool {
        let cuts = self.as_array();
        cuts.windows(2).all(|pair| {
            if higher_is_better {
                pair[0] > pair[1]
            } else {
                pair[0] < pair[1]
            }
        })
    }
}

/// How an indicator's raw value is derived from primary records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorFormula {
    /// Fund balance / expenditures
    FundBalanceRatio,
    /// Fund balance / daily expenditures
    DaysOfReserves,
    /// (Revenue - expenditures) / expenditures
    OperatingMargin,
    /// Change in fund balance against the prior year
    FundBalanceTrend,
    /// Pension plan assets / total pension liability
    PensionFundedRatio,
    /// Pension contribution / expenditures
    PensionContributionBurden,
    /// (Pension liability - plan assets) / revenue
    UnfundedLiabilityToRevenue,
    /// Revenue growth against the prior year
    RevenueGrowth,
    /// Largest revenue category / total revenue
    RevenueConcentration,
    /// Debt service / expenditures
    DebtServiceRatio,
    /// Debt outstanding / revenue
    DebtToRevenue,
}

/// Definition of a risk indicator (reference data, never a measurement)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskIndicator {
    pub code: String,
    pub name: String,
    pub category: RiskCategory,
    /// Fraction of its category
    pub weight: f64,
    pub thresholds: Thresholds,
    pub higher_is_better: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    pub formula: IndicatorFormula,
}

fn default_active() -> bool {
    true
}

impl RiskIndicator {
    pub fn new(
        code: &str,
        name: &str,
        category: RiskCategory,
        weight: f64,
        thresholds: Thresholds,
        higher_is_better: bool,
        formula: IndicatorFormula,
    ) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            category,
            weight,
            thresholds,
            higher_is_better,
            active: true,
            formula,
        }
    }

    /// Stress points for a raw value
    pub fn points_for(&self, value: f64) -> f64 {
        self.band_for(value).points()
    }

    pub fn band_for(&self, value: f64) -> ThresholdBand {
        self.thresholds.band_for(value, self.higher_is_better)
    }
}

impl Validate for RiskIndicator {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidIndicator {
            code: self.code.clone(),
            reason: reason.to_string(),
        };

        if self.code.trim().is_empty() {
            return Err(invalid("code must not be empty"));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 || self.weight > 1.0 {
            return Err(invalid("weight must be in (0, 1]"));
        }
        if self.thresholds.as_array().iter().any(|cut| !cut.is_finite()) {
            return Err(invalid("thresholds must be finite"));
        }
        if !self.thresholds.is_ordered(self.higher_is_better) {
            return Err(invalid(if self.higher_is_better {
                "thresholds must strictly decrease from healthy to critical"
            } else {
                "thresholds must strictly increase from healthy to critical"
            }));
        }
        Ok(())
    }
}

/// A versioned, immutable indicator table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringMethodology {
    pub version: Version,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub indicators: Vec<RiskIndicator>,
}

impl ScoringMethodology {
    /// Build and validate a methodology
    pub fn new(
        version: Version,
        name: impl Into<String>,
        indicators: Vec<RiskIndicator>,
    ) -> Result<Self, ValidationError> {
        let methodology = Self {
            version,
            name: name.into(),
            description: String::new(),
            indicators,
        };
        methodology.validate()?;
        Ok(methodology)
    }

    /// The standard eleven-indicator table, version 1.0.0
    pub fn standard() -> Self {
        use IndicatorFormula as F;
        use RiskCategory as C;

        #[rustfmt::skip]
        let indicators = vec![
            RiskIndicator::new("LIQ_FUND_BALANCE_RATIO", "Fund balance ratio", C::Liquidity, 0.60,
                Thresholds::new(0.25, 0.15, 0.10, 0.05), true, F::FundBalanceRatio),
            RiskIndicator::new("LIQ_DAYS_OF_RESERVES", "Days of reserves", C::Liquidity, 0.40,
                Thresholds::new(90.0, 60.0, 30.0, 15.0), true, F::DaysOfReserves),
            RiskIndicator::new("SB_OPERATING_MARGIN", "Operating margin", C::StructuralBalance, 0.60,
                Thresholds::new(0.02, 0.0, -0.02, -0.05), true, F::OperatingMargin),
            RiskIndicator::new("SB_FUND_BALANCE_TREND", "Fund balance trend", C::StructuralBalance, 0.40,
                Thresholds::new(0.0, -0.05, -0.10, -0.20), true, F::FundBalanceTrend),
            RiskIndicator::new("PEN_FUNDED_RATIO", "Pension funded ratio", C::PensionStress, 0.40,
                Thresholds::new(0.80, 0.70, 0.60, 0.50), true, F::PensionFundedRatio),
            RiskIndicator::new("PEN_CONTRIBUTION_BURDEN", "Pension contribution burden", C::PensionStress, 0.35,
                Thresholds::new(0.10, 0.15, 0.20, 0.25), false, F::PensionContributionBurden),
            RiskIndicator::new("PEN_UAL_TO_REVENUE", "Unfunded liability to revenue", C::PensionStress, 0.25,
                Thresholds::new(1.0, 2.0, 3.0, 4.0), false, F::UnfundedLiabilityToRevenue),
            RiskIndicator::new("REV_GROWTH", "Revenue growth", C::RevenueSustainability, 0.50,
                Thresholds::new(0.03, 0.01, 0.0, -0.02), true, F::RevenueGrowth),
            RiskIndicator::new("REV_CONCENTRATION", "Revenue concentration", C::RevenueSustainability, 0.50,
                Thresholds::new(0.30, 0.40, 0.50, 0.60), false, F::RevenueConcentration),
            RiskIndicator::new("DEBT_SERVICE_RATIO", "Debt service ratio", C::DebtBurden, 0.60,
                Thresholds::new(0.08, 0.12, 0.15, 0.20), false, F::DebtServiceRatio),
            RiskIndicator::new("DEBT_TO_REVENUE", "Debt to revenue", C::DebtBurden, 0.40,
                Thresholds::new(0.5, 1.0, 1.5, 2.0), false, F::DebtToRevenue),
        ];

        Self {
            version: Version::new(1, 0, 0),
            name: "Standard fiscal stress methodology".to_string(),
            description: "Eleven indicators across liquidity, structural balance, pension stress, \
                          revenue sustainability and debt burden"
                .to_string(),
            indicators,
        }
    }

    pub fn active_indicators(&self) -> impl Iterator<Item = &RiskIndicator> {
        self.indicators.iter().filter(|indicator| indicator.active)
    }

    pub fn active_in(&self, category: RiskCategory) -> impl Iterator<Item = &RiskIndicator> {
        self.active_indicators()
            .filter(move |indicator| indicator.category == category)
    }

    pub fn indicator(&self, code: &str) -> Option<&RiskIndicator> {
        self.indicators.iter().find(|indicator| indicator.code == code)
    }

    /// Derive a new version with one indicator's thresholds replaced
    pub fn with_thresholds(
        &self,
        version: Version,
        code: &str,
        thresholds: Thresholds,
    ) -> Result<Self, ValidationError> {
        if version == self.version {
            return Err(ValidationError::InvalidMethodology {
                reason: format!("changed thresholds require a new version, not {}", version),
            });
        }

        let mut indicators = self.indicators.clone();
        let indicator = indicators
            .iter_mut()
            .find(|indicator| indicator.code == code)
            .ok_or_else(|| ValidationError::InvalidIndicator {
                code: code.to_string(),
                reason: "not part of the methodology".to_string(),
            })?;
        indicator.thresholds = thresholds;

        let mut derived = Self::new(version, self.name.clone(), indicators)?;
        derived.description = self.description.clone();
        Ok(derived)
    }
}

impl Validate for ScoringMethodology {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), ValidationError> {
        let mut codes = BTreeSet::new();
        for indicator in &self.indicators {
            indicator.validate()?;
            if !codes.insert(indicator.code.as_str()) {
                return Err(ValidationError::InvalidIndicator {
                    code: indicator.code.clone(),
                    reason: "duplicate code".to_string(),
                });
            }
        }

        for category in RiskCategory::ALL {
            let weights: Vec<f64> = self.active_in(category).map(|i| i.weight).collect();
            if weights.is_empty() {
                return Err(ValidationError::InvalidMethodology {
                    reason: format!("category {} has no active indicators", category),
                });
            }
            let sum: f64 = weights.iter().sum();
            if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
                return Err(ValidationError::InvalidWeights {
                    scope: format!("category {}", category),
                    sum,
                });
            }
        }
        Ok(())
    }
}

/// Registry of methodology versions
#[derive(Debug, Clone, Default)]
pub struct MethodologyRegistry {
    methodologies: BTreeMap<Version, ScoringMethodology>,
}

impl MethodologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated methodology; versions are never replaced
    pub fn register(&mut self, methodology: ScoringMethodology) -> Result<(), ConfigError> {
        methodology.validate()?;

        if self.methodologies.contains_key(&methodology.version) {
            return Err(ConfigError::RegistrationFailed {
                reason: format!("Version {} already exists", methodology.version),
            });
        }

        self.methodologies.insert(methodology.version.clone(), methodology);
        Ok(())
    }

    pub fn get(&self, version: &Version) -> Option<&ScoringMethodology> {
        self.methodologies.get(version)
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.methodologies.contains_key(version)
    }

    /// Registered versions in ascending order
    pub fn versions(&self) -> Vec<&Version> {
        self.methodologies.keys().collect()
    }

    pub fn latest(&self) -> Option<&ScoringMethodology> {
        self.methodologies.values().next_back()
    }

    /// Methodologies whose scores can be trended against `version`
    pub fn compatible_with(&self, version: &Version) -> Vec<&ScoringMethodology> {
        self.methodologies
            .values()
            .filter(|m| m.version.is_compatible_with(version))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_weights_sum_to_one() {
        let total: f64 = RiskCategory::ALL.iter().map(|c| category_weight(*c)).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(category_weight(RiskCategory::PensionStress), 0.30);
    }

    #[test]
    fn test_standard_methodology_is_valid() {
        let methodology = ScoringMethodology::standard();
        assert!(methodology.validate().is_ok());
        assert_eq!(methodology.active_indicators().count(), 11);
    }

    #[test]
    fn test_boundary_ties_resolve_to_less_severe_band() {
        let higher = Thresholds::new(0.25, 0.15, 0.10, 0.05);
        assert_eq!(higher.band_for(0.25, true), ThresholdBand::Healthy);
        assert_eq!(higher.band_for(0.15, true), ThresholdBand::Adequate);
        assert_eq!(higher.band_for(0.10, true), ThresholdBand::Warning);
        assert_eq!(higher.band_for(0.0999, true), ThresholdBand::Critical);

        let lower = Thresholds::new(0.10, 0.15, 0.20, 0.25);
        assert_eq!(lower.band_for(0.15, false), ThresholdBand::Adequate);
        assert_eq!(lower.band_for(0.20, false), ThresholdBand::Warning);
        assert_eq!(lower.band_for(0.30, false), ThresholdBand::Critical);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut indicators = ScoringMethodology::standard().indicators;
        indicators[0].thresholds = Thresholds::new(0.10, 0.15, 0.20, 0.25);

        let result = ScoringMethodology::new(Version::new(1, 1, 0), "bad", indicators);
        assert!(matches!(result, Err(ValidationError::InvalidIndicator { .. })));
    }

    #[test]
    fn test_deactivating_indicator_requires_reweighting() {
        let mut indicators = ScoringMethodology::standard().indicators;
        indicators[1].active = false;
        let result = ScoringMethodology::new(Version::new(1, 1, 0), "partial", indicators.clone());
        assert!(matches!(result, Err(ValidationError::InvalidWeights { .. })));

        indicators[0].weight = 1.0;
        assert!(ScoringMethodology::new(Version::new(1, 1, 0), "partial", indicators).is_ok());
    }

    #[test]
    fn test_threshold_change_requires_new_version() {
        let standard = ScoringMethodology::standard();
        let same_version = standard.with_thresholds(
            Version::new(1, 0, 0),
            "LIQ_FUND_BALANCE_RATIO",
            Thresholds::new(0.30, 0.20, 0.10, 0.05),
        );
        assert!(same_version.is_err());

        let revised = standard
            .with_thresholds(
                Version::new(1, 1, 0),
                "LIQ_FUND_BALANCE_RATIO",
                Thresholds::new(0.30, 0.20, 0.10, 0.05),
            )
            .unwrap();
        assert_eq!(revised.version, Version::new(1, 1, 0));
        assert_eq!(
            revised.indicator("LIQ_FUND_BALANCE_RATIO").unwrap().thresholds.healthy,
            0.30
        );
        assert_eq!(
            standard.indicator("LIQ_FUND_BALANCE_RATIO").unwrap().thresholds.healthy,
            0.25
        );
    }

    #[test]
    fn test_registry_rejects_duplicate_version() {
        let mut registry = MethodologyRegistry::new();
        assert!(registry.register(ScoringMethodology::standard()).is_ok());
        assert!(registry.register(ScoringMethodology::standard()).is_err());
        assert_eq!(registry.versions().len(), 1);
    }

    #[test]
    fn test_registry_latest() {
        let mut registry = MethodologyRegistry::new();
        let standard = ScoringMethodology::standard();
        let revised = standard
            .with_thresholds(
                Version::new(1, 2, 0),
                "DEBT_TO_REVENUE",
                Thresholds::new(0.4, 0.8, 1.2, 1.6),
            )
            .unwrap();

        registry.register(revised).unwrap();
        registry.register(standard).unwrap();

        assert_eq!(registry.latest().unwrap().version, Version::new(1, 2, 0));
        assert_eq!(registry.compatible_with(&Version::new(1, 0, 0)).len(), 2);
        assert!(registry.compatible_with(&Version::new(2, 0, 0)).is_empty());
    }
}

//! Risk scoring engine: composite fiscal-stress score for one fiscal year
//!
//! Scoring is a pure function of a [`PrimaryView`], an immutable
//! [`ScoringMethodology`] and the frozen time of a [`CalculationContext`].
//! Indicators whose inputs are missing are marked unavailable and the
//! remaining indicator weights of their category are renormalized. A
//! category with no available indicator is flagged and excluded from the
//! overall score, whose category weights are renormalized in turn.

use crate::context::CalculationContext;
use crate::error::ScoringError;
use crate::hasher::ResultHasher;
use crate::methodology::{
    category_weight, IndicatorFormula, RiskIndicator, ScoringMethodology, ThresholdBand,
};
use crate::record_store::PrimaryView;
use crate::traits::Fingerprint;
use crate::types::{
    FiscalYear, FundType, LineItemKind, ResultHash, RiskCategory, RiskLevel, Version,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: f64 = 365.0;

/// Why an indicator could not be evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Unavailability {
    MissingInput { kind: LineItemKind },
    MissingPriorYear,
    ZeroDenominator { kind: LineItemKind },
}

/// Outcome of one indicator in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub code: String,
    pub category: RiskCategory,
    pub value: Option<f64>,
    pub band: Option<ThresholdBand>,
    pub points: Option<f64>,
    /// Weight within the category after renormalizing over available indicators
    pub effective_weight: Option<f64>,
    /// Points contributed to the overall score
    pub contribution: Option<f64>,
    pub unavailable: Option<Unavailability>,
}

impl IndicatorResult {
    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }
}

/// Score of one risk category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: RiskCategory,
    pub weight: f64,
    /// `None` when no indicator of the category was available
    pub score: Option<f64>,
    pub available_indicators: usize,
    pub total_indicators: usize,
}

/// Composite fiscal-stress score for one fiscal year and one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub fiscal_year: FiscalYear,
    pub methodology_version: Version,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub category_scores: Vec<CategoryScore>,
    pub indicator_results: Vec<IndicatorResult>,
    pub data_completeness_percent: f64,
    /// Digest of the primary records the score was computed from
    pub input_hash: ResultHash,
    pub calculation_timestamp: DateTime<Utc>,
}

impl RiskScore {
    pub fn category(&self, category: RiskCategory) -> Option<&CategoryScore> {
        self.category_scores.iter().find(|c| c.category == category)
    }

    pub fn indicator(&self, code: &str) -> Option<&IndicatorResult> {
        self.indicator_results.iter().find(|i| i.code == code)
    }

    /// Categories that could not be scored, as errors for the caller to surface
    pub fn insufficient_data(&self) -> Vec<ScoringError> {
        self.category_scores
            .iter()
            .filter(|c| c.score.is_none())
            .map(|c| ScoringError::InsufficientData {
                fiscal_year: self.fiscal_year.clone(),
                category: c.category,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.indicator_results.iter().all(IndicatorResult::is_available)
    }
}

impl Fingerprint for RiskScore {
    fn normalized(&self) -> Self {
        Self {
            calculation_timestamp: DateTime::<Utc>::default(),
            ..self.clone()
        }
    }
}

/// Figures of one fiscal year (and its predecessor) that indicators draw on
#[derive(Debug, Clone, Default)]
struct YearFigures {
    revenue: Option<f64>,
    expenditure: Option<f64>,
    fund_balance: Option<f64>,
    pension_contribution: Option<f64>,
    pension_liability: Option<f64>,
    pension_assets: Option<f64>,
    debt_outstanding: Option<f64>,
    debt_service: Option<f64>,
    largest_revenue_category: Option<f64>,
    prior_revenue: Option<f64>,
    prior_fund_balance: Option<f64>,
    has_prior_year: bool,
}

impl YearFigures {
    fn collect(
        view: &PrimaryView,
        fy: &FiscalYear,
        prior: Option<&FiscalYear>,
        fund: FundType,
    ) -> Self {
        let largest_revenue_category = view
            .category_totals(fy, LineItemKind::Revenue, fund)
            .values()
            .copied()
            .reduce(f64::max);

        Self {
            revenue: view.total(fy, LineItemKind::Revenue, fund),
            expenditure: view.total(fy, LineItemKind::Expenditure, fund),
            fund_balance: view.total(fy, LineItemKind::FundBalance, fund),
            pension_contribution: view.total(fy, LineItemKind::PensionContribution, fund),
            pension_liability: view.total_all_funds(fy, LineItemKind::PensionLiability),
            pension_assets: view.total_all_funds(fy, LineItemKind::PensionAssets),
            debt_outstanding: view.total_all_funds(fy, LineItemKind::DebtOutstanding),
            debt_service: view.total_all_funds(fy, LineItemKind::DebtService),
            largest_revenue_category,
            prior_revenue: prior.and_then(|p| view.total(p, LineItemKind::Revenue, fund)),
            prior_fund_balance: prior.and_then(|p| view.total(p, LineItemKind::FundBalance, fund)),
            has_prior_year: prior.is_some(),
        }
    }
}

fn require(value: Option<f64>, kind: LineItemKind) -> Result<f64, Unavailability> {
    value.ok_or(Unavailability::MissingInput { kind })
}

fn ratio(numerator: f64, denominator: f64, kind: LineItemKind) -> Result<f64, Unavailability> {
    if denominator == 0.0 {
        return Err(Unavailability::ZeroDenominator { kind });
    }
    Ok(numerator / denominator)
}

fn change_from_prior(
    current: Option<f64>,
    prior: Option<f64>,
    has_prior_year: bool,
    kind: LineItemKind,
) -> Result<f64, Unavailability> {
    let current = require(current, kind)?;
    if !has_prior_year {
        return Err(Unavailability::MissingPriorYear);
    }
    let prior = prior.ok_or(Unavailability::MissingPriorYear)?;
    ratio(current - prior, prior.abs(), kind)
}

/// Risk scoring engine bound to one methodology
#[derive(Debug, Clone)]
pub struct RiskScoringEngine {
    methodology: ScoringMethodology,
    analysis_fund: FundType,
    hasher: ResultHasher,
}

impl RiskScoringEngine {
    pub fn new(methodology: ScoringMethodology) -> Self {
        Self {
            methodology,
            analysis_fund: FundType::General,
            hasher: ResultHasher::new(),
        }
    }

    /// Fund whose revenue, expenditure, fund balance and pension contribution are scored
    pub fn with_analysis_fund(mut self, fund: FundType) -> Self {
        self.analysis_fund = fund;
        self
    }

    pub fn methodology(&self) -> &ScoringMethodology {
        &self.methodology
    }

    /// Raw value of one indicator, or the reason it is unavailable
    pub fn evaluate_indicator(
        &self,
        view: &PrimaryView,
        fiscal_year: &FiscalYear,
        indicator: &RiskIndicator,
    ) -> Result<f64, Unavailability> {
        let prior = view.prior_year(fiscal_year);
        let figures = YearFigures::collect(view, fiscal_year, prior, self.analysis_fund);
        Self::raw_value(&figures, indicator.formula)
    }

    fn raw_value(f: &YearFigures, formula: IndicatorFormula) -> Result<f64, Unavailability> {
        use LineItemKind as K;

        match formula {
            IndicatorFormula::FundBalanceRatio => ratio(
                require(f.fund_balance, K::FundBalance)?,
                require(f.expenditure, K::Expenditure)?,
                K::Expenditure,
            ),
            IndicatorFormula::DaysOfReserves => ratio(
                require(f.fund_balance, K::FundBalance)?,
                require(f.expenditure, K::Expenditure)? / DAYS_PER_YEAR,
                K::Expenditure,
            ),
            IndicatorFormula::OperatingMargin => {
                let revenue = require(f.revenue, K::Revenue)?;
                let expenditure = require(f.expenditure, K::Expenditure)?;
                ratio(revenue - expenditure, expenditure, K::Expenditure)
            }
            IndicatorFormula::FundBalanceTrend => change_from_prior(
                f.fund_balance,
                f.prior_fund_balance,
                f.has_prior_year,
                K::FundBalance,
            ),
            IndicatorFormula::PensionFundedRatio => ratio(
                require(f.pension_assets, K::PensionAssets)?,
                require(f.pension_liability, K::PensionLiability)?,
                K::PensionLiability,
            ),
            IndicatorFormula::PensionContributionBurden => ratio(
                require(f.pension_contribution, K::PensionContribution)?,
                require(f.expenditure, K::Expenditure)?,
                K::Expenditure,
            ),
            IndicatorFormula::UnfundedLiabilityToRevenue => {
                let liability = require(f.pension_liability, K::PensionLiability)?;
                let assets = require(f.pension_assets, K::PensionAssets)?;
                ratio(liability - assets, require(f.revenue, K::Revenue)?, K::Revenue)
            }
            IndicatorFormula::RevenueGrowth => {
                change_from_prior(f.revenue, f.prior_revenue, f.has_prior_year, K::Revenue)
            }
            IndicatorFormula::RevenueConcentration => ratio(
                require(f.largest_revenue_category, K::Revenue)?,
                require(f.revenue, K::Revenue)?,
                K::Revenue,
            ),
            IndicatorFormula::DebtServiceRatio => ratio(
                require(f.debt_service, K::DebtService)?,
                require(f.expenditure, K::Expenditure)?,
                K::Expenditure,
            ),
            IndicatorFormula::DebtToRevenue => ratio(
                require(f.debt_outstanding, K::DebtOutstanding)?,
                require(f.revenue, K::Revenue)?,
                K::Revenue,
            ),
        }
    }

    /// Score one fiscal year
    ///
    /// Returns `NoScorableCategories` only when every category lacks data;
    /// partially scorable years return a score whose unscored categories are
    /// reported by [`RiskScore::insufficient_data`].
    pub fn score(
        &self,
        view: &PrimaryView,
        fiscal_year: &FiscalYear,
        context: &CalculationContext,
    ) -> Result<RiskScore, ScoringError> {
        let prior = view.prior_year(fiscal_year);
        let figures = YearFigures::collect(view, fiscal_year, prior, self.analysis_fund);

        let mut category_scores = Vec::with_capacity(RiskCategory::ALL.len());
        let mut indicator_results = Vec::new();
        let mut available_total = 0usize;
        let mut active_total = 0usize;

        for category in RiskCategory::ALL {
            let evaluated: Vec<(&RiskIndicator, Result<f64, Unavailability>)> = self
                .methodology
                .active_in(category)
                .map(|indicator| (indicator, Self::raw_value(&figures, indicator.formula)))
                .collect();

            let available_weight: f64 = evaluated
                .iter()
                .filter(|(_, value)| value.is_ok())
                .map(|(indicator, _)| indicator.weight)
                .sum();
            let available = evaluated.iter().filter(|(_, value)| value.is_ok()).count();

            let mut weighted_points = 0.0;
            for (indicator, value) in &evaluated {
                let result = match value {
                    Ok(value) => {
                        let band = indicator.band_for(*value);
                        let effective_weight = indicator.weight / available_weight;
                        weighted_points += band.points() * effective_weight;
                        IndicatorResult {
                            code: indicator.code.clone(),
                            category,
                            value: Some(*value),
                            band: Some(band),
                            points: Some(band.points()),
                            effective_weight: Some(effective_weight),
                            contribution: None,
                            unavailable: None,
                        }
                    }
                    Err(reason) => IndicatorResult {
                        code: indicator.code.clone(),
                        category,
                        value: None,
                        band: None,
                        points: None,
                        effective_weight: None,
                        contribution: None,
                        unavailable: Some(reason.clone()),
                    },
                };
                indicator_results.push(result);
            }

            available_total += available;
            active_total += evaluated.len();
            category_scores.push(CategoryScore {
                category,
                weight: category_weight(category),
                score: (available > 0).then_some(weighted_points),
                available_indicators: available,
                total_indicators: evaluated.len(),
            });
        }

        let scored_weight: f64 = category_scores
            .iter()
            .filter(|c| c.score.is_some())
            .map(|c| c.weight)
            .sum();
        if scored_weight <= 0.0 {
            return Err(ScoringError::NoScorableCategories {
                fiscal_year: fiscal_year.clone(),
            });
        }

        let overall_score = category_scores
            .iter()
            .filter_map(|c| c.score.map(|score| score * c.weight / scored_weight))
            .sum::<f64>()
            .clamp(0.0, 100.0);

        for result in &mut indicator_results {
            if let (Some(points), Some(weight)) = (result.points, result.effective_weight) {
                let category_share = category_weight(result.category) / scored_weight;
                result.contribution = Some(points * weight * category_share);
            }
        }

        let data_completeness_percent = if active_total == 0 {
            0.0
        } else {
            available_total as f64 / active_total as f64 * 100.0
        };

        let input_years: Vec<&FiscalYear> = std::iter::once(fiscal_year).chain(prior).collect();
        let input_hash = self
            .hasher
            .hash(&view.records_for(&input_years))
            .map_err(|e| ScoringError::InputHashFailed {
                reason: e.to_string(),
            })?;

        Ok(RiskScore {
            fiscal_year: fiscal_year.clone(),
            methodology_version: self.methodology.version.clone(),
            overall_score,
            risk_level: RiskLevel::from_score(overall_score),
            category_scores,
            indicator_results,
            data_completeness_percent,
            input_hash,
            calculation_timestamp: context.now(),
        })
    }
}

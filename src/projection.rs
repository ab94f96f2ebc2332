//! Projection engine: multi-year scenario projections and fiscal-cliff detection
//!
//! Every scenario is projected on its own from the actual base-year figures.
//! Revenue and the non-pension cost base compound at flat scenario rates;
//! pension cost follows its own schedule and only its increment beyond the
//! base year is added to projected expenditure.

use crate::error::{ProjectionError, ValidationError};
use crate::record_store::PrimaryView;
use crate::traits::Validate;
use crate::types::{FiscalYear, FundType, LineItemKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const REVENUE_GROWTH_RATE: &str = "revenue_growth_rate";
pub const INFLATION_RATE: &str = "inflation_rate";
pub const PENSION_GROWTH_RATE: &str = "pension_growth_rate";

/// Longest projection horizon accepted, in years
pub const MAX_HORIZON_YEARS: u32 = 100;
/// Longest trailing history window accepted, in years
pub const MAX_HISTORY_WINDOW_YEARS: u32 = 50;

pub const BASE_SCENARIO: &str = "base";
pub const OPTIMISTIC_SCENARIO: &str = "optimistic";
pub const PESSIMISTIC_SCENARIO: &str = "pessimistic";

/// A named growth or discount parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
    pub name: String,
    pub value: f64,
}

/// A projection scenario with ordered assumptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionScenario {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub assumptions: Vec<Assumption>,
}

impl ProjectionScenario {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            assumptions: Vec::new(),
        }
    }

    /// Set an assumption, keeping its original position if already present
    pub fn with_assumption(mut self, name: &str, value: f64) -> Self {
        match self.assumptions.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.assumptions.push(Assumption {
                name: name.to_string(),
                value,
            }),
        }
        self
    }

    pub fn assumption(&self, name: &str) -> Option<f64> {
        self.assumptions.iter().find(|a| a.name == name).map(|a| a.value)
    }

    fn rate(&self, name: &str) -> Result<f64, ProjectionError> {
        let value = self
            .assumption(name)
            .ok_or_else(|| ProjectionError::MissingAssumption {
                scenario: self.code.clone(),
                name: name.to_string(),
            })?;
        if !value.is_finite() || value <= -1.0 {
            return Err(ProjectionError::InvalidAssumption {
                scenario: self.code.clone(),
                name: name.to_string(),
                value,
            });
        }
        Ok(value)
    }

    fn growth(&self) -> Result<GrowthRates, ProjectionError> {
        Ok(GrowthRates {
            revenue: self.rate(REVENUE_GROWTH_RATE)?,
            inflation: self.rate(INFLATION_RATE)?,
            pension: self.rate(PENSION_GROWTH_RATE)?,
        })
    }
}

impl Validate for ProjectionScenario {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidScenario {
            code: self.code.clone(),
            reason,
        };

        if self.code.trim().is_empty() {
            return Err(invalid("code must not be empty".to_string()));
        }
        let mut names = BTreeSet::new();
        for assumption in &self.assumptions {
            if !names.insert(assumption.name.as_str()) {
                return Err(invalid(format!("duplicate assumption {}", assumption.name)));
            }
            if !assumption.value.is_finite() || assumption.value <= -1.0 {
                return Err(invalid(format!(
                    "assumption {} = {} must be finite and above -1",
                    assumption.name, assumption.value
                )));
            }
        }
        for required in [REVENUE_GROWTH_RATE, INFLATION_RATE, PENSION_GROWTH_RATE] {
            if !names.contains(required) {
                return Err(invalid(format!("missing assumption {}", required)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GrowthRates {
    revenue: f64,
    inflation: f64,
    pension: f64,
}

/// Assumptions used when history is too short to derive a rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultAssumptions {
    pub revenue_growth_rate: f64,
    pub inflation_rate: f64,
    pub pension_growth_rate: f64,
}

impl Default for DefaultAssumptions {
    fn default() -> Self {
        Self {
            revenue_growth_rate: 0.02,
            inflation_rate: 0.03,
            pension_growth_rate: 0.05,
        }
    }
}

/// Projection settings, loaded once with the engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    pub horizon_years: u32,
    /// Fund balance ratio below which a deficit year is a fiscal cliff
    pub cliff_reserve_ratio: f64,
    pub history_window_years: u32,
    pub analysis_fund: FundType,
    pub default_assumptions: DefaultAssumptions,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            horizon_years: 10,
            cliff_reserve_ratio: 0.10,
            history_window_years: 5,
            analysis_fund: FundType::General,
            default_assumptions: DefaultAssumptions::default(),
        }
    }
}

impl Validate for ProjectionSettings {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |name: &str, reason: &str| ValidationError::InvalidSetting {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.horizon_years == 0 {
            return Err(invalid("horizon_years", "must be at least one year"));
        }
        if self.horizon_years > MAX_HORIZON_YEARS {
            return Err(invalid("horizon_years", "exceeds the maximum projection horizon"));
        }
        if !self.cliff_reserve_ratio.is_finite() || self.cliff_reserve_ratio < 0.0 {
            return Err(invalid("cliff_reserve_ratio", "must be a non-negative fraction"));
        }
        if self.history_window_years < 2 {
            return Err(invalid("history_window_years", "must cover at least two years"));
        }
        if self.history_window_years > MAX_HISTORY_WINDOW_YEARS {
            return Err(invalid("history_window_years", "exceeds the maximum history window"));
        }
        let defaults = self.default_assumptions;
        for (name, value) in [
            (REVENUE_GROWTH_RATE, defaults.revenue_growth_rate),
            (INFLATION_RATE, defaults.inflation_rate),
            (PENSION_GROWTH_RATE, defaults.pension_growth_rate),
        ] {
            if !value.is_finite() || value <= -1.0 {
                return Err(invalid(name, "default must be finite and above -1"));
            }
        }
        Ok(())
    }
}

/// Actual figures of the base year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionBaseline {
    pub fiscal_year: FiscalYear,
    pub revenue: f64,
    pub expenditure: f64,
    pub ending_fund_balance: f64,
    pub pension_contribution: f64,
    pub fund_balance_ratio: f64,
}

/// One projected year of one scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialProjection {
    pub base_fiscal_year: FiscalYear,
    pub scenario_code: String,
    pub years_ahead: u32,
    /// Calendar year the projected fiscal year ends in
    pub fiscal_year: i32,
    pub projected_revenue: f64,
    pub projected_expenditure: f64,
    pub projected_pension_contribution: f64,
    pub operating_balance: f64,
    pub ending_fund_balance: f64,
    pub fund_balance_ratio: f64,
    pub is_deficit: bool,
}

/// How soon a projected cliff arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliffSeverity {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl CliffSeverity {
    pub fn from_years_until(years_until_cliff: Option<u32>) -> Self {
        match years_until_cliff {
            None => CliffSeverity::None,
            Some(0..=2) => CliffSeverity::Critical,
            Some(3) => CliffSeverity::High,
            Some(4..=5) => CliffSeverity::Moderate,
            Some(_) => CliffSeverity::Low,
        }
    }
}

/// Fiscal-cliff determination for one base year and scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalCliffAnalysis {
    pub base_fiscal_year: FiscalYear,
    pub scenario_code: String,
    pub horizon_years: u32,
    pub has_cliff: bool,
    pub cliff_year: Option<i32>,
    pub years_until_cliff: Option<u32>,
    pub severity: CliffSeverity,
    /// Negated sum of operating balances from year one through the cliff year
    pub cumulative_deficit_at_cliff: Option<f64>,
    /// Single-lever increase of base-year revenue that zeroes the cumulative deficit
    pub revenue_increase_needed_percent: Option<f64>,
    /// Single-lever decrease of base-year expenditure that zeroes the cumulative deficit
    pub expenditure_decrease_needed_percent: Option<f64>,
}

/// First projected year running a deficit with reserves under `reserve_ratio`
///
/// Rows are scanned in order of `years_ahead`; later, deeper deficits never
/// displace an earlier qualifying year.
pub fn locate_cliff(
    rows: &[FinancialProjection],
    reserve_ratio: f64,
) -> Option<&FinancialProjection> {
    rows.iter()
        .find(|row| row.operating_balance < 0.0 && row.fund_balance_ratio < reserve_ratio)
}

fn compound_sum(rate: f64, years: u32) -> f64 {
    (1..=years).map(|k| (1.0 + rate).powi(k as i32)).sum()
}

/// Projection engine
#[derive(Debug, Clone, Default)]
pub struct ProjectionEngine {
    settings: ProjectionSettings,
}

impl ProjectionEngine {
    pub fn new(settings: ProjectionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProjectionSettings {
        &self.settings
    }

    /// Actual base-year figures; revenue, expenditure and fund balance are required
    pub fn baseline(
        &self,
        view: &PrimaryView,
        fiscal_year: &FiscalYear,
    ) -> Result<ProjectionBaseline, ProjectionError> {
        let fund = self.settings.analysis_fund;
        let revenue = view.total(fiscal_year, LineItemKind::Revenue, fund);
        let expenditure = view.total(fiscal_year, LineItemKind::Expenditure, fund);
        let fund_balance = view.total(fiscal_year, LineItemKind::FundBalance, fund);

        let (revenue, expenditure, ending_fund_balance) =
            match (revenue, expenditure, fund_balance) {
                (Some(r), Some(e), Some(b)) if e != 0.0 => (r, e, b),
                _ => {
                    let mut missing = Vec::new();
                    if revenue.is_none() {
                        missing.push(LineItemKind::Revenue);
                    }
                    if expenditure.map_or(true, |e| e == 0.0) {
                        missing.push(LineItemKind::Expenditure);
                    }
                    if fund_balance.is_none() {
                        missing.push(LineItemKind::FundBalance);
                    }
                    return Err(ProjectionError::MissingBaseline {
                        fiscal_year: fiscal_year.clone(),
                        missing,
                    });
                }
            };

        Ok(ProjectionBaseline {
            fiscal_year: fiscal_year.clone(),
            revenue,
            expenditure,
            ending_fund_balance,
            pension_contribution: view
                .total(fiscal_year, LineItemKind::PensionContribution, fund)
                .unwrap_or(0.0),
            fund_balance_ratio: ending_fund_balance / expenditure,
        })
    }

    /// Project `years_ahead` years of one scenario from the base year
    pub fn project(
        &self,
        view: &PrimaryView,
        fiscal_year: &FiscalYear,
        scenario: &ProjectionScenario,
        years_ahead: u32,
    ) -> Result<Vec<FinancialProjection>, ProjectionError> {
        if years_ahead == 0 || years_ahead > MAX_HORIZON_YEARS {
            return Err(ProjectionError::InvalidHorizon { years_ahead });
        }
        let growth = scenario.growth()?;
        let baseline = self.baseline(view, fiscal_year)?;
        Ok(Self::project_baseline(&baseline, &scenario.code, growth, years_ahead))
    }

    fn project_baseline(
        baseline: &ProjectionBaseline,
        scenario_code: &str,
        growth: GrowthRates,
        years_ahead: u32,
    ) -> Vec<FinancialProjection> {
        let mut rows = Vec::with_capacity(years_ahead as usize);
        let mut ending_fund_balance = baseline.ending_fund_balance;

        for k in 1..=years_ahead {
            let exponent = k as i32;
            let revenue = baseline.revenue * (1.0 + growth.revenue).powi(exponent);
            let pension = baseline.pension_contribution * (1.0 + growth.pension).powi(exponent);
            let expenditure = baseline.expenditure * (1.0 + growth.inflation).powi(exponent)
                + (pension - baseline.pension_contribution);
            let operating_balance = revenue - expenditure;
            ending_fund_balance += operating_balance;

            rows.push(FinancialProjection {
                base_fiscal_year: baseline.fiscal_year.clone(),
                scenario_code: scenario_code.to_string(),
                years_ahead: k,
                fiscal_year: baseline.fiscal_year.year() + exponent,
                projected_revenue: revenue,
                projected_expenditure: expenditure,
                projected_pension_contribution: pension,
                operating_balance,
                ending_fund_balance,
                fund_balance_ratio: ending_fund_balance / expenditure,
                is_deficit: operating_balance < 0.0,
            });
        }
        rows
    }

    /// Scan the configured horizon for the first fiscal-cliff year
    pub fn find_fiscal_cliff(
        &self,
        view: &PrimaryView,
        fiscal_year: &FiscalYear,
        scenario: &ProjectionScenario,
    ) -> Result<FiscalCliffAnalysis, ProjectionError> {
        let horizon = self.settings.horizon_years;
        if horizon == 0 || horizon > MAX_HORIZON_YEARS {
            return Err(ProjectionError::InvalidHorizon { years_ahead: horizon });
        }
        let growth = scenario.growth()?;
        let baseline = self.baseline(view, fiscal_year)?;
        let rows = Self::project_baseline(&baseline, &scenario.code, growth, horizon);

        let mut analysis = FiscalCliffAnalysis {
            base_fiscal_year: fiscal_year.clone(),
            scenario_code: scenario.code.clone(),
            horizon_years: horizon,
            has_cliff: false,
            cliff_year: None,
            years_until_cliff: None,
            severity: CliffSeverity::None,
            cumulative_deficit_at_cliff: None,
            revenue_increase_needed_percent: None,
            expenditure_decrease_needed_percent: None,
        };

        let Some(cliff) = locate_cliff(&rows, self.settings.cliff_reserve_ratio) else {
            return Ok(analysis);
        };

        let years = cliff.years_ahead;
        let cumulative_deficit = -rows
            .iter()
            .take(years as usize)
            .map(|row| row.operating_balance)
            .sum::<f64>();
        let shortfall = cumulative_deficit.max(0.0);

        let revenue_base = baseline.revenue * compound_sum(growth.revenue, years);
        let expenditure_base = baseline.expenditure * compound_sum(growth.inflation, years);

        analysis.has_cliff = true;
        analysis.cliff_year = Some(cliff.fiscal_year);
        analysis.years_until_cliff = Some(years);
        analysis.severity = CliffSeverity::from_years_until(Some(years));
        analysis.cumulative_deficit_at_cliff = Some(cumulative_deficit);
        analysis.revenue_increase_needed_percent =
            (revenue_base > 0.0).then(|| shortfall / revenue_base * 100.0);
        analysis.expenditure_decrease_needed_percent =
            (expenditure_base > 0.0).then(|| shortfall / expenditure_base * 100.0);
        Ok(analysis)
    }
}

/// Derives the standard scenarios from a city's own history
#[derive(Debug, Clone, Copy)]
pub struct ScenarioSet;

impl ScenarioSet {
    /// Base, optimistic and pessimistic scenarios from trailing growth rates
    ///
    /// Growth rates are taken over the `history_window_years` ending at the
    /// base year. Base uses medians; optimistic pairs 75th-percentile revenue
    /// growth with 25th-percentile cost growth; pessimistic the reverse.
    /// Series with fewer than two observations use the configured defaults.
    pub fn from_history(
        view: &PrimaryView,
        base: &FiscalYear,
        settings: &ProjectionSettings,
    ) -> Vec<ProjectionScenario> {
        let fund = settings.analysis_fund;
        let window = settings.history_window_years.min(MAX_HISTORY_WINDOW_YEARS) as i32;
        let first_year = base.year() - window + 1;
        let years: Vec<&FiscalYear> = (first_year..=base.year())
            .filter_map(|year| view.find_year(year))
            .collect();

        let revenue = growth_series(&years, |fy| view.total(fy, LineItemKind::Revenue, fund));
        let pension = growth_series(&years, |fy| {
            view.total(fy, LineItemKind::PensionContribution, fund)
        });
        let core_cost = growth_series(&years, |fy| {
            let expenditure = view.total(fy, LineItemKind::Expenditure, fund)?;
            let pension = view
                .total(fy, LineItemKind::PensionContribution, fund)
                .unwrap_or(0.0);
            Some(expenditure - pension)
        });

        let defaults = settings.default_assumptions;
        let pick = |series: &[f64], p: f64, default: f64| {
            if series.len() < 2 {
                default
            } else {
                percentile(series, p)
            }
        };

        let scenario = |code: &str, name: &str, revenue_p: f64, cost_p: f64| {
            let revenue_rate = pick(&revenue, revenue_p, defaults.revenue_growth_rate);
            let inflation_rate = pick(&core_cost, cost_p, defaults.inflation_rate);
            let pension_rate = pick(&pension, cost_p, defaults.pension_growth_rate);
            ProjectionScenario::new(code, name)
                .with_assumption(REVENUE_GROWTH_RATE, revenue_rate)
                .with_assumption(INFLATION_RATE, inflation_rate)
                .with_assumption(PENSION_GROWTH_RATE, pension_rate)
        };

        vec![
            scenario(BASE_SCENARIO, "Base", 0.50, 0.50),
            scenario(OPTIMISTIC_SCENARIO, "Optimistic", 0.75, 0.25),
            scenario(PESSIMISTIC_SCENARIO, "Pessimistic", 0.25, 0.75),
        ]
    }
}

fn growth_series(
    years: &[&FiscalYear],
    value: impl Fn(&FiscalYear) -> Option<f64>,
) -> Vec<f64> {
    years
        .windows(2)
        .filter(|pair| pair[1].year() == pair[0].year() + 1)
        .filter_map(|pair| {
            let previous = value(pair[0])?;
            let current = value(pair[1])?;
            (previous != 0.0).then(|| (current - previous) / previous.abs())
        })
        .collect()
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [0.04, 0.01, 0.02, 0.03];
        assert!((percentile(&values, 0.5) - 0.025).abs() < 1e-12);
        assert!((percentile(&values, 0.25) - 0.0175).abs() < 1e-12);
        assert!((percentile(&values, 0.75) - 0.0325).abs() < 1e-12);
        assert_eq!(percentile(&[0.05], 0.75), 0.05);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_cliff_severity_bands() {
        assert_eq!(CliffSeverity::from_years_until(None), CliffSeverity::None);
        assert_eq!(CliffSeverity::from_years_until(Some(1)), CliffSeverity::Critical);
        assert_eq!(CliffSeverity::from_years_until(Some(2)), CliffSeverity::Critical);
        assert_eq!(CliffSeverity::from_years_until(Some(3)), CliffSeverity::High);
        assert_eq!(CliffSeverity::from_years_until(Some(5)), CliffSeverity::Moderate);
        assert_eq!(CliffSeverity::from_years_until(Some(8)), CliffSeverity::Low);
    }

    #[test]
    fn test_scenario_assumption_order_is_kept() {
        let scenario = ProjectionScenario::new("custom", "Custom")
            .with_assumption(INFLATION_RATE, 0.03)
            .with_assumption(REVENUE_GROWTH_RATE, 0.02)
            .with_assumption(PENSION_GROWTH_RATE, 0.06)
            .with_assumption(INFLATION_RATE, 0.04);

        let names: Vec<&str> = scenario.assumptions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec![INFLATION_RATE, REVENUE_GROWTH_RATE, PENSION_GROWTH_RATE]);
        assert_eq!(scenario.assumption(INFLATION_RATE), Some(0.04));
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_scenario_missing_assumption() {
        let scenario = ProjectionScenario::new("partial", "Partial")
            .with_assumption(REVENUE_GROWTH_RATE, 0.02);
        assert!(scenario.validate().is_err());
        assert_eq!(
            scenario.growth(),
            Err(ProjectionError::MissingAssumption {
                scenario: "partial".to_string(),
                name: INFLATION_RATE.to_string(),
            })
        );
    }

    #[test]
    fn test_settings_validation() {
        assert!(ProjectionSettings::default().validate().is_ok());
        let settings = ProjectionSettings {
            horizon_years: 0,
            ..ProjectionSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}

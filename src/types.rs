//! Core data types shared by the record store and the analytics components

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic version of a scoring methodology
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Create a new version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Scores produced under compatible versions may be trended against each other
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// BLAKE3 digest of an input snapshot or computed result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultHash(pub [u8; 32]);

impl fmt::Display for ResultHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A municipal fiscal year, keyed by city and year-ending date
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiscalYear {
    pub city: String,
    pub year_ending: NaiveDate,
}

impl FiscalYear {
    pub fn new(city: impl Into<String>, year_ending: NaiveDate) -> Self {
        Self {
            city: city.into(),
            year_ending,
        }
    }

    /// Calendar year in which the fiscal year ends
    pub fn year(&self) -> i32 {
        self.year_ending.year()
    }
}

impl fmt::Display for FiscalYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} FY{}", self.city, self.year())
    }
}

/// Table a financial line item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Revenue,
    Expenditure,
    FundBalance,
    PensionContribution,
    PensionLiability,
    PensionAssets,
    DebtOutstanding,
    DebtService,
}

impl LineItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemKind::Revenue => "revenue",
            LineItemKind::Expenditure => "expenditure",
            LineItemKind::FundBalance => "fund_balance",
            LineItemKind::PensionContribution => "pension_contribution",
            LineItemKind::PensionLiability => "pension_liability",
            LineItemKind::PensionAssets => "pension_assets",
            LineItemKind::DebtOutstanding => "debt_outstanding",
            LineItemKind::DebtService => "debt_service",
        }
    }
}

impl fmt::Display for LineItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Governmental fund a line item is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundType {
    General,
    SpecialRevenue,
    DebtService,
    CapitalProjects,
    Enterprise,
    Pension,
}

impl fmt::Display for FundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FundType::General => "general",
            FundType::SpecialRevenue => "special_revenue",
            FundType::DebtService => "debt_service",
            FundType::CapitalProjects => "capital_projects",
            FundType::Enterprise => "enterprise",
            FundType::Pension => "pension",
        };
        f.write_str(name)
    }
}

/// CAFR section a value was transcribed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Tier 1: audited current-year financial statements
    Financial,
    /// Tier 2: notes to the financial statements
    Notes,
    /// Tier 3: multi-year statistical trend tables
    Statistical,
}

/// Whether a value is as originally reported or a later revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Stated,
    Restated,
}

/// Identifier assigned by the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Uniqueness key of the one-primary-record invariant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub fiscal_year: FiscalYear,
    pub kind: LineItemKind,
    pub category: String,
    pub fund: FundType,
}

impl RecordKey {
    pub fn new(
        fiscal_year: FiscalYear,
        kind: LineItemKind,
        category: impl Into<String>,
        fund: FundType,
    ) -> Self {
        Self {
            fiscal_year,
            kind,
            category: category.into(),
            fund,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({} fund)",
            self.fiscal_year, self.kind, self.category, self.fund
        )
    }
}

/// The five risk categories of the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Liquidity,
    StructuralBalance,
    PensionStress,
    RevenueSustainability,
    DebtBurden,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        RiskCategory::Liquidity,
        RiskCategory::StructuralBalance,
        RiskCategory::PensionStress,
        RiskCategory::RevenueSustainability,
        RiskCategory::DebtBurden,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Liquidity => "liquidity",
            RiskCategory::StructuralBalance => "structural_balance",
            RiskCategory::PensionStress => "pension_stress",
            RiskCategory::RevenueSustainability => "revenue_sustainability",
            RiskCategory::DebtBurden => "debt_burden",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Banded interpretation of an overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Severe,
}

impl RiskLevel {
    /// Band an overall score: low 0-25, moderate 26-50, high 51-75, severe 76-100.
    ///
    /// Scores are banded on their nearest whole point, so each band includes
    /// its lower edge.
    pub fn from_score(score: f64) -> Self {
        let points = score.round();
        if points >= 76.0 {
            RiskLevel::Severe
        } else if points >= 51.0 {
            RiskLevel::High
        } else if points >= 26.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Severe => "severe",
        };
        f.write_str(name)
    }
}

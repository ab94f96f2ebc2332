//! Fiscal Analytics Engine (FAE)
//!
//! A library for auditable municipal fiscal analysis: a versioned store of
//! stated and restated financial line items, a composite fiscal-stress score,
//! multi-year projections with fiscal-cliff detection, and detection of
//! discrepancies between originally reported and restated values.

pub mod config;
pub mod context;
pub mod discrepancy;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod methodology;
pub mod projection;
pub mod record_store;
pub mod risk_scoring;
pub mod score_history;
pub mod serialization;
pub mod traits;
pub mod types;

// Re-export core types and traits
pub use config::EngineConfig;
pub use context::{CalculationContext, CalculationContextBuilder, DeterministicTime};
pub use discrepancy::{
    DiscrepancyBands, DiscrepancyDetector, DiscrepancySeverity, RestatementDiscrepancy,
};
pub use engine::{
    FiscalAnalyticsEngine, FiscalAnalyticsEngineBuilder, ImportOutcome, ScenarioOutcome,
};
pub use error::{
    ConfigError, FaeError, ProjectionError, ScoringError, SerializationError, StoreError,
    ValidationError,
};
pub use hasher::ResultHasher;
pub use logging::{AuditLogger, Component, LogEntry, LogLevel};
pub use methodology::{
    IndicatorFormula, MethodologyRegistry, RiskIndicator, ScoringMethodology, ThresholdBand,
    Thresholds,
};
pub use projection::{
    CliffSeverity, FinancialProjection, FiscalCliffAnalysis, ProjectionBaseline, ProjectionEngine,
    ProjectionScenario, ProjectionSettings, ScenarioSet,
};
pub use record_store::{FinancialLineItem, NewLineItem, PrimaryView, VersionedRecordStore};
pub use risk_scoring::{CategoryScore, IndicatorResult, RiskScore, RiskScoringEngine};
pub use score_history::{ScoreComparator, ScoreComparison, ScoreHistory};
pub use serialization::{BincodeSerializer, JsonSerializer, RecordSerializer};
pub use traits::{Fingerprint, Validate};
pub use types::{
    FiscalYear, FundType, LineItemKind, RecordId, RecordKey, ResultHash, RiskCategory, RiskLevel,
    SourceTier, Version, VersionType,
};

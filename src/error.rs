//! Error types for the fiscal analytics engine

use thiserror::Error;
use crate::types::{FiscalYear, LineItemKind, RecordId, RecordKey, RiskCategory, Version};

#[derive(Debug, Error)]
pub enum FaeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Tier/version mismatch for {key}: {reason}")]
    TierVersionMismatch { key: RecordKey, reason: String },

    #[error("Invalid record for {key}: {reason}")]
    InvalidRecord { key: RecordKey, reason: String },

    #[error("Record not found: {id}")]
    RecordNotFound { id: RecordId },

    #[error("No stated primary record for {key}")]
    PrimaryNotFound { key: RecordKey },

    #[error("A stated primary record already exists for {key} (id {existing}); use supersede")]
    DuplicatePrimary { key: RecordKey, existing: RecordId },

    #[error("Record {id} is not the primary record for its key")]
    NotPrimary { id: RecordId },

    #[error("Supersession key mismatch: record {id} is {expected}, replacement is {actual}")]
    KeyMismatch { id: RecordId, expected: RecordKey, actual: RecordKey },

    #[error("Record store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("Insufficient data for {fiscal_year}: no available indicators in category {category}")]
    InsufficientData { fiscal_year: FiscalYear, category: RiskCategory },

    #[error("No risk category could be scored for {fiscal_year}")]
    NoScorableCategories { fiscal_year: FiscalYear },

    #[error("Scoring methodology not found: version {version}")]
    MethodologyNotFound { version: Version },

    #[error("Failed to hash scoring inputs: {reason}")]
    InputHashFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("Missing baseline for {fiscal_year}: no primary {missing:?} records")]
    MissingBaseline { fiscal_year: FiscalYear, missing: Vec<LineItemKind> },

    #[error("Invalid projection horizon: {years_ahead} years")]
    InvalidHorizon { years_ahead: u32 },

    #[error("Scenario {scenario} is missing assumption {name}")]
    MissingAssumption { scenario: String, name: String },

    #[error("Scenario {scenario} has invalid assumption {name} = {value}")]
    InvalidAssumption { scenario: String, name: String, value: f64 },

    #[error("Unknown projection scenario: {code}")]
    UnknownScenario { code: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid indicator {code}: {reason}")]
    InvalidIndicator { code: String, reason: String },

    #[error("Invalid weights in {scope}: sum is {sum}")]
    InvalidWeights { scope: String, sum: f64 },

    #[error("Invalid methodology: {reason}")]
    InvalidMethodology { reason: String },

    #[error("Invalid scenario {code}: {reason}")]
    InvalidScenario { code: String, reason: String },

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] SerializationError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Methodology registration failed: {reason}")]
    RegistrationFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}

//! Core traits for the fiscal analytics engine

use serde::Serialize;

/// Inputs that must be checked before they reach the store or an engine
pub trait Validate {
    type Error;

    /// Validate the value for consistency and completeness
    fn validate(&self) -> Result<(), Self::Error>;
}

/// Outputs whose reproducibility can be audited by hashing
///
/// `normalized` returns a copy with run-specific metadata (timestamps)
/// cleared, so two runs over the same inputs hash identically.
pub trait Fingerprint: Serialize + Clone {
    fn normalized(&self) -> Self;
}

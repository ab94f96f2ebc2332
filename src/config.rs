//! Engine configuration, loaded once and never mutated by the engine

use crate::discrepancy::DiscrepancyBands;
use crate::error::{ConfigError, ValidationError};
use crate::methodology::ScoringMethodology;
use crate::projection::{ProjectionScenario, ProjectionSettings};
use crate::serialization::{JsonSerializer, RecordSerializer};
use crate::traits::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Complete engine configuration
///
/// Every section is optional in JSON; omitted sections take their defaults
/// (standard methodology 1.0.0, ten-year horizon, 1/5/10 percent bands).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "ScoringMethodology::standard")]
    pub methodology: ScoringMethodology,
    #[serde(default)]
    pub projection: ProjectionSettings,
    #[serde(default)]
    pub scenarios: Vec<ProjectionScenario>,
    #[serde(default)]
    pub discrepancy_bands: DiscrepancyBands,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            methodology: ScoringMethodology::standard(),
            projection: ProjectionSettings::default(),
            scenarios: Vec::new(),
            discrepancy_bands: DiscrepancyBands::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = JsonSerializer::new().deserialize(json.as_bytes())?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        let bytes = JsonSerializer::new_pretty().serialize(self)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn scenario(&self, code: &str) -> Option<&ProjectionScenario> {
        self.scenarios.iter().find(|s| s.code == code)
    }
}

impl Validate for EngineConfig {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), ValidationError> {
        self.methodology.validate()?;
        self.projection.validate()?;
        self.discrepancy_bands.validate()?;

        let mut codes = BTreeSet::new();
        for scenario in &self.scenarios {
            scenario.validate()?;
            if !codes.insert(scenario.code.as_str()) {
                return Err(ValidationError::InvalidScenario {
                    code: scenario.code.clone(),
                    reason: "scenario code configured twice".to_string(),
                });
            }
        }
        Ok(())
    }
}

//! Pluggable serialization for configuration and engine outputs

use crate::error::SerializationError;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for pluggable record serialization
pub trait RecordSerializer: Send + Sync {
    /// Serialize a value to bytes
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Deserialize a value from bytes
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;

    /// Get the name of this serialization method
    fn name(&self) -> &str;
}

/// Bincode serialization backend, used for hashing
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl RecordSerializer for BincodeSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(value).map_err(|e| SerializationError::SerializationFailed {
            reason: format!("Bincode serialization failed: {}", e),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::DeserializationFailed {
            reason: format!("Bincode deserialization failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "bincode"
    }
}

/// JSON serialization backend, used for configuration and published outputs
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn new_pretty() -> Self {
        Self { pretty: true }
    }
}

impl RecordSerializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let result = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };

        result.map_err(|e| SerializationError::SerializationFailed {
            reason: format!("JSON serialization failed: {}", e),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::DeserializationFailed {
            reason: format!("JSON deserialization failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "json"
    }
}

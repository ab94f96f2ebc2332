//! Reproducibility hashing using Blake3

use crate::error::SerializationError;
use crate::serialization::{BincodeSerializer, RecordSerializer};
use crate::traits::Fingerprint;
use crate::types::ResultHash;
use blake3::Hasher as Blake3Hasher;
use serde::Serialize;

/// ResultHasher computes audit digests of input snapshots and engine outputs
///
/// Values are serialized with bincode and hashed with Blake3. Everything
/// hashed by the engine is built from ordered collections, so the digest is
/// stable across runs and platforms.
#[derive(Debug, Clone, Default)]
pub struct ResultHasher {
    serializer: BincodeSerializer,
}

impl ResultHasher {
    pub fn new() -> Self {
        Self {
            serializer: BincodeSerializer::new(),
        }
    }

    /// Hash any serializable value
    pub fn hash<T: Serialize>(&self, value: &T) -> Result<ResultHash, SerializationError> {
        let serialized = self.serializer.serialize(value)?;

        let mut hasher = Blake3Hasher::new();
        hasher.update(&serialized);
        Ok(ResultHash(*hasher.finalize().as_bytes()))
    }

    /// Hash an output with its run-specific metadata cleared
    ///
    /// Two runs over unchanged inputs produce the same fingerprint even
    /// though their calculation timestamps differ.
    pub fn fingerprint<T: Fingerprint>(&self, value: &T) -> Result<ResultHash, SerializationError> {
        self.hash(&value.normalized())
    }

    /// Compute a single digest over an ordered sequence of digests
    ///
    /// Used to seal the run history of a fiscal year: appending, removing or
    /// reordering a run changes the chain digest.
    pub fn hash_chain(&self, hashes: &[ResultHash]) -> ResultHash {
        let mut hasher = Blake3Hasher::new();

        for hash in hashes {
            hasher.update(&hash.0);
        }

        ResultHash(*hasher.finalize().as_bytes())
    }

    /// Extend an existing chain digest with one more digest
    pub fn extend_chain(
        &self,
        previous_chain_hash: &ResultHash,
        new_hash: &ResultHash,
    ) -> ResultHash {
        let mut hasher = Blake3Hasher::new();
        hasher.update(&previous_chain_hash.0);
        hasher.update(&new_hash.0);
        ResultHash(*hasher.finalize().as_bytes())
    }
}

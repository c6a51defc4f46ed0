//! Content digests recorded for every stored archive
//!
//! Each archive is fingerprinted with three independent algorithms. The
//! SHA-256 digest doubles as the blob key and the HTTP entity tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};

/// Digest algorithms computed over uploaded content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HashAlgorithm {
    SHA256,
    SHA3_256,
    BLAKE3,
}

impl HashAlgorithm {
    /// Digest length in hexadecimal characters (all supported algorithms
    /// produce 32-byte digests)
    pub fn hex_length(&self) -> usize {
        64
    }

    fn validate_hash_format(&self, hash: &str) -> Result<()> {
        if hash.len() != self.hex_length() {
            return Err(RegistryError::ValidationError(format!(
                "Invalid {} digest length: expected {} characters, got {}",
                self,
                self.hex_length(),
                hash.len()
            )));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RegistryError::ValidationError(format!(
                "Invalid {} digest: must be hexadecimal",
                self
            )));
        }

        Ok(())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::SHA256 => write!(f, "SHA256"),
            HashAlgorithm::SHA3_256 => write!(f, "SHA3-256"),
            HashAlgorithm::BLAKE3 => write!(f, "BLAKE3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "SHA256" => Ok(HashAlgorithm::SHA256),
            "SHA3-256" | "SHA3_256" => Ok(HashAlgorithm::SHA3_256),
            "BLAKE3" => Ok(HashAlgorithm::BLAKE3),
            _ => Err(RegistryError::ValidationError(format!(
                "Invalid hash algorithm: {}",
                s
            ))),
        }
    }
}

/// A single hex-encoded digest tagged with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl Checksum {
    /// Create a checksum, normalizing the value to lowercase hex
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self> {
        let value = value.into().to_lowercase();
        algorithm.validate_hash_format(&value)?;
        Ok(Self { algorithm, value })
    }

    /// Build a checksum from raw digest bytes
    pub fn from_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        let value = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self { algorithm, value }
    }

    pub fn verify(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm && self.value == other.value
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// The full set of digests recorded for one piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigests {
    pub sha256: Checksum,
    pub sha3_256: Checksum,
    pub blake3: Checksum,
}

impl ContentDigests {
    /// Key under which the content is stored in the blob store
    pub fn blob_key(&self) -> &str {
        self.sha256.value()
    }
}

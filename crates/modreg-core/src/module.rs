//! Persistent records of the registry: modules, versions, files and
//! version properties.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::checksum::{Checksum, ContentDigests};
use crate::error::{RegistryError, Result};
use crate::types::{Creator, FileId, ModuleId, ModuleName, OwnerScope, VersionId, VersionString};

/// Truncate a timestamp to whole seconds, the granularity of the protocol
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::seconds(1)).unwrap_or(ts)
}

/// A named module inside an owner scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub owner: OwnerScope,
    pub name: ModuleName,
    pub created_at: DateTime<Utc>,
}

/// One published revision of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: VersionId,
    pub module_id: ModuleId,
    pub owner: OwnerScope,
    pub module: ModuleName,
    pub version: VersionString,
    pub creator: Creator,
    /// Internal versions are stored but never listed or resolved
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to create a version, before it has an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDraft {
    pub owner: OwnerScope,
    pub module: ModuleName,
    pub version: VersionString,
    pub creator: Creator,
    pub descriptor: String,
    /// Marks versions that are stored but hidden from every read path
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

impl VersionDraft {
    /// Name of the lead file stored for this version
    pub fn lead_file_name(&self) -> String {
        lead_file_name(&self.version)
    }
}

/// Lead file name for a version: `<version>.zip`
pub fn lead_file_name(version: &VersionString) -> String {
    format!("{}.zip", version)
}

/// A stored file belonging to a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub version_id: VersionId,
    pub name: String,
    pub size: u64,
    pub sha256: Checksum,
    pub sha3_256: Checksum,
    pub blake3: Checksum,
    /// Content address of the bytes in the blob store
    pub blob_key: String,
    pub is_lead: bool,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build the lead file record for a freshly published version
    pub fn lead(
        version_id: VersionId,
        name: String,
        size: u64,
        digests: &ContentDigests,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FileId::new(),
            version_id,
            name,
            size,
            sha256: digests.sha256.clone(),
            sha3_256: digests.sha3_256.clone(),
            blake3: digests.blake3.clone(),
            blob_key: digests.blob_key().to_string(),
            is_lead: true,
            created_at,
        }
    }
}

/// Kinds of typed metadata attached to a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    /// The module descriptor (`go.mod`)
    Descriptor,
}

impl PropertyKind {
    /// Name under which the property is persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Descriptor => "go.mod",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "go.mod" => Ok(PropertyKind::Descriptor),
            other => Err(RegistryError::ValidationError(format!(
                "Unknown property kind: {}",
                other
            ))),
        }
    }
}

/// A typed property value attached to a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub version_id: VersionId,
    pub kind: PropertyKind,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::HashAlgorithm;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_to_seconds() {
        let ts = Utc.timestamp_opt(100, 999_000_000).unwrap();
        assert_eq!(truncate_to_seconds(ts), Utc.timestamp_opt(100, 0).unwrap());
    }

    #[test]
    fn test_property_kind_names() {
        assert_eq!(PropertyKind::Descriptor.as_str(), "go.mod");
        assert_eq!("go.mod".parse::<PropertyKind>().unwrap(), PropertyKind::Descriptor);
        assert!("readme".parse::<PropertyKind>().is_err());
    }

    #[test]
    fn test_lead_file_record() {
        let digests = ContentDigests {
            sha256: Checksum::new(HashAlgorithm::SHA256, "a".repeat(64)).unwrap(),
            sha3_256: Checksum::new(HashAlgorithm::SHA3_256, "b".repeat(64)).unwrap(),
            blake3: Checksum::new(HashAlgorithm::BLAKE3, "c".repeat(64)).unwrap(),
        };
        let version = VersionString::parse("v1.2.3").unwrap();
        let file = FileRecord::lead(
            VersionId::new(),
            lead_file_name(&version),
            42,
            &digests,
            Utc::now(),
        );

        assert_eq!(file.name, "v1.2.3.zip");
        assert_eq!(file.blob_key, "a".repeat(64));
        assert!(file.is_lead);
    }
}

//! Core domain models and types for the module registry
//!
//! This crate contains the validated names, persistent records, quota
//! predicates and the archive parser shared by every other crate in the
//! workspace.

pub mod archive;
pub mod checksum;
pub mod error;
pub mod module;
pub mod quota;
pub mod types;

// Re-exports for convenience
pub use archive::{ModuleArchive, DESCRIPTOR_FILE, MAX_DESCRIPTOR_SIZE};
pub use checksum::{Checksum, ContentDigests, HashAlgorithm};
pub use error::{RegistryError, Result};
pub use module::{
    lead_file_name, truncate_to_seconds, FileRecord, Module, Property, PropertyKind,
    VersionDraft, VersionRecord,
};
pub use quota::{QuotaDimension, QuotaLimits, QuotaUsage};
pub use types::{
    Creator, FileId, ModuleId, ModuleName, OwnerScope, VersionId, VersionString, VersionToken,
    LATEST_TOKEN,
};

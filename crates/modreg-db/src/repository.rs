//! Storage contract for module versions
//!
//! The [`PackageStore`] trait is the only way the service layer reaches
//! persistent state. Implementations must be thread-safe (Send + Sync) and
//! must make [`PackageStore::create_version`] atomic per
//! (owner, module, version) key, with quota checks serialized per owner.

use async_trait::async_trait;
use modreg_core::{
    ContentDigests, FileRecord, ModuleName, OwnerScope, Property, PropertyKind, QuotaDimension,
    QuotaLimits, VersionDraft, VersionId, VersionRecord, VersionString,
};
use std::fmt;
use std::io::Read;

use crate::blob::BlobStream;
use crate::error::DbResult;

/// Content of the lead file of a version being created
pub struct FileUpload {
    /// Single-use reader positioned at the start of the content
    pub content: Box<dyn Read + Send>,
    pub size: u64,
    pub digests: ContentDigests,
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("size", &self.size)
            .field("digests", &self.digests)
            .finish_non_exhaustive()
    }
}

/// Result of an attempt to create a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The version, its descriptor and its lead file were committed
    Created(VersionRecord),
    /// A version with the same owner, module and version already exists
    Conflict,
    /// Publishing would exceed the given quota dimension; nothing was stored
    QuotaExceeded(QuotaDimension),
}

/// Serialization key for version creation
pub fn version_lock_key(
    owner: &OwnerScope,
    module: &ModuleName,
    version: &VersionString,
) -> String {
    format!("{}/{}@{}", owner, module, version)
}

/// Serialization key for quota accounting of one owner
///
/// Always taken after the version key of the same creation.
pub fn quota_lock_key(owner: &OwnerScope) -> String {
    format!("quota:{}", owner)
}

/// Repository trait for module version persistence
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// List the visible versions of a module
    ///
    /// Internal versions are excluded. Results are ordered by creation time
    /// ascending, ties broken by id.
    async fn find_versions(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
    ) -> DbResult<Vec<VersionRecord>>;

    /// Find one visible version by its exact version string
    async fn find_version(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
        version: &str,
    ) -> DbResult<Option<VersionRecord>>;

    /// Get all properties of the given kind attached to a version
    async fn get_properties(
        &self,
        version_id: &VersionId,
        kind: PropertyKind,
    ) -> DbResult<Vec<Property>>;

    /// Get all files attached to a version
    async fn get_files(&self, version_id: &VersionId) -> DbResult<Vec<FileRecord>>;

    /// Open the stored bytes of a file
    ///
    /// # Returns
    /// * `Err(DbError::NotFound)` - If the blob is missing from the blob store
    async fn open_file_stream(&self, file: &FileRecord) -> DbResult<BlobStream>;

    /// Create a version with its descriptor property and lead file
    ///
    /// Uniqueness and quota are checked and the records written as one
    /// atomic unit. Duplicates and quota violations are reported as
    /// outcomes; `Err` is reserved for storage failures, in which case
    /// nothing is visible.
    async fn create_version(
        &self,
        draft: VersionDraft,
        upload: FileUpload,
        limits: &QuotaLimits,
    ) -> DbResult<CreateOutcome>;

    /// Health check - verify the store is operational
    async fn health_check(&self) -> DbResult<()>;
}

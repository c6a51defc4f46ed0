//! Publish pipeline
//!
//! Takes a fully buffered upload, validates it as a module archive, and
//! writes the version, its descriptor and its lead file through the
//! package store.

use async_trait::async_trait;
use modreg_core::{
    truncate_to_seconds, Creator, ModuleArchive, ModuleName, OwnerScope, QuotaLimits,
    VersionDraft, VersionRecord,
};
use modreg_db::{CreateOutcome, FileUpload, PackageStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::buffer::HashedBuffer;
use crate::clock::Clock;
use crate::error::{ServiceError, ServiceResult};

/// Source of quota limits for an owner scope
pub trait QuotaPolicy: Send + Sync {
    fn limits_for(&self, owner: &OwnerScope) -> QuotaLimits;
}

/// The same limits for every owner
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticQuotaPolicy(pub QuotaLimits);

impl QuotaPolicy for StaticQuotaPolicy {
    fn limits_for(&self, _owner: &OwnerScope) -> QuotaLimits {
        self.0
    }
}

/// Trait for publishing module versions
#[async_trait]
pub trait PublishService: Send + Sync {
    /// Validate a buffered archive and store it as a new version
    ///
    /// `expected_module` is the module named by the request path; the
    /// archive must declare the same module.
    async fn publish_archive(
        &self,
        owner: OwnerScope,
        creator: Creator,
        expected_module: &ModuleName,
        buffer: HashedBuffer,
    ) -> ServiceResult<VersionRecord>;
}

/// Default implementation of PublishService
pub struct DefaultPublishService {
    store: Arc<dyn PackageStore>,
    clock: Arc<dyn Clock>,
    quota: Arc<dyn QuotaPolicy>,
}

impl DefaultPublishService {
    /// Create a new publish service
    pub fn new(
        store: Arc<dyn PackageStore>,
        clock: Arc<dyn Clock>,
        quota: Arc<dyn QuotaPolicy>,
    ) -> Self {
        Self {
            store,
            clock,
            quota,
        }
    }

    /// Parse the archive on a blocking worker, handing the buffer back
    async fn parse(buffer: HashedBuffer) -> ServiceResult<(HashedBuffer, ModuleArchive)> {
        let (buffer, parsed) = tokio::task::spawn_blocking(move || {
            let mut buffer = buffer;
            let parsed = ModuleArchive::parse(&mut buffer);
            (buffer, parsed)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("Archive parser task failed: {}", e)))?;

        Ok((buffer, parsed?))
    }
}

#[async_trait]
impl PublishService for DefaultPublishService {
    #[instrument(
        skip(self, buffer),
        fields(owner = %owner, creator = %creator, module = %expected_module, size = buffer.size())
    )]
    async fn publish_archive(
        &self,
        owner: OwnerScope,
        creator: Creator,
        expected_module: &ModuleName,
        buffer: HashedBuffer,
    ) -> ServiceResult<VersionRecord> {
        let (buffer, archive) = match Self::parse(buffer).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Rejected module archive");
                return Err(e);
            }
        };

        if &archive.module != expected_module {
            warn!(declared = %archive.module, "Archive module does not match request path");
            return Err(ServiceError::InvalidInput(format!(
                "archive declares module {}, request path names {}",
                archive.module, expected_module
            )));
        }

        debug!(version = %archive.version, "Archive validated");

        let replay = buffer.into_replay()?;
        let upload = FileUpload {
            size: replay.size(),
            digests: replay.digests().clone(),
            content: Box::new(replay),
        };

        let draft = VersionDraft {
            owner: owner.clone(),
            module: archive.module,
            version: archive.version,
            creator,
            descriptor: archive.descriptor,
            is_internal: false,
            created_at: truncate_to_seconds(self.clock.now()),
        };
        let module = draft.module.to_string();
        let version = draft.version.to_string();

        let limits = self.quota.limits_for(&owner);

        match self.store.create_version(draft, upload, &limits).await? {
            CreateOutcome::Created(record) => {
                info!(
                    version_id = %record.id,
                    version = %record.version,
                    "Module version published"
                );
                Ok(record)
            }
            CreateOutcome::Conflict => {
                warn!(version = %version, "Version already exists");
                Err(ServiceError::AlreadyExists { module, version })
            }
            CreateOutcome::QuotaExceeded(dimension) => {
                warn!(dimension = dimension.as_str(), "Quota exceeded");
                Err(ServiceError::QuotaExceeded(dimension))
            }
        }
    }
}

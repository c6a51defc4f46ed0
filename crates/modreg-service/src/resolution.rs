//! Version resolution service
//!
//! Resolves version tokens to stored versions and looks up the descriptor
//! and lead file of a resolved version.

use async_trait::async_trait;
use modreg_core::{FileRecord, ModuleName, OwnerScope, PropertyKind, VersionRecord, VersionToken};
use modreg_db::{BlobStream, PackageStore};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::error::{ServiceError, ServiceResult};

/// Trait for read-side version operations
#[async_trait]
pub trait ResolutionService: Send + Sync {
    /// List the visible versions of a module, oldest first
    ///
    /// A module without visible versions is reported as `NotFound`.
    async fn list_versions(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
    ) -> ServiceResult<Vec<VersionRecord>>;

    /// Resolve a version token to a single version
    async fn resolve(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
        token: &VersionToken,
    ) -> ServiceResult<VersionRecord>;

    /// Get the descriptor text of a version
    async fn descriptor(&self, version: &VersionRecord) -> ServiceResult<String>;

    /// Get the lead file of a version
    async fn lead_file(&self, version: &VersionRecord) -> ServiceResult<FileRecord>;

    /// Open the stored content of a file
    async fn open_content(&self, file: &FileRecord) -> ServiceResult<BlobStream>;
}

/// Pick the unique most recent version
///
/// Returns `None` when there are no versions or when several share the
/// latest timestamp.
pub fn select_latest(versions: &[VersionRecord]) -> Option<&VersionRecord> {
    let newest = versions.iter().map(|v| v.created_at).max()?;
    let mut at_newest = versions.iter().filter(|v| v.created_at == newest);
    let candidate = at_newest.next()?;
    match at_newest.next() {
        Some(_) => None,
        None => Some(candidate),
    }
}

fn label(version: &VersionRecord) -> String {
    format!("{}/{}@{}", version.owner, version.module, version.version)
}

/// Default implementation of ResolutionService
pub struct DefaultResolutionService {
    store: Arc<dyn PackageStore>,
}

impl DefaultResolutionService {
    /// Create a new resolution service
    pub fn new(store: Arc<dyn PackageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResolutionService for DefaultResolutionService {
    #[instrument(skip(self), fields(owner = %owner, module = %module))]
    async fn list_versions(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
    ) -> ServiceResult<Vec<VersionRecord>> {
        let versions = self.store.find_versions(owner, module).await?;
        if versions.is_empty() {
            return Err(ServiceError::NotFound(format!("{}/{}", owner, module)));
        }
        debug!(count = versions.len(), "Listed versions");
        Ok(versions)
    }

    #[instrument(skip(self), fields(owner = %owner, module = %module, token = %token))]
    async fn resolve(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
        token: &VersionToken,
    ) -> ServiceResult<VersionRecord> {
        let not_found = || ServiceError::NotFound(format!("{}/{}@{}", owner, module, token));

        match token {
            VersionToken::Latest => {
                let versions = self.store.find_versions(owner, module).await?;
                let latest = select_latest(&versions).cloned();
                if latest.is_none() && !versions.is_empty() {
                    debug!("Latest version is ambiguous");
                }
                latest.ok_or_else(not_found)
            }
            VersionToken::Exact(version) => self
                .store
                .find_version(owner, module, version)
                .await?
                .ok_or_else(not_found),
        }
    }

    #[instrument(skip(self, version), fields(version_id = %version.id))]
    async fn descriptor(&self, version: &VersionRecord) -> ServiceResult<String> {
        let mut properties = self
            .store
            .get_properties(&version.id, PropertyKind::Descriptor)
            .await?;

        if properties.len() != 1 {
            error!(count = properties.len(), "Version does not have exactly one descriptor");
            return Err(ServiceError::InvariantViolation(format!(
                "{} has {} descriptors",
                label(version),
                properties.len()
            )));
        }

        Ok(properties.remove(0).value)
    }

    #[instrument(skip(self, version), fields(version_id = %version.id))]
    async fn lead_file(&self, version: &VersionRecord) -> ServiceResult<FileRecord> {
        let mut leads: Vec<FileRecord> = self
            .store
            .get_files(&version.id)
            .await?
            .into_iter()
            .filter(|f| f.is_lead)
            .collect();

        if leads.len() != 1 {
            error!(count = leads.len(), "Version does not have exactly one lead file");
            return Err(ServiceError::InvariantViolation(format!(
                "{} has {} lead files",
                label(version),
                leads.len()
            )));
        }

        Ok(leads.remove(0))
    }

    #[instrument(skip(self, file), fields(file_id = %file.id))]
    async fn open_content(&self, file: &FileRecord) -> ServiceResult<BlobStream> {
        Ok(self.store.open_file_stream(file).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use modreg_core::{Creator, ModuleId, VersionId, VersionString};

    fn version(v: &str, secs: i64) -> VersionRecord {
        VersionRecord {
            id: VersionId::new(),
            module_id: ModuleId::new(),
            owner: OwnerScope::parse("acme").unwrap(),
            module: ModuleName::parse("widget").unwrap(),
            version: VersionString::parse(v).unwrap(),
            creator: Creator::anonymous(),
            is_internal: false,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_select_latest_by_creation_time() {
        let versions = vec![version("v2.0.0", 100), version("v1.0.0", 200)];
        let latest = select_latest(&versions).unwrap();
        assert_eq!(latest.version.as_str(), "v1.0.0");
    }

    #[test]
    fn test_select_latest_tie_is_none() {
        let versions = vec![
            version("v1.0.0", 100),
            version("v1.1.0", 200),
            version("v1.2.0", 200),
        ];
        assert!(select_latest(&versions).is_none());
    }

    #[test]
    fn test_select_latest_empty_is_none() {
        assert!(select_latest(&[]).is_none());
    }
}

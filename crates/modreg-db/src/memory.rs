//! In-memory implementation of PackageStore
//!
//! Used for development and tests. Version creation is serialized per
//! (owner, module, version) key with an async mutex; the final insert
//! re-checks uniqueness and quota under the state write lock so concurrent
//! publishes for different keys stay consistent. Per-key mutexes are
//! reference counted and removed when the last publisher leaves, even if
//! its future is dropped mid-way.

use async_trait::async_trait;
use modreg_core::{
    FileRecord, Module, ModuleId, ModuleName, OwnerScope, Property, PropertyKind, QuotaLimits,
    QuotaUsage, VersionDraft, VersionId, VersionRecord,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::blob::{BlobStore, BlobStream};
use crate::error::{DbError, DbResult};
use crate::repository::{version_lock_key, CreateOutcome, FileUpload, PackageStore};

#[derive(Debug, Default)]
struct MemoryState {
    modules: HashMap<(OwnerScope, ModuleName), Module>,
    versions: Vec<VersionRecord>,
    properties: Vec<Property>,
    files: Vec<FileRecord>,
}

impl MemoryState {
    fn usage(&self, owner: &OwnerScope) -> QuotaUsage {
        let owned: Vec<&VersionRecord> =
            self.versions.iter().filter(|v| &v.owner == owner).collect();
        let total_size = self
            .files
            .iter()
            .filter(|f| owned.iter().any(|v| v.id == f.version_id))
            .map(|f| f.size)
            .sum();

        QuotaUsage {
            version_count: owned.len() as u64,
            total_size,
        }
    }

    fn contains(&self, draft: &VersionDraft) -> bool {
        self.versions.iter().any(|v| {
            v.owner == draft.owner && v.module == draft.module && v.version == draft.version
        })
    }

    fn module_id(&mut self, draft: &VersionDraft) -> ModuleId {
        self.modules
            .entry((draft.owner.clone(), draft.module.clone()))
            .or_insert_with(|| Module {
                id: ModuleId::new(),
                owner: draft.owner.clone(),
                name: draft.module.clone(),
                created_at: draft.created_at,
            })
            .id
    }
}

#[derive(Debug, Default)]
struct KeyLock {
    mutex: Arc<Mutex<()>>,
    users: usize,
}

type KeyLocks = std::sync::Mutex<HashMap<String, KeyLock>>;

/// One publisher's claim on a per-key mutex, released on drop
struct KeyLockGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    mutex: Arc<Mutex<()>>,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = locks.get_mut(&self.key) {
            entry.users -= 1;
            if entry.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

/// PackageStore that keeps all records in process memory
pub struct MemoryPackageStore {
    state: RwLock<MemoryState>,
    key_locks: KeyLocks,
    blobs: Arc<dyn BlobStore>,
}

impl MemoryPackageStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            key_locks: std::sync::Mutex::new(HashMap::new()),
            blobs,
        }
    }

    fn lock_for(&self, key: String) -> KeyLockGuard<'_> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = locks.entry(key.clone()).or_default();
        entry.users += 1;

        KeyLockGuard {
            locks: &self.key_locks,
            key,
            mutex: Arc::clone(&entry.mutex),
        }
    }

    #[cfg(test)]
    fn pending_key_locks(&self) -> usize {
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn create_locked(
        &self,
        draft: VersionDraft,
        upload: FileUpload,
        limits: &QuotaLimits,
    ) -> DbResult<CreateOutcome> {
        {
            let state = self.state.read().await;
            if state.contains(&draft) {
                return Ok(CreateOutcome::Conflict);
            }
            if let Err(dimension) = limits.check(state.usage(&draft.owner), upload.size) {
                return Ok(CreateOutcome::QuotaExceeded(dimension));
            }
        }

        let version_id = VersionId::new();
        let file = FileRecord::lead(
            version_id,
            draft.lead_file_name(),
            upload.size,
            &upload.digests,
            draft.created_at,
        );

        self.blobs
            .put(&file.blob_key, upload.content, upload.size)
            .await?;

        let mut state = self.state.write().await;
        if state.contains(&draft) {
            return Ok(CreateOutcome::Conflict);
        }
        if let Err(dimension) = limits.check(state.usage(&draft.owner), upload.size) {
            return Ok(CreateOutcome::QuotaExceeded(dimension));
        }

        let record = VersionRecord {
            id: version_id,
            module_id: state.module_id(&draft),
            owner: draft.owner,
            module: draft.module,
            version: draft.version,
            creator: draft.creator,
            is_internal: draft.is_internal,
            created_at: draft.created_at,
        };

        state.properties.push(Property {
            version_id,
            kind: PropertyKind::Descriptor,
            value: draft.descriptor,
        });
        state.files.push(file);
        state.versions.push(record.clone());

        Ok(CreateOutcome::Created(record))
    }
}

impl Default for MemoryPackageStore {
    fn default() -> Self {
        Self::new(Arc::new(crate::blob::MemoryBlobStore::new()))
    }
}

#[async_trait]
impl PackageStore for MemoryPackageStore {
    #[instrument(skip(self), fields(owner = %owner, module = %module))]
    async fn find_versions(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
    ) -> DbResult<Vec<VersionRecord>> {
        let state = self.state.read().await;
        let mut versions: Vec<VersionRecord> = state
            .versions
            .iter()
            .filter(|v| &v.owner == owner && &v.module == module && !v.is_internal)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(versions)
    }

    #[instrument(skip(self), fields(owner = %owner, module = %module))]
    async fn find_version(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
        version: &str,
    ) -> DbResult<Option<VersionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .iter()
            .find(|v| {
                &v.owner == owner
                    && &v.module == module
                    && v.version.as_str() == version
                    && !v.is_internal
            })
            .cloned())
    }

    async fn get_properties(
        &self,
        version_id: &VersionId,
        kind: PropertyKind,
    ) -> DbResult<Vec<Property>> {
        let state = self.state.read().await;
        Ok(state
            .properties
            .iter()
            .filter(|p| &p.version_id == version_id && p.kind == kind)
            .cloned()
            .collect())
    }

    async fn get_files(&self, version_id: &VersionId) -> DbResult<Vec<FileRecord>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .iter()
            .filter(|f| &f.version_id == version_id)
            .cloned()
            .collect())
    }

    async fn open_file_stream(&self, file: &FileRecord) -> DbResult<BlobStream> {
        self.blobs
            .open(&file.blob_key)
            .await?
            .ok_or_else(|| {
                DbError::NotFound(format!("Blob {} for file {}", file.blob_key, file.id))
            })
    }

    #[instrument(
        skip(self, draft, upload, limits),
        fields(owner = %draft.owner, module = %draft.module, version = %draft.version)
    )]
    async fn create_version(
        &self,
        draft: VersionDraft,
        upload: FileUpload,
        limits: &QuotaLimits,
    ) -> DbResult<CreateOutcome> {
        let claim = self.lock_for(version_lock_key(&draft.owner, &draft.module, &draft.version));

        let outcome = {
            let _held = claim.mutex.lock().await;
            self.create_locked(draft, upload, limits).await
        };

        drop(claim);

        debug!(outcome = ?outcome.as_ref().map(outcome_label), "Create version finished");
        outcome
    }

    async fn health_check(&self) -> DbResult<()> {
        Ok(())
    }
}

fn outcome_label(outcome: &CreateOutcome) -> &'static str {
    match outcome {
        CreateOutcome::Created(_) => "created",
        CreateOutcome::Conflict => "conflict",
        CreateOutcome::QuotaExceeded(_) => "quota_exceeded",
    }
}

//! Content-addressed blob storage for module archives
//!
//! Blobs are keyed by the lowercase SHA-256 hex digest of their content, so
//! identical uploads share one blob and a blob left behind by a rolled-back
//! publish is never referenced.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{DbError, DbResult};

/// Owned, scoped byte stream over a stored blob
pub type BlobStream = Pin<Box<dyn AsyncRead + Send>>;

/// Physical storage for file contents
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the content under `key`, consuming the reader
    ///
    /// Fails if the number of bytes read differs from `expected_size`.
    /// Returns the number of bytes written.
    async fn put(
        &self,
        key: &str,
        content: Box<dyn Read + Send>,
        expected_size: u64,
    ) -> DbResult<u64>;

    /// Open a stored blob, or `None` if it does not exist
    async fn open(&self, key: &str) -> DbResult<Option<BlobStream>>;
}

fn validate_key(key: &str) -> DbResult<()> {
    if key.len() != 64 || !key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(DbError::InvalidData(format!("Invalid blob key: {}", key)));
    }
    Ok(())
}

fn size_mismatch(key: &str, expected: u64, written: u64) -> DbError {
    DbError::Blob(format!(
        "Blob {} size mismatch: expected {} bytes, wrote {}",
        key, expected, written
    ))
}

/// Blob store on the local filesystem, sharded as `ab/cd/abcd...`
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> DbResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Filesystem blob store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> DbResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(&key[0..2]).join(&key[2..4]).join(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    #[instrument(skip(self, content))]
    async fn put(
        &self,
        key: &str,
        mut content: Box<dyn Read + Send>,
        expected_size: u64,
    ) -> DbResult<u64> {
        let path = self.path_for(key)?;
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> DbResult<u64> {
            let dir = path
                .parent()
                .ok_or_else(|| DbError::Internal("Blob path has no parent".to_string()))?;
            std::fs::create_dir_all(dir)?;

            // Stage next to the target so the final rename stays on one filesystem
            let mut staged = NamedTempFile::new_in(dir)?;
            let written = std::io::copy(&mut content, &mut staged)?;
            if written != expected_size {
                return Err(size_mismatch(&key, expected_size, written));
            }
            staged.as_file().sync_all()?;
            staged
                .persist(&path)
                .map_err(|e| {
                    DbError::Blob(format!("Failed to persist blob {}: {}", key, e.error))
                })?;

            Ok(written)
        })
        .await
        .map_err(|e| DbError::Internal(format!("Blob writer task failed: {}", e)))?
    }

    #[instrument(skip(self))]
    async fn open(&self, key: &str) -> DbResult<Option<BlobStream>> {
        let path = self.path_for(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::pin(file) as BlobStream)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blob store held entirely in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        mut content: Box<dyn Read + Send>,
        expected_size: u64,
    ) -> DbResult<u64> {
        validate_key(key)?;

        let bytes = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut bytes = Vec::new();
            content.read_to_end(&mut bytes)?;
            Ok(bytes)
        })
        .await
        .map_err(|e| DbError::Internal(format!("Blob reader task failed: {}", e)))??;

        let written = bytes.len() as u64;
        if written != expected_size {
            return Err(size_mismatch(key, expected_size, written));
        }

        self.blobs
            .write()
            .await
            .insert(key.to_string(), Arc::from(bytes));
        Ok(written)
    }

    async fn open(&self, key: &str) -> DbResult<Option<BlobStream>> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .get(key)
            .map(|bytes| Box::pin(Cursor::new(Arc::clone(bytes))) as BlobStream))
    }
}

//! Service-layer error types
//!
//! This module defines error types specific to the service layer,
//! mapping domain, storage and buffering errors to service-level errors.

use modreg_core::{QuotaDimension, RegistryError};
use modreg_db::DbError;
use thiserror::Error;

use crate::buffer::BufferError;

/// Result type alias for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Service-layer error types
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No matching module, version or content (including an ambiguous latest)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uploaded archive failed structural validation
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// Request parameters are not acceptable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The version has already been published
    #[error("Version already exists: {module}@{version}")]
    AlreadyExists { module: String, version: String },

    /// Publishing would exceed a quota
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(QuotaDimension),

    /// Stored records contradict the registry's invariants
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Reading the upload from the client failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Internal service error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        if err.is_structural() {
            ServiceError::InvalidArchive(err.to_string())
        } else {
            ServiceError::Internal(err.to_string())
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ServiceError::NotFound(msg),
            DbError::Blob(msg) => ServiceError::Internal(format!("Blob storage: {}", msg)),
            DbError::Domain(e) => ServiceError::Internal(format!("Corrupt stored record: {}", e)),
            DbError::Configuration(msg) | DbError::Internal(msg) => ServiceError::Internal(msg),
            DbError::Connection(msg)
            | DbError::Pool(msg)
            | DbError::Query(msg)
            | DbError::Migration(msg)
            | DbError::ConstraintViolation(msg)
            | DbError::UniqueViolation(msg)
            | DbError::InvalidData(msg) => ServiceError::Database(msg),
        }
    }
}

impl From<BufferError> for ServiceError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Transport(msg) => ServiceError::Transport(msg),
            BufferError::Io(e) => ServiceError::Internal(format!("Upload buffer: {}", e)),
        }
    }
}

//! Storage layer for the module registry
//!
//! This crate provides:
//! - The [`PackageStore`] contract used by the service layer
//! - A PostgreSQL implementation with SQLx and embedded migrations
//! - An in-memory implementation for development and tests
//! - Content-addressed [`BlobStore`] implementations (filesystem and memory)
//! - Connection pool management
//!
//! # Example
//!
//! ```rust,no_run
//! use modreg_db::{create_pool, FilesystemBlobStore, PoolConfig, PostgresPackageStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool(&PoolConfig::new("postgres://localhost/modreg")).await?;
//! let blobs = Arc::new(FilesystemBlobStore::new("/var/lib/modreg/blobs").await?);
//! let store = PostgresPackageStore::new(pool, blobs);
//! # Ok(())
//! # }
//! ```

// Re-export core domain types for convenience
pub use modreg_core;

pub mod blob;
pub mod error;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod repository;

pub use blob::{BlobStore, BlobStream, FilesystemBlobStore, MemoryBlobStore};
pub use error::{DbError, DbResult};
pub use memory::MemoryPackageStore;
pub use pool::{
    close_pool, create_pool, mask_password, run_migrations, verify_pool_health, PoolConfig,
};
pub use postgres::PostgresPackageStore;
pub use repository::{quota_lock_key, version_lock_key, CreateOutcome, FileUpload, PackageStore};

// Re-export sqlx types that users may need
pub use sqlx::postgres::PgPool;

/// Default database URL environment variable name
pub const DEFAULT_DATABASE_URL_ENV: &str = "DATABASE_URL";

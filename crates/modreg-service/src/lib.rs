//! Service layer for the module registry
//!
//! This crate sits between the HTTP layer and the storage layer. It owns
//! upload buffering, archive validation, version resolution and the publish
//! pipeline.
//!
//! # Architecture
//!
//! - **ResolutionService**: version listing, `latest` and exact resolution,
//!   descriptor and lead file lookup
//! - **PublishService**: archive validation and atomic version creation
//! - **HashedBuffer**: single-pass buffering of uploads with digests
//!
//! # Example
//!
//! ```rust,no_run
//! use modreg_service::{ServiceRegistry, StaticQuotaPolicy, SystemClock};
//! use modreg_core::QuotaLimits;
//! use modreg_db::MemoryPackageStore;
//! use std::sync::Arc;
//!
//! let services = ServiceRegistry::new(
//!     Arc::new(MemoryPackageStore::default()),
//!     Arc::new(SystemClock),
//!     Arc::new(StaticQuotaPolicy(QuotaLimits::unlimited())),
//! );
//! ```

pub mod buffer;
pub mod clock;
pub mod error;
pub mod publish;
pub mod resolution;

pub use buffer::{BufferError, HashedBuffer, ReplayBuffer, DEFAULT_MEMORY_THRESHOLD};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ServiceError, ServiceResult};

pub use publish::{DefaultPublishService, PublishService, QuotaPolicy, StaticQuotaPolicy};
pub use resolution::{select_latest, DefaultResolutionService, ResolutionService};

use modreg_db::PackageStore;
use std::sync::Arc;

/// Service registry that holds all service instances
#[derive(Clone)]
pub struct ServiceRegistry {
    /// Resolution service
    pub resolution: Arc<dyn ResolutionService>,
    /// Publish service
    pub publish: Arc<dyn PublishService>,
}

impl ServiceRegistry {
    /// Create a new service registry with default implementations
    ///
    /// # Arguments
    ///
    /// * `store` - Package store implementation
    /// * `clock` - Time source for version timestamps
    /// * `quota` - Quota limits per owner
    pub fn new(
        store: Arc<dyn PackageStore>,
        clock: Arc<dyn Clock>,
        quota: Arc<dyn QuotaPolicy>,
    ) -> Self {
        let resolution = Arc::new(DefaultResolutionService::new(store.clone()));
        let publish = Arc::new(DefaultPublishService::new(store, clock, quota));

        Self {
            resolution,
            publish,
        }
    }

    /// Create a service registry with custom implementations
    pub fn with_services(
        resolution: Arc<dyn ResolutionService>,
        publish: Arc<dyn PublishService>,
    ) -> Self {
        Self {
            resolution,
            publish,
        }
    }

    /// Get the resolution service
    pub fn resolution(&self) -> &Arc<dyn ResolutionService> {
        &self.resolution
    }

    /// Get the publish service
    pub fn publish(&self) -> &Arc<dyn PublishService> {
        &self.publish
    }
}

//! Common test utilities and helpers
//!
//! Spawns the registry on a random local port backed by the in-memory
//! stores and a manual clock, and wraps the module proxy URLs.

use modreg_api::{build_api_server, AppState, MiddlewareConfig};
use modreg_core::QuotaLimits;
use modreg_db::{MemoryBlobStore, MemoryPackageStore, PackageStore};
use modreg_service::{ManualClock, ServiceRegistry, StaticQuotaPolicy};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Owner scope used by most tests
pub const OWNER: &str = "acme";

/// Test application state
pub struct TestApp {
    pub address: String,
    pub clock: Arc<ManualClock>,
    pub blobs: Arc<MemoryBlobStore>,
    client: reqwest::Client,
}

impl TestApp {
    /// Create a test application without quota limits, with the clock at t=100
    pub async fn new() -> Self {
        Self::with_quota(QuotaLimits::unlimited()).await
    }

    /// Create a test application enforcing `limits` for every owner
    pub async fn with_quota(limits: QuotaLimits) -> Self {
        let clock = Arc::new(ManualClock::at(100));
        let blobs = Arc::new(MemoryBlobStore::new());
        let store: Arc<dyn PackageStore> = Arc::new(MemoryPackageStore::new(blobs.clone()));

        let services = ServiceRegistry::new(
            store.clone(),
            clock.clone(),
            Arc::new(StaticQuotaPolicy(limits)),
        );
        let app = build_api_server(AppState::new(services, store), MiddlewareConfig::new());

        // Start server on random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let address = listener.local_addr().expect("Failed to get local address");

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Failed to start test server");
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build client");

        Self {
            address: format!("http://{}", address),
            clock,
            blobs,
            client,
        }
    }

    /// Get base URL
    pub fn url(&self) -> &str {
        &self.address
    }

    /// HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// URL of a module under the default owner
    pub fn module_url(&self, module: &str) -> String {
        format!("{}/{}/{}", self.address, OWNER, module)
    }

    /// URL of a `@v/` item of a module
    pub fn item_url(&self, module: &str, item: &str) -> String {
        format!("{}/@v/{}", self.module_url(module), item)
    }

    /// Upload an archive for `module` as the given user
    pub async fn publish_as(
        &self,
        module: &str,
        archive: Vec<u8>,
        user: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self.client.put(self.module_url(module)).body(archive);
        if let Some(user) = user {
            request = request.header(modreg_api::DEFAULT_IDENTITY_HEADER, user);
        }
        request.send().await.expect("Failed to send request")
    }

    /// Upload an archive for `module` anonymously
    pub async fn publish(&self, module: &str, archive: Vec<u8>) -> reqwest::Response {
        self.publish_as(module, archive, None).await
    }

    /// GET an absolute URL
    pub async fn get(&self, url: &str) -> reqwest::Response {
        self.client
            .get(url)
            .send()
            .await
            .expect("Failed to send request")
    }

    /// GET the version list body of a module
    pub async fn list(&self, module: &str) -> reqwest::Response {
        self.get(&self.item_url(module, "list")).await
    }
}

/// Assert response status
pub fn assert_status(response: &reqwest::Response, expected: reqwest::StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Generate a random lower-case module name segment
pub fn random_segment(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| (b'a' + rng.gen_range(0..26u8)) as char)
        .collect()
}

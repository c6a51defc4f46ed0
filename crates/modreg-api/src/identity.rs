//! Publisher identity
//!
//! Authentication happens in front of the registry. The registry only reads
//! the identity an upstream proxy attached to the request.

use axum::http::{header::InvalidHeaderName, HeaderMap, HeaderName};
use modreg_core::Creator;

/// Header set by the authenticating proxy when none is configured
pub const DEFAULT_IDENTITY_HEADER: &str = "x-registry-user";

/// Resolve the creator of a publish request
pub trait IdentityResolver: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> Creator;
}

/// Trusts a single request header, falling back to the anonymous creator
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::from_bytes(header.to_ascii_lowercase().as_bytes())?,
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(DEFAULT_IDENTITY_HEADER),
        }
    }
}

impl IdentityResolver for HeaderIdentity {
    fn identify(&self, headers: &HeaderMap) -> Creator {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Creator::new)
            .unwrap_or_else(Creator::anonymous)
    }
}

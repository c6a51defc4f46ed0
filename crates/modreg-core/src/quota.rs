//! Quota limits applied to an owner scope when publishing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimension of a quota that a publish would exceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    VersionCount,
    TypeFileSize,
    TotalSize,
}

impl QuotaDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaDimension::VersionCount => "version_count",
            QuotaDimension::TypeFileSize => "type_file_size",
            QuotaDimension::TotalSize => "total_size",
        }
    }
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            QuotaDimension::VersionCount => "maximum number of versions reached",
            QuotaDimension::TypeFileSize => "file exceeds the maximum size for this package type",
            QuotaDimension::TotalSize => "maximum total size of stored packages reached",
        };
        f.write_str(text)
    }
}

/// Current consumption of an owner scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub version_count: u64,
    pub total_size: u64,
}

/// Limits for an owner scope; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_version_count: Option<u64>,
    pub max_type_file_size: Option<u64>,
    pub max_total_size: Option<u64>,
}

impl QuotaLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Check whether adding one version with a file of `size` bytes fits.
    ///
    /// Dimensions are checked in a fixed order and the first violated one is
    /// reported.
    pub fn check(&self, usage: QuotaUsage, size: u64) -> Result<(), QuotaDimension> {
        if let Some(max) = self.max_version_count {
            if usage.version_count.saturating_add(1) > max {
                return Err(QuotaDimension::VersionCount);
            }
        }
        if let Some(max) = self.max_type_file_size {
            if size > max {
                return Err(QuotaDimension::TypeFileSize);
            }
        }
        if let Some(max) = self.max_total_size {
            if usage.total_size.saturating_add(size) > max {
                return Err(QuotaDimension::TotalSize);
            }
        }
        Ok(())
    }
}

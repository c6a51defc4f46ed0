//! Core type definitions
//!
//! Identifiers, validated names and the version token used by the protocol.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{RegistryError, Result};

/// Literal token that selects the most recently published version
pub const LATEST_TOKEN: &str = "latest";

const MAX_OWNER_LEN: usize = 255;
const MAX_MODULE_LEN: usize = 512;

static OWNER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("owner pattern is valid"));

static MODULE_ELEMENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._~+-]+$").expect("module pattern is valid"));

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = RegistryError;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s).map(Self).map_err(|e| {
                    RegistryError::ValidationError(format!(
                        "Invalid {}: {}",
                        stringify!($name),
                        e
                    ))
                })
            }
        }
    };
}

ulid_id!(
    /// Module identifier
    ModuleId
);
ulid_id!(
    /// Version identifier
    VersionId
);
ulid_id!(
    /// File identifier
    FileId
);

/// Owner scope that namespaces modules (a user or organization name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerScope(String);

impl OwnerScope {
    /// Parse and validate an owner name
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_OWNER_LEN || !OWNER_PATTERN.is_match(&name) {
            return Err(RegistryError::InvalidOwner(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerScope {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<OwnerScope> for String {
    fn from(value: OwnerScope) -> Self {
        value.0
    }
}

/// Module path, e.g. `example.com/widget/v2`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    /// Parse and validate a module path
    ///
    /// Path elements are separated by `/`; each element must be non-empty,
    /// must not be `.` or `..`, and may only contain ASCII letters, digits
    /// and `._~+-`.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_MODULE_LEN {
            return Err(RegistryError::InvalidModuleName(name));
        }

        let valid = name.split('/').all(|element| {
            element != "." && element != ".." && MODULE_ELEMENT_PATTERN.is_match(element)
        });
        if !valid {
            return Err(RegistryError::InvalidModuleName(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModuleName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ModuleName> for String {
    fn from(value: ModuleName) -> Self {
        value.0
    }
}

/// Published version string: `v` followed by a semantic version
///
/// The semantic version is only used for validation. Versions are ordered by
/// creation time, never by semver precedence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionString(String);

impl VersionString {
    pub fn parse(version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        let Some(rest) = version.strip_prefix('v') else {
            return Err(RegistryError::InvalidVersion(format!(
                "{}: missing 'v' prefix",
                version
            )));
        };
        semver::Version::parse(rest)
            .map_err(|e| RegistryError::InvalidVersion(format!("{}: {}", version, e)))?;
        Ok(Self(version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionString {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<VersionString> for String {
    fn from(value: VersionString) -> Self {
        value.0
    }
}

/// Version selector taken from a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    /// The most recently created version
    Latest,
    /// A literal version string; not validated, an unknown string simply
    /// resolves to nothing
    Exact(String),
}

impl VersionToken {
    pub fn parse(token: &str) -> Self {
        if token == LATEST_TOKEN {
            VersionToken::Latest
        } else {
            VersionToken::Exact(token.to_string())
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Latest => f.write_str(LATEST_TOKEN),
            VersionToken::Exact(v) => f.write_str(v),
        }
    }
}

/// Identity of the caller that publishes a version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Creator(String);

impl Creator {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identity used when no caller information is available
    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

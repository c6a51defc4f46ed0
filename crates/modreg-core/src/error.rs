//! Error types for the module registry core

use thiserror::Error;

/// Result type alias for core registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Main error type for core registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Owner scope name is not acceptable
    #[error("Invalid owner: {0}")]
    InvalidOwner(String),

    /// Module path is not acceptable
    #[error("Invalid module name: {0}")]
    InvalidModuleName(String),

    /// Version string is not a `v`-prefixed semantic version
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Archive is not a well-formed container or is empty
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// Archive entries disagree about the module or version they belong to
    #[error("Mismatched declaration: expected {expected}, found {found}")]
    MismatchedDeclaration { expected: String, found: String },

    /// Archive has no descriptor for its declared module and version
    #[error("Missing descriptor: {0}")]
    MissingDescriptor(String),

    /// Generic validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Reading the underlying buffer failed
    #[error("IO error: {0}")]
    Io(String),
}

impl RegistryError {
    /// Whether this error describes malformed client input rather than an
    /// internal failure.
    pub fn is_structural(&self) -> bool {
        !matches!(self, RegistryError::Io(_))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<semver::Error> for RegistryError {
    fn from(err: semver::Error) -> Self {
        RegistryError::InvalidVersion(err.to_string())
    }
}

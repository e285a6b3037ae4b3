//! Error type system for the addon system
//!
//! This module provides the error taxonomy shared by every component:
//! - One crate-wide error enum with a stable type name per variant
//! - Dedicated install error types that name failed and succeeded entries
//! - Context helpers for wrapping foreign errors as storage errors

use std::fmt;
use std::path::PathBuf;

/// Main error type for the addon system
#[derive(Debug, thiserror::Error)]
pub enum AddonError {
    // Metadata errors
    #[error("Malformed metadata at {}: {message}", .path.display())]
    MalformedMetadata { path: PathBuf, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    // Registry errors
    #[error(
        "Duplicate addon id {id}: {} conflicts with {}",
        .duplicate.display(),
        .first.display()
    )]
    DuplicateId {
        id: String,
        first: PathBuf,
        duplicate: PathBuf,
    },

    #[error("Addon not found: {0}")]
    NotFound(String),

    // Dependency errors
    #[error("Dependencies of addon {id} are not satisfied: {}", .unsatisfied.join(", "))]
    UnsatisfiedDependency { id: String, unsatisfied: Vec<String> },

    #[error("No installer provided and no cached verdict for addon {0}")]
    MissingInstaller(String),

    #[error("Invalid dependency entry {0:?}: no version specification found")]
    InvalidDependency(String),

    #[error(transparent)]
    AggregateInstall(#[from] AggregateInstallError),

    // Lifecycle errors
    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),

    // Persistence errors
    #[error("Status storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AddonError {
    /// Shorthand for a malformed metadata error
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AddonError::MalformedMetadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Get the error type name
    pub fn error_type(&self) -> &'static str {
        match self {
            AddonError::MalformedMetadata { .. } => "MalformedMetadataError",
            AddonError::Validation(_) => "ValidationError",
            AddonError::DuplicateId { .. } => "DuplicateIdError",
            AddonError::NotFound(_) => "NotFoundError",
            AddonError::UnsatisfiedDependency { .. } => "UnsatisfiedDependencyError",
            AddonError::MissingInstaller(_) => "MissingInstallerError",
            AddonError::InvalidDependency(_) => "InvalidDependencyError",
            AddonError::AggregateInstall(_) => "AggregateInstallError",
            AddonError::Attribute(_) => "AttributeError",
            AddonError::ModuleLoad(_) => "ModuleLoadError",
            AddonError::InvalidState(_) => "InvalidStateError",
            AddonError::Storage(_) => "StorageError",
            AddonError::Io(_) => "IoError",
            AddonError::Database(_) => "DatabaseError",
            AddonError::Serialization(_) => "SerializationError",
        }
    }

    /// Check if the caller may reasonably retry the failed operation
    ///
    /// Install failures are retryable because `AggregateInstallError` names the
    /// entries that still need work.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AddonError::AggregateInstall(_)
                | AddonError::Database(_)
                | AddonError::Io(_)
        )
    }
}

impl From<serde_json::Error> for AddonError {
    fn from(err: serde_json::Error) -> Self {
        AddonError::Serialization(err.to_string())
    }
}

/// A single failed installation reported by an installer backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to install {name}{constraint}: {message}")]
pub struct InstallError {
    pub name: String,
    pub constraint: String,
    pub message: String,
}

impl InstallError {
    pub fn new(
        name: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }
}

/// Partial installation failure
///
/// `failed` holds the entry whose install aborted the run, `succeeded` the
/// entries installed before it and `skipped` the entries never attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateInstallError {
    pub addon_id: String,
    pub failed: Vec<InstallError>,
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
}

impl fmt::Display for AggregateInstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<String> = self.failed.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "Installing dependencies of {} failed: [{}]; succeeded: [{}]; skipped: [{}]",
            self.addon_id,
            failed.join("; "),
            self.succeeded.join(", "),
            self.skipped.join(", ")
        )
    }
}

impl std::error::Error for AggregateInstallError {}

/// Result type alias for operations that can fail with AddonError
pub type Result<T> = std::result::Result<T, AddonError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| AddonError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AddonError::Storage(format!("{}: {}", f(), e)))
    }
}

// src/error.rs

//! Error types for installkit
//!
//! A single error enum covers resolution, execution and persistence failures.
//! Resolution problems that should not abort a whole pass are collected as
//! strings by the resolvers and only surface here when they are fatal.

use thiserror::Error;

/// Result type alias for installkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the installer core
#[derive(Error, Debug)]
pub enum Error {
    /// A requirement names a missing component or a mismatching version
    #[error("Unresolvable dependency: {0}")]
    UnresolvableDependency(String),

    /// Two catalog entries ended up with the same component key
    #[error("Component with identifier {0} already exists.")]
    DuplicateComponentKey(String),

    /// A dependency or parent chain loops back onto itself
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// An operation could not be performed or undone
    #[error("Operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    /// Administrator rights were requested and refused
    #[error("Administrator rights denied: {0}")]
    ElevationDenied(String),

    /// Writing the maintenance tool failed
    #[error("Cannot write maintenance tool: {0}")]
    PersistenceFailed(String),

    /// An essential update must be applied before anything else
    #[error("{0}")]
    ForceUpdate(String),

    /// The run was cancelled by the user
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A selection request that the component does not allow
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// A component, package or file could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A maintenance tool binary does not carry a valid layout
    #[error("Invalid binary layout: {0}")]
    InvalidLayout(String),

    /// Catalog, registry or requirement parsing failed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Session configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The target directory is locked by another session
    #[error("Lock error: {0}")]
    LockError(String),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an `OperationFailed` error for the named operation
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from a user cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

//! Error and result types for document mapping operations.
//!
//! Use [`DbResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors produced by the document mapping layer.
///
/// Not-found outcomes are deliberately not errors: lookups resolve to `None`
/// and delete-family operations resolve to a zero count.
#[derive(Error, Debug)]
pub enum DbError {
    /// No registered client claims a connection target, or an adapter failed
    /// to establish connectivity. Never retried internally.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A field failed a type, required, choices, or custom-validator check.
    /// The in-memory document is left unmodified so the caller may correct
    /// and retry.
    #[error("Validation error on field '{field}': {reason}")]
    Validation {
        /// The offending field name.
        field: String,
        /// The constraint that was violated.
        reason: String,
    },
    /// A schema-authoring error, surfaced synchronously at schema or model
    /// construction time rather than during a lifecycle operation.
    #[error("Schema error: {0}")]
    Schema(String),
    /// Serialization/deserialization error converting between document formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error in the underlying storage backend, propagated unchanged.
    /// At most one attempt is made per call; no retry layer is added.
    #[error("Backend error: {0}")]
    Backend(String),
    /// A query operator the target backend cannot express natively.
    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// A specialized `Result` type for document mapping operations.
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Shorthand for a [`DbError::Validation`] with an owned field name.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Validation { field: field.into(), reason: reason.into() }
    }
}

impl From<BsonError> for DbError {
    fn from(err: BsonError) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DbError {
    fn from(err: SerdeJsonError) -> Self {
        DbError::Serialization(err.to_string())
    }
}

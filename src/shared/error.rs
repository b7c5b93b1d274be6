//! Shared Error Types
//!
//! This module defines error types that are shared between the document layer,
//! the task layer and the HTTP surface. These errors represent common failure
//! cases such as malformed payloads and invalid field values.
//!
//! # Error Categories
//!
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - Data validation failures
//! - `UnknownVariant` - A stored or submitted string that names no known variant
//!
//! # Usage
//!
//! ```rust
//! use canvas_collab::shared::error::SharedError;
//!
//! let error = SharedError::validation("node_id", "node id cannot be empty");
//! ```
use thiserror::Error;

/// Shared error types used across the crate
#[derive(Debug, Error, Clone)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// A string that does not name any variant of an enum
    #[error("Unknown {kind}: '{value}'")]
    UnknownVariant {
        /// Name of the enum being parsed (e.g. "task status")
        kind: &'static str,
        /// The offending value
        value: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new unknown-variant error
    pub fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}

/// Helper trait for converting serialization errors
impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

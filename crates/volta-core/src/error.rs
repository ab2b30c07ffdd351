//! Error types and result aliases shared across Volta components.
//!
//! The taxonomy is deliberately small and maps one-to-one onto protocol
//! outcomes: callers can always distinguish "fix your request" from
//! "credential problem" from "storage is full, try later".

use std::fmt;

/// The result type used throughout Volta.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Volta operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller presented a missing, unknown, or inactive credential.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Description safe to surface to the caller.
        message: String,
    },

    /// The caller is authenticated but lacks the required capability.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description safe to surface to the caller.
        message: String,
    },

    /// The request is malformed: bad report shape, unmatched path, unknown
    /// stage or task, or an invalid mapping. No state mutation occurred.
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of what made the request invalid.
        message: String,
    },

    /// The requested resource was not found.
    #[error("not found: {resource_type} {id}")]
    NotFound {
        /// The type of resource that was looked up.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// No storage type owned by the lab has room for the requested bytes.
    ///
    /// Surfaced distinctly from [`Error::BadRequest`] so callers can tell
    /// "wait / configure more storage" apart from "fix your request".
    #[error("insufficient storage: {requested_bytes} bytes requested: {message}")]
    InsufficientStorage {
        /// Number of bytes the caller tried to reserve.
        requested_bytes: u64,
        /// Per-storage-type detail of why allocation failed.
        message: String,
    },

    /// A storage backend operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates an unauthorized error with the given message.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a forbidden error with the given message.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a bad-request error with the given message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a not-found error for the given resource type and id.
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates an insufficient-storage error.
    pub fn insufficient_storage(requested_bytes: u64, message: impl Into<String>) -> Self {
        Self::InsufficientStorage {
            requested_bytes,
            message: message.into(),
        }
    }

    /// Creates a storage error with the given message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error wrapping an underlying cause.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when the error indicates exhausted storage quota.
    #[must_use]
    pub fn is_insufficient_storage(&self) -> bool {
        matches!(self, Self::InsufficientStorage { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_storage_is_distinguishable() {
        let err = Error::insufficient_storage(100_000, "quota exceeded for all storage types");
        assert!(err.is_insufficient_storage());
        assert!(!Error::bad_request("nope").is_insufficient_storage());
    }

    #[test]
    fn not_found_formats_resource_and_id() {
        let err = Error::not_found("ObservedFile", "abc-123");
        assert_eq!(err.to_string(), "not found: ObservedFile abc-123");
    }
}

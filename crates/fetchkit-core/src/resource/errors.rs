//! Download error types.
//!
//! These errors are designed to be serializable and not depend on external
//! error types like `std::io::Error`. For I/O errors, the kind and message
//! are captured as strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for download operations.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadError {
    /// No admitted processor can handle the downloadable.
    #[error("No processor available for downloadable '{identifier}'")]
    NoProcessorAvailable {
        /// Identifier of the downloadable nothing claimed.
        identifier: String,
    },

    /// Transport-level failure (network, HTTP, object store).
    #[error("Transport failure: {message}")]
    Transport {
        /// Detailed error message from the transport.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// The mirror location does not carry a scheme any processor understands.
    #[error("Unsupported URL scheme in '{location}'")]
    UnsupportedUrlScheme {
        /// The offending location string.
        location: String,
    },

    /// Writing the result into the cache (file move or index upsert) failed.
    #[error("Cache write failed: {message}")]
    CacheWrite {
        /// Detailed error message.
        message: String,
    },

    /// The download was cancelled.
    #[error("Download cancelled")]
    Cancelled,

    /// A cloud-object processor found no record for the requested key.
    #[error("No record for '{key}'")]
    NoRecord {
        /// The object key nothing was stored under.
        key: String,
    },

    /// Every mirror (including terminal retries of the main mirror) failed.
    #[error("All mirrors exhausted for '{resource_id}' after {attempts} attempts")]
    AllMirrorsExhausted {
        /// The resource whose mirrors ran out.
        resource_id: String,
        /// Total number of attempts made.
        attempts: u32,
    },

    /// I/O error during file operations.
    #[error("I/O error ({kind}): {message}")]
    Io {
        /// The kind of I/O error (e.g. "NotFound", "PermissionDenied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// General/uncategorized error.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl DownloadError {
    /// Create a no-processor-available error.
    pub fn no_processor(identifier: impl Into<String>) -> Self {
        Self::NoProcessorAvailable {
            identifier: identifier.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a transport error carrying an HTTP status code.
    pub fn transport_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Transport {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create an unsupported-scheme error.
    pub fn unsupported_scheme(location: impl Into<String>) -> Self {
        Self::UnsupportedUrlScheme {
            location: location.into(),
        }
    }

    /// Create a cache-write error.
    pub fn cache_write(message: impl Into<String>) -> Self {
        Self::CacheWrite {
            message: message.into(),
        }
    }

    /// Create a no-record error.
    pub fn no_record(key: impl Into<String>) -> Self {
        Self::NoRecord { key: key.into() }
    }

    /// Create an all-mirrors-exhausted error.
    pub fn mirrors_exhausted(resource_id: impl Into<String>, attempts: u32) -> Self {
        Self::AllMirrorsExhausted {
            resource_id: resource_id.into(),
            attempts,
        }
    }

    /// Create an I/O error from a `std::io::Error`.
    ///
    /// Captures the error kind name and message for serialization.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        let kind = err.kind();
        Self::Io {
            kind: format!("{kind:?}"),
            message: err.to_string(),
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether the mirror policy may retry after this error.
    ///
    /// Transport, cache-write, and I/O failures advance the policy; every
    /// other kind is terminal the moment it is observed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::CacheWrite { .. } | Self::Io { .. }
        )
    }

    /// Check if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

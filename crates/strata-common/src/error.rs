//! Unified error types for the strata workspace.
//!
//! Higher-level crates define their own domain-specific error enums
//! (`LockError`, `BuildError`) that wrap these common variants.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StrataError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A recipe could not be parsed.
    #[error("recipe line {line}: {message}")]
    Parse {
        /// 1-based source line of the offending instruction.
        line: usize,
        /// Description of the syntax problem.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// A network fetch was attempted while offline mode is enabled.
    #[error("offline mode forbids fetching {resource}")]
    Offline {
        /// Resource that would have been fetched.
        resource: String,
    },

    /// A network fetch failed.
    #[error("fetch of {url} failed: {message}")]
    Network {
        /// Remote location.
        url: String,
        /// Transport or status error.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StrataError {
    /// Builds an [`StrataError::Io`] from a path and an I/O error.
    ///
    /// Handy as `.map_err(|e| StrataError::io(path, e))`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_line() {
        let err = StrataError::Parse {
            line: 7,
            message: "unknown instruction VOLUME".into(),
        };
        assert_eq!(err.to_string(), "recipe line 7: unknown instruction VOLUME");
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = StrataError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/x"));
    }
}

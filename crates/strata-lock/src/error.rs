//! Errors of the locked-sync protocol.

use std::path::PathBuf;

use strata_common::error::StrataError;
use thiserror::Error;

/// Reasons a dependency environment cannot be synchronized from its lockfile.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lockfile does not exist.
    #[error("lockfile missing: {path} (synchronization requires a committed lockfile)")]
    Missing {
        /// Expected lockfile location.
        path: PathBuf,
    },

    /// The dependency manifest does not exist.
    #[error("dependency manifest missing: {path}")]
    MissingManifest {
        /// Expected manifest location.
        path: PathBuf,
    },

    /// The manifest or lockfile is not valid.
    #[error("malformed {path}: {message}")]
    Malformed {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The lockfile no longer matches the manifest.
    #[error("lockfile is stale: {reason}")]
    Stale {
        /// What diverged.
        reason: String,
    },

    /// A locked dependency has no resolved package entry.
    #[error("lockfile references unresolved package \"{package}\" (required by {required_by})")]
    Unresolved {
        /// Missing package.
        package: String,
        /// Package that depends on it.
        required_by: String,
    },

    /// The base runtime does not satisfy the lockfile's `requires-python`.
    #[error("runtime {runtime} does not satisfy requires-python \"{requires}\"")]
    IncompatibleRuntime {
        /// Runtime version of the base image.
        runtime: String,
        /// Constraint declared by the lockfile.
        requires: String,
    },

    /// A shared error (I/O, hashing).
    #[error(transparent)]
    Common(#[from] StrataError),
}

/// Convenience alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

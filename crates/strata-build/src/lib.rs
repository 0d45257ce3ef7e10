//! # strata-build
//!
//! Executes validated build plans on a staging root filesystem and
//! records the result as a layered image.
//!
//! - **Engine**: step execution, layer capture, manifest and catalog updates.
//! - **Runner**: the command-execution seam (`chroot` on the host).
//! - **Context**: `.dockerignore` handling and context copies.
//! - **Snapshot**: before/after filesystem diffs per step.
//! - **Logs**: per-build log files.
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod context;
pub mod engine;
pub mod error;
pub mod logs;
pub mod runner;
pub mod snapshot;

pub use engine::{BuildOutcome, Provisioner};
pub use error::{BuildError, Result};
pub use runner::{CommandOutput, CommandRunner, CommandSpec};

//! # strata-lock
//!
//! Locked dependency synchronization support.
//!
//! A build may only synchronize dependencies from a lockfile that exists and
//! was produced from the current manifest. This crate parses the manifest
//! (`pyproject.toml`) and the lockfile (`uv.lock`) and rejects any drift
//! between them before a sync step is allowed to run.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod lockfile;
pub mod manifest;
pub mod specifier;
pub mod verify;

pub use error::LockError;
pub use verify::{LockSummary, verify};

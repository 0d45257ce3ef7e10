//! # strata-image
//!
//! Container image and layer management for the provisioner.
//!
//! Handles:
//! - **References**: `[registry/]repo[:tag][@sha256:..]` parsing and pinning.
//! - **Layers**: deterministic, content-addressed tar layers with whiteouts.
//! - **Storage**: local storage backend for layers and manifests.
//! - **Sources**: `file://`, `tar://`, and pinned `https://` sources.
//! - **Hashing**: SHA-256 content verification.
//! - **Registry**: local image catalog management.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod hash;
pub mod layer;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod resolve;
pub mod source;
pub mod storage;
pub mod tree;

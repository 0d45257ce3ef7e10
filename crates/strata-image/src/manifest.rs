//! Image manifests: the ordered layers, runtime config, and locked
//! dependency set of a built image.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_common::error::Result;
use strata_common::types::{ImageId, Sha256Hash};

/// One layer of a built image and the instruction that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Content digest of the layer archive.
    pub digest: Sha256Hash,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Index of the producing step in the build plan.
    pub step: usize,
    /// Recipe instruction that produced the layer.
    pub created_by: String,
}

/// Runtime configuration baked into the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// The single command started when the container runs.
    pub entrypoint: Vec<String>,
    /// Working directory of the entry process.
    pub working_dir: String,
    /// Environment of the entry process.
    pub env: BTreeMap<String, String>,
}

/// Locked dependency set installed into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// SHA-256 of the lockfile bytes.
    pub fingerprint: Sha256Hash,
    /// `requires-python` declared by the lockfile.
    pub requires_python: Option<String>,
    /// Package name to locked version.
    pub packages: BTreeMap<String, String>,
}

/// Complete description of a built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Content-derived image identifier.
    pub id: ImageId,
    /// Name the image was tagged with.
    pub name: String,
    /// Base image reference as written in the recipe.
    pub base: String,
    /// Ordered layers, bottom to top. The base image is the first layer.
    pub layers: Vec<LayerRecord>,
    /// Runtime configuration.
    pub config: ImageConfig,
    /// Locked dependency set, when the build synchronized one.
    pub lock: Option<LockRecord>,
    /// Build timestamp (RFC 3339). Not part of the image id.
    pub created_at: String,
}

#[derive(Serialize)]
struct IdInput<'a> {
    base: &'a str,
    layers: Vec<&'a Sha256Hash>,
    config: &'a ImageConfig,
    lock: Option<&'a Sha256Hash>,
}

impl ImageManifest {
    /// Computes the image id from everything except name and timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the id input cannot be serialized.
    pub fn compute_id(
        base: &str,
        layers: &[LayerRecord],
        config: &ImageConfig,
        lock: Option<&LockRecord>,
    ) -> Result<ImageId> {
        let input = IdInput {
            base,
            layers: layers.iter().map(|l| &l.digest).collect(),
            config,
            lock: lock.map(|l| &l.fingerprint),
        };
        let bytes = serde_json::to_vec(&input)?;
        Ok(ImageId::from(&crate::hash::hash_bytes(&bytes)))
    }

    /// Total size of all layers in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size_bytes).sum()
    }
}

//! Local storage backend for layers and image manifests.
//!
//! Layout under the data directory:
//!
//! ```text
//! layers/<sha256-hex>.tar
//! manifests/<image-id>.json
//! ```

use std::path::{Path, PathBuf};

use strata_common::error::{Result, StrataError};
use strata_common::types::{ImageId, Sha256Hash};

use crate::manifest::ImageManifest;

/// Manages local storage of layers and manifests.
#[derive(Debug)]
pub struct StorageBackend {
    /// Root directory for all stored data.
    root: PathBuf,
}

impl StorageBackend {
    /// Opens or initializes the storage backend at the given root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::debug!(path = %root.display(), "opening storage backend");
        for sub in ["layers", "manifests"] {
            let dir = root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| StrataError::io(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// Returns the path of a layer archive given its hash.
    #[must_use]
    pub fn layer_path(&self, hash: &Sha256Hash) -> PathBuf {
        self.root
            .join("layers")
            .join(format!("{}.tar", hash.as_hex()))
    }

    /// Checks whether a layer exists in the local store.
    #[must_use]
    pub fn has_layer(&self, hash: &Sha256Hash) -> bool {
        self.layer_path(hash).exists()
    }

    /// Moves a freshly written layer archive into the store.
    ///
    /// If a layer with the same digest is already stored, the new archive
    /// is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be moved or copied.
    pub fn store_layer(&self, archive: &Path, hash: &Sha256Hash) -> Result<PathBuf> {
        let dest = self.layer_path(hash);
        if dest.exists() {
            tracing::debug!(hash = %hash, "layer already stored");
            let _ = std::fs::remove_file(archive);
            return Ok(dest);
        }
        if std::fs::rename(archive, &dest).is_err() {
            // Cross-device moves fall back to copy + remove.
            let _ = std::fs::copy(archive, &dest).map_err(|e| StrataError::io(&dest, e))?;
            let _ = std::fs::remove_file(archive);
        }
        tracing::debug!(hash = %hash, path = %dest.display(), "layer stored");
        Ok(dest)
    }

    fn manifest_path(&self, id: &ImageId) -> PathBuf {
        self.root
            .join("manifests")
            .join(format!("{}.json", id.as_str()))
    }

    /// Persists an image manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized or written.
    pub fn write_manifest(&self, manifest: &ImageManifest) -> Result<()> {
        let path = self.manifest_path(&manifest.id);
        let json = serde_json::to_string_pretty(manifest)?;
        std::fs::write(&path, json).map_err(|e| StrataError::io(&path, e))
    }

    /// Loads an image manifest by id.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::NotFound` if no manifest is stored for `id`.
    pub fn read_manifest(&self, id: &ImageId) -> Result<ImageManifest> {
        let path = self.manifest_path(id);
        if !path.exists() {
            return Err(StrataError::NotFound {
                kind: "image manifest",
                id: id.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).map_err(|e| StrataError::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Deletes a stored manifest. Layers are kept, since other images may
    /// share them.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be removed.
    pub fn remove_manifest(&self, id: &ImageId) -> Result<()> {
        let path = self.manifest_path(id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| StrataError::io(&path, e))?;
        }
        Ok(())
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

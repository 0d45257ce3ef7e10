//! Local image catalog management.
//!
//! Maintains an index of built images by name. Each name maps to at most
//! one image; rebuilding a name replaces its entry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StrataError};
use strata_common::types::ImageId;

/// Entry in the local image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Content-derived identifier of the image.
    pub id: ImageId,
    /// Human-readable name/tag.
    pub name: String,
    /// Base image reference the image was built from.
    pub base: String,
    /// Ordered list of layer hashes (bottom to top).
    pub layers: Vec<String>,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
}

impl ImageCatalog {
    /// Opens or creates an image catalog in the given data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let catalog_path = data_dir.join(strata_common::constants::CATALOG_FILE);
        std::fs::create_dir_all(data_dir).map_err(|e| StrataError::io(data_dir, e))?;
        Ok(Self { catalog_path })
    }

    /// Lists all images in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        if !self.catalog_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.catalog_path)
            .map_err(|e| StrataError::io(&self.catalog_path, e))?;
        let entries: Vec<ImageEntry> = serde_json::from_str(&content)?;
        Ok(entries)
    }

    /// Registers an image, replacing any entry with the same name.
    ///
    /// Returns the replaced entry, if there was one.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub fn register(&self, entry: ImageEntry) -> Result<Option<ImageEntry>> {
        let mut entries = self.list()?;
        let replaced = entries
            .iter()
            .position(|e| e.name == entry.name)
            .map(|idx| entries.remove(idx));
        tracing::debug!(name = %entry.name, id = %entry.id, "registering image");
        entries.push(entry);
        self.write_entries(&entries)?;
        Ok(replaced)
    }

    /// Finds an image by exact name or by id prefix.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::NotFound` if nothing matches, and
    /// `StrataError::Config` if an id prefix is ambiguous.
    pub fn find(&self, name_or_id: &str) -> Result<ImageEntry> {
        let entries = self.list()?;
        if let Some(entry) = entries.iter().find(|e| e.name == name_or_id) {
            return Ok(entry.clone());
        }
        let mut matches = entries
            .into_iter()
            .filter(|e| !name_or_id.is_empty() && e.id.as_str().starts_with(name_or_id));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(entry),
            (Some(_), Some(_)) => Err(StrataError::Config {
                message: format!("image id prefix \"{name_or_id}\" is ambiguous"),
            }),
            (None, _) => Err(StrataError::NotFound {
                kind: "image",
                id: name_or_id.to_string(),
            }),
        }
    }

    /// Removes an image by name or id prefix.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::NotFound` if no such image exists.
    pub fn remove(&self, name_or_id: &str) -> Result<ImageEntry> {
        let target = self.find(name_or_id)?;
        let mut entries = self.list()?;
        entries.retain(|e| e.name != target.name);
        self.write_entries(&entries)?;
        Ok(target)
    }

    fn write_entries(&self, entries: &[ImageEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.catalog_path, json).map_err(|e| StrataError::io(&self.catalog_path, e))
    }
}

//! Resolution of image references to filesystem contents.
//!
//! Images built locally (present in the catalog) are rebuilt from their
//! stored layers. Everything else must be mapped to a source URI in the
//! configuration; there is no implicit registry lookup.

use std::path::Path;

use strata_common::config::StrataConfig;
use strata_common::error::{Result, StrataError};

use crate::reference::ImageRef;
use crate::registry::ImageCatalog;
use crate::source::resolve_source;
use crate::storage::StorageBackend;

/// Looks up image references in the catalog and the configured sources.
#[derive(Debug)]
pub struct ImageResolver<'a> {
    config: &'a StrataConfig,
    storage: &'a StorageBackend,
    catalog: &'a ImageCatalog,
}

impl<'a> ImageResolver<'a> {
    /// Creates a resolver over the given configuration and local stores.
    #[must_use]
    pub const fn new(
        config: &'a StrataConfig,
        storage: &'a StorageBackend,
        catalog: &'a ImageCatalog,
    ) -> Self {
        Self {
            config,
            storage,
            catalog,
        }
    }

    /// Writes the filesystem of `reference` into `target`.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::NotFound` if the reference is neither in the
    /// catalog nor mapped to a source, and propagates source failures.
    pub fn materialize(&self, reference: &ImageRef, target: &Path) -> Result<()> {
        let name = reference.to_string();

        if let Ok(entry) = self.catalog.find(&name) {
            if entry.name == name {
                tracing::info!(image = %name, id = %entry.id, "using locally built image");
                let manifest = self.storage.read_manifest(&entry.id)?;
                for layer in &manifest.layers {
                    let path = self.storage.layer_path(&layer.digest);
                    if !path.exists() {
                        return Err(StrataError::NotFound {
                            kind: "layer",
                            id: layer.digest.to_string(),
                        });
                    }
                    let _ = crate::layer::extract_layer(&path, target)?;
                }
                return Ok(());
            }
        }

        let uri = self
            .config
            .source_for(&name)
            .ok_or_else(|| StrataError::NotFound {
                kind: "image",
                id: format!("{name} (no catalog entry and no configured source)"),
            })?;
        tracing::info!(image = %name, source = uri, "materializing image");
        resolve_source(uri)?.materialize(target, self.config.offline)
    }
}

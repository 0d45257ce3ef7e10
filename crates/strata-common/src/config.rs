//! Global configuration model for the provisioner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Root configuration for strata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Base directory for layers, manifests, the catalog, and build logs.
    pub data_dir: PathBuf,
    /// Whether offline mode is enabled (remote image sources are refused).
    pub offline: bool,
    /// Maps image references (`python:3.12-slim-bookworm`) to source URIs
    /// (`file://`, `tar://`, `https://...#sha256=<hex>`).
    pub image_sources: BTreeMap<String, String>,
    /// Shell used for shell-form `RUN` instructions.
    pub shell: Vec<String>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::constants::data_dir().clone(),
            offline: false,
            image_sources: BTreeMap::new(),
            shell: vec!["/bin/sh".into(), "-c".into()],
        }
    }
}

impl StrataConfig {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults; fields absent from the file
    /// keep their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StrataError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        if config.shell.is_empty() {
            return Err(StrataError::Config {
                message: "shell must name at least one program".into(),
            });
        }
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Returns the configured source URI for an image reference.
    #[must_use]
    pub fn source_for(&self, reference: &str) -> Option<&str> {
        self.image_sources.get(reference).map(String::as_str)
    }

    /// Directory holding per-build log files.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

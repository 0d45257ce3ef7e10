//! The lockfile (`uv.lock`): every resolved package pinned to one version.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{LockError, Result};
use crate::manifest::{Requirement, normalize_name, normalize_specifier};

/// Lockfile format versions this crate understands.
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// A parsed lockfile.
#[derive(Debug, Clone, Deserialize)]
pub struct Lockfile {
    /// Format version.
    pub version: u32,
    /// Python constraint the resolution was made for.
    #[serde(rename = "requires-python")]
    pub requires_python: Option<String>,
    /// Resolved packages.
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

/// One resolved package.
#[derive(Debug, Clone, Deserialize)]
pub struct LockedPackage {
    /// Package name as written by the locker.
    pub name: String,
    /// Pinned version (absent for some virtual roots).
    pub version: Option<String>,
    /// Where the package comes from (`registry`, `virtual`, `editable`, ...).
    #[serde(default)]
    pub source: BTreeMap<String, toml::Value>,
    /// Runtime dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    /// Dependencies per extra.
    #[serde(default, rename = "optional-dependencies")]
    pub optional_dependencies: BTreeMap<String, Vec<DependencyRef>>,
    /// Dependencies per group.
    #[serde(default, rename = "dev-dependencies")]
    pub dev_dependencies: BTreeMap<String, Vec<DependencyRef>>,
    /// Requirements the resolution was computed from (root packages only).
    pub metadata: Option<PackageMetadata>,
}

/// Reference from one package to another.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyRef {
    /// Name of the depended-upon package.
    pub name: String,
}

/// Snapshot of the manifest requirements stored alongside the root package.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageMetadata {
    /// Runtime and optional requirements.
    #[serde(default, rename = "requires-dist")]
    pub requires_dist: Vec<LockedRequirement>,
    /// Group requirements.
    #[serde(default, rename = "requires-dev")]
    pub requires_dev: BTreeMap<String, Vec<LockedRequirement>>,
}

/// A requirement as recorded in the lockfile metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct LockedRequirement {
    /// Package name.
    pub name: String,
    /// Version specifier, if constrained.
    pub specifier: Option<String>,
    /// Extras requested.
    #[serde(default)]
    pub extras: Vec<String>,
    /// Environment marker.
    pub marker: Option<String>,
    /// Extra this requirement belongs to, for optional dependencies.
    #[serde(rename = "provides-extra")]
    pub provides_extra: Option<String>,
}

impl LockedRequirement {
    /// Converts to the normalized form used for manifest comparison.
    #[must_use]
    pub fn to_requirement(&self) -> Requirement {
        let mut extras: Vec<String> = self.extras.iter().map(|e| normalize_name(e)).collect();
        extras.sort();
        Requirement {
            name: normalize_name(&self.name),
            extras,
            specifier: self
                .specifier
                .as_deref()
                .map(normalize_specifier)
                .unwrap_or_default(),
            marker: self.marker.clone(),
        }
    }
}

impl LockedPackage {
    /// Returns `true` for the package that represents the project itself.
    #[must_use]
    pub fn is_project_root(&self) -> bool {
        ["virtual", "editable"].iter().any(|kind| {
            self.source
                .get(*kind)
                .and_then(toml::Value::as_str)
                .is_some_and(|p| p == ".")
        })
    }

    /// Normalized name.
    #[must_use]
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

impl Lockfile {
    /// Finds the root package of the project named `project`.
    #[must_use]
    pub fn root(&self, project: &str) -> Option<&LockedPackage> {
        self.packages
            .iter()
            .find(|p| p.is_project_root() && p.normalized_name() == project)
            .or_else(|| self.packages.iter().find(|p| p.normalized_name() == project))
    }

    /// Installed-dependency set: every non-root package and its version.
    #[must_use]
    pub fn resolved_set(&self) -> BTreeMap<String, String> {
        self.packages
            .iter()
            .filter(|p| !p.is_project_root())
            .map(|p| (p.normalized_name(), p.version.clone().unwrap_or_default()))
            .collect()
    }
}

/// Parses lockfile text. `path` is only used in error messages.
///
/// # Errors
///
/// Returns `LockError::Malformed` if the TOML is invalid or the format
/// version is unsupported.
pub fn parse_lockfile(text: &str, path: &Path) -> Result<Lockfile> {
    let lock: Lockfile = toml::from_str(text).map_err(|e| LockError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if !SUPPORTED_VERSIONS.contains(&lock.version) {
        return Err(LockError::Malformed {
            path: path.to_path_buf(),
            message: format!("unsupported lockfile version {}", lock.version),
        });
    }
    Ok(lock)
}

/// Loads `uv.lock` from `dir`, returning the parsed lockfile and its raw bytes.
///
/// # Errors
///
/// Returns `LockError::Missing` if the file does not exist, and parse
/// errors as in [`parse_lockfile`].
pub fn load_lockfile(dir: &Path) -> Result<(Lockfile, Vec<u8>)> {
    let path = dir.join(strata_common::constants::LOCKFILE_FILE);
    if !path.is_file() {
        return Err(LockError::Missing { path });
    }
    let bytes =
        std::fs::read(&path).map_err(|e| strata_common::error::StrataError::io(&path, e))?;
    let text = String::from_utf8_lossy(&bytes);
    let lock = parse_lockfile(&text, &path)?;
    Ok((lock, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"
version = 1
requires-python = ">=3.12"

[[package]]
name = "tts-bot"
version = "0.1.0"
source = { virtual = "." }
dependencies = [
    { name = "discord-py", extra = ["voice"] },
    { name = "edge-tts" },
]

[package.metadata]
requires-dist = [
    { name = "discord-py", extras = ["voice"], specifier = ">=2.3.2" },
    { name = "edge-tts", specifier = ">=6.1.9" },
]

[[package]]
name = "discord-py"
version = "2.4.0"
source = { registry = "https://pypi.org/simple" }
dependencies = [{ name = "aiohttp" }]

[[package]]
name = "aiohttp"
version = "3.10.10"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "edge-tts"
version = "6.1.18"
source = { registry = "https://pypi.org/simple" }
"#;

    #[test]
    fn parse_lock_and_find_root() {
        let lock = parse_lockfile(LOCK, Path::new("uv.lock")).expect("parse");
        assert_eq!(lock.packages.len(), 4);
        let root = lock.root("tts-bot").expect("root");
        assert!(root.is_project_root());
        assert_eq!(root.dependencies.len(), 2);
        let meta = root.metadata.as_ref().expect("metadata");
        assert_eq!(meta.requires_dist[0].to_requirement().specifier, ">=2.3.2");
    }

    #[test]
    fn resolved_set_excludes_root() {
        let lock = parse_lockfile(LOCK, Path::new("uv.lock")).expect("parse");
        let set = lock.resolved_set();
        assert_eq!(set.len(), 3);
        assert_eq!(set["discord-py"], "2.4.0");
        assert!(!set.contains_key("tts-bot"));
    }

    #[test]
    fn unsupported_version_is_malformed() {
        let err = parse_lockfile("version = 9\n", Path::new("uv.lock")).unwrap_err();
        assert!(err.to_string().contains("unsupported lockfile version"));
    }

    #[test]
    fn missing_lockfile() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            load_lockfile(dir.path()).unwrap_err(),
            LockError::Missing { .. }
        ));
    }
}

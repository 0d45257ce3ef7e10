//! Filesystem snapshots used to compute per-step layers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use strata_common::error::{Result, StrataError};
use strata_image::layer::LayerChanges;

/// Metadata that identifies one version of a filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fingerprint {
    Dir {
        mode: u32,
    },
    File {
        mode: u32,
        len: u64,
        modified: Option<std::time::SystemTime>,
    },
    Symlink {
        target: PathBuf,
    },
}

/// State of every entry below a root directory.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<PathBuf, Fingerprint>,
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

impl Snapshot {
    /// Walks `root` and records every entry (the root itself excluded).
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or entry cannot be read.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut snapshot = Self::default();
        if root.exists() {
            snapshot.walk(root, Path::new(""))?;
        }
        tracing::trace!(root = %root.display(), entries = snapshot.entries.len(), "snapshot");
        Ok(snapshot)
    }

    fn walk(&mut self, root: &Path, rel: &Path) -> Result<()> {
        let dir = root.join(rel);
        let entries = std::fs::read_dir(&dir).map_err(|e| StrataError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StrataError::io(&dir, e))?;
            let child = rel.join(entry.file_name());
            let full = root.join(&child);
            let meta = std::fs::symlink_metadata(&full).map_err(|e| StrataError::io(&full, e))?;

            let fingerprint = if meta.file_type().is_symlink() {
                Fingerprint::Symlink {
                    target: std::fs::read_link(&full).map_err(|e| StrataError::io(&full, e))?,
                }
            } else if meta.is_dir() {
                Fingerprint::Dir {
                    mode: mode_of(&meta),
                }
            } else {
                Fingerprint::File {
                    mode: mode_of(&meta),
                    len: meta.len(),
                    modified: meta.modified().ok(),
                }
            };
            let is_dir = matches!(fingerprint, Fingerprint::Dir { .. });
            let _ = self.entries.insert(child.clone(), fingerprint);
            if is_dir {
                self.walk(root, &child)?;
            }
        }
        Ok(())
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes from `self` to `after`.
    ///
    /// New and modified entries become upserts; a removed directory yields
    /// a single removal rather than one per descendant.
    #[must_use]
    pub fn diff(&self, after: &Self) -> LayerChanges {
        let upserts = after
            .entries
            .iter()
            .filter(|(path, fp)| self.entries.get(*path) != Some(fp))
            .map(|(path, _)| path.clone())
            .collect();

        let mut removals: Vec<PathBuf> = Vec::new();
        for path in self.entries.keys() {
            if after.entries.contains_key(path) {
                continue;
            }
            if removals.last().is_some_and(|parent| path.starts_with(parent)) {
                continue;
            }
            removals.push(path.clone());
        }

        LayerChanges { upserts, removals }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }

    #[test]
    fn missing_root_is_empty() {
        let snap = Snapshot::capture(Path::new("/nonexistent/strata/root")).expect("capture");
        assert!(snap.is_empty());
    }

    #[test]
    fn first_snapshot_lists_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "app/main.py", "print()");
        write(dir.path(), "bin/uv", "x");
        let snap = Snapshot::capture(dir.path()).expect("capture");
        assert_eq!(snap.len(), 4);

        let changes = Snapshot::default().diff(&snap);
        assert_eq!(
            changes.upserts,
            vec![
                PathBuf::from("app"),
                PathBuf::from("app/main.py"),
                PathBuf::from("bin"),
                PathBuf::from("bin/uv"),
            ]
        );
        assert!(changes.removals.is_empty());
    }

    #[test]
    fn unchanged_tree_has_empty_diff() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "app/main.py", "print()");
        let before = Snapshot::capture(dir.path()).expect("before");
        let after = Snapshot::capture(dir.path()).expect("after");
        assert!(before.diff(&after).is_empty());
    }

    #[test]
    fn modified_and_added_files_are_upserts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "app/main.py", "print()");
        let before = Snapshot::capture(dir.path()).expect("before");

        write(dir.path(), "app/main.py", "print('changed')");
        write(dir.path(), "app/.venv/lib/site.py", "");
        let after = Snapshot::capture(dir.path()).expect("after");

        let changes = before.diff(&after);
        assert!(changes.upserts.contains(&PathBuf::from("app/main.py")));
        assert!(changes.upserts.contains(&PathBuf::from("app/.venv/lib/site.py")));
        assert!(changes.removals.is_empty());
    }

    #[test]
    fn removed_directory_is_one_removal() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "var/lib/apt/lists/a", "");
        write(dir.path(), "var/lib/apt/lists/b", "");
        let before = Snapshot::capture(dir.path()).expect("before");

        std::fs::remove_dir_all(dir.path().join("var/lib/apt/lists")).expect("rm");
        let after = Snapshot::capture(dir.path()).expect("after");

        let changes = before.diff(&after);
        assert_eq!(changes.removals, vec![PathBuf::from("var/lib/apt/lists")]);
    }
}

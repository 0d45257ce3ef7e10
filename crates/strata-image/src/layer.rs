//! Filesystem layer management.
//!
//! Each image is composed of ordered layers. Layers are content-addressed
//! by their SHA-256 hash. Layers written here are deterministic: entries
//! are sorted and carry no timestamps or owner names, so the same file
//! contents always produce the same digest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StrataError};
use strata_common::types::Sha256Hash;

/// Prefix marking a deleted path inside a layer archive.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// A single filesystem layer in an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Content-addressed hash of this layer.
    pub hash: Sha256Hash,
    /// Size of the layer archive in bytes.
    pub size_bytes: u64,
}

/// Extracts a tar archive onto the target directory.
///
/// Supports both plain `.tar` and gzip-compressed `.tar.gz` / `.tgz`
/// archives. Whiteout entries remove the path they name instead of being
/// written out.
///
/// # Errors
///
/// Returns an error if extraction or hash computation fails.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<Layer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    std::fs::create_dir_all(target).map_err(|e| StrataError::io(target, e))?;

    let file = std::fs::File::open(archive_path).map_err(|e| StrataError::io(archive_path, e))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| StrataError::io(archive_path, e))?
        .len();

    if is_gzip_archive(archive_path) {
        let decoder = flate2::read::GzDecoder::new(file);
        unpack_entries(tar::Archive::new(decoder), target)?;
    } else {
        unpack_entries(tar::Archive::new(file), target)?;
    }

    let hash = crate::hash::hash_file(archive_path)?;
    tracing::info!(hash = %hash, size = size_bytes, "layer extracted");

    Ok(Layer { hash, size_bytes })
}

fn unpack_entries<R: std::io::Read>(mut archive: tar::Archive<R>, target: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    let entries = archive.entries().map_err(|e| StrataError::io(target, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| StrataError::io(target, e))?;
        let path = entry
            .path()
            .map_err(|e| StrataError::io(target, e))?
            .into_owned();

        let whiteout = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(WHITEOUT_PREFIX))
            .map(str::to_string);

        if let Some(name) = whiteout {
            let victim = target
                .join(path.parent().unwrap_or_else(|| Path::new("")))
                .join(name);
            remove_path(&victim)?;
            tracing::debug!(path = %victim.display(), "whiteout applied");
            continue;
        }

        let _ = entry
            .unpack_in(target)
            .map_err(|e| StrataError::io(target.join(&path), e))?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| StrataError::io(path, e))
}

/// Changes captured for one layer, as paths relative to the rootfs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerChanges {
    /// Paths created or modified by the step.
    pub upserts: Vec<PathBuf>,
    /// Paths removed by the step.
    pub removals: Vec<PathBuf>,
}

impl LayerChanges {
    /// Returns `true` when the step left the filesystem untouched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// Writes a deterministic tar layer for the given changes under `root`.
///
/// Entries are emitted in sorted order with zeroed mtimes and root
/// ownership. Removals become whiteout entries.
///
/// # Errors
///
/// Returns an error if a changed path cannot be read or the archive
/// cannot be written.
pub fn write_layer(root: &Path, changes: &LayerChanges, out: &Path) -> Result<Layer> {
    let file = std::fs::File::create(out).map_err(|e| StrataError::io(out, e))?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);

    let mut entries: Vec<(PathBuf, bool)> = changes
        .upserts
        .iter()
        .map(|p| (p.clone(), false))
        .chain(changes.removals.iter().map(|p| (whiteout_path(p), true)))
        .collect();
    entries.sort();

    for (rel, is_whiteout) in &entries {
        if *is_whiteout {
            let mut header = base_header(tar::EntryType::Regular, 0o644);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, rel, std::io::empty())
                .map_err(|e| StrataError::io(out, e))?;
            continue;
        }
        append_path(&mut builder, root, rel, out)?;
    }

    let mut file = builder.into_inner().map_err(|e| StrataError::io(out, e))?;
    std::io::Write::flush(&mut file).map_err(|e| StrataError::io(out, e))?;
    drop(file);

    let size_bytes = std::fs::metadata(out)
        .map_err(|e| StrataError::io(out, e))?
        .len();
    let hash = crate::hash::hash_file(out)?;
    tracing::debug!(
        hash = %hash,
        upserts = changes.upserts.len(),
        removals = changes.removals.len(),
        "layer written"
    );
    Ok(Layer { hash, size_bytes })
}

fn append_path(
    builder: &mut tar::Builder<std::fs::File>,
    root: &Path,
    rel: &Path,
    out: &Path,
) -> Result<()> {
    let full = root.join(rel);
    let meta = std::fs::symlink_metadata(&full).map_err(|e| StrataError::io(&full, e))?;
    let mode = file_mode(&meta);

    if meta.file_type().is_symlink() {
        let link = std::fs::read_link(&full).map_err(|e| StrataError::io(&full, e))?;
        let mut header = base_header(tar::EntryType::Symlink, 0o777);
        header.set_size(0);
        builder
            .append_link(&mut header, rel, &link)
            .map_err(|e| StrataError::io(out, e))?;
    } else if meta.is_dir() {
        let mut header = base_header(tar::EntryType::Directory, mode);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_data(&mut header, rel, std::io::empty())
            .map_err(|e| StrataError::io(out, e))?;
    } else {
        let data = std::fs::File::open(&full).map_err(|e| StrataError::io(&full, e))?;
        let mut header = base_header(tar::EntryType::Regular, mode);
        header.set_size(meta.len());
        header.set_cksum();
        builder
            .append_data(&mut header, rel, data)
            .map_err(|e| StrataError::io(out, e))?;
    }
    Ok(())
}

fn base_header(kind: tar::EntryType, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn whiteout_path(rel: &Path) -> PathBuf {
    let name = rel
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    rel.parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{WHITEOUT_PREFIX}{name}"))
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

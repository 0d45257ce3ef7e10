//! Image source protocol handlers.
//!
//! Supports `file://` (local rootfs directory), `tar://` (archive), and
//! remote `https://` archives with optional SHA-256 pinning
//! (`https://host/image.tar.gz#sha256=<hex>`).
//! Remote sources are refused in offline mode.

use std::io::Write;
use std::path::{Path, PathBuf};

use strata_common::error::{Result, StrataError};
use strata_common::types::Sha256Hash;

/// Supported image source protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Local directory (`file:///path/to/rootfs`).
    File(PathBuf),
    /// Local tar archive (`tar:///path/to/image.tar`).
    Tar(PathBuf),
    /// Remote HTTP(S) archive.
    Remote {
        /// URL of the remote archive, without the pin fragment.
        url: String,
        /// Expected SHA-256 hash for verification.
        sha256: Option<Sha256Hash>,
    },
}

/// Resolves an image source URI into an `ImageSource`.
///
/// # Errors
///
/// Returns an error if the URI scheme is unsupported, a local path does
/// not exist, or a pin fragment is malformed.
pub fn resolve_source(uri: &str) -> Result<ImageSource> {
    if let Some(path_str) = uri.strip_prefix("file://") {
        let path = PathBuf::from(path_str);
        if !path.is_dir() {
            return Err(StrataError::NotFound {
                kind: "image directory",
                id: path_str.to_string(),
            });
        }
        tracing::debug!(path = %path.display(), "resolved file:// source");
        Ok(ImageSource::File(path))
    } else if let Some(path_str) = uri.strip_prefix("tar://") {
        let path = PathBuf::from(path_str);
        if !path.is_file() {
            return Err(StrataError::NotFound {
                kind: "tar archive",
                id: path_str.to_string(),
            });
        }
        tracing::debug!(path = %path.display(), "resolved tar:// source");
        Ok(ImageSource::Tar(path))
    } else if uri.starts_with("https://") || uri.starts_with("http://") {
        let (url, sha256) = match uri.split_once('#') {
            Some((url, fragment)) => {
                let hex = fragment.strip_prefix("sha256=").ok_or_else(|| StrataError::Config {
                    message: format!("unsupported source fragment \"{fragment}\", expected sha256=<hex>"),
                })?;
                (url.to_string(), Some(Sha256Hash::from_hex(hex)?))
            }
            None => (uri.to_string(), None),
        };
        tracing::debug!(url = %url, pinned = sha256.is_some(), "resolved remote source");
        Ok(ImageSource::Remote { url, sha256 })
    } else {
        Err(StrataError::Config {
            message: format!("unsupported image source URI scheme: {uri}"),
        })
    }
}

impl ImageSource {
    /// Writes the image filesystem described by this source into `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read, a remote fetch is
    /// refused or fails, or a pinned digest does not match.
    pub fn materialize(&self, target: &Path, offline: bool) -> Result<()> {
        match self {
            Self::File(dir) => {
                let files = crate::tree::copy_tree(dir, target, &|_| true)?;
                tracing::info!(source = %dir.display(), files, "copied image directory");
            }
            Self::Tar(archive) => {
                let _ = crate::layer::extract_layer(archive, target)?;
            }
            Self::Remote { url, sha256 } => {
                let scratch = tempfile::tempdir().map_err(|e| StrataError::io(target, e))?;
                let archive = fetch_remote(url, sha256.as_ref(), scratch.path(), offline)?;
                let _ = crate::layer::extract_layer(&archive, target)?;
            }
        }
        Ok(())
    }
}

/// Downloads a remote archive into `dest_dir` and verifies its pin.
///
/// # Errors
///
/// Returns `StrataError::Offline` in offline mode, `StrataError::Network`
/// on transport or HTTP status failures, and `StrataError::HashMismatch`
/// if the body does not match the pinned digest.
pub fn fetch_remote(
    url: &str,
    expected: Option<&Sha256Hash>,
    dest_dir: &Path,
    offline: bool,
) -> Result<PathBuf> {
    if offline {
        return Err(StrataError::Offline {
            resource: url.to_string(),
        });
    }
    if expected.is_none() {
        tracing::warn!(url, "remote image source has no sha256 pin");
    }

    tracing::info!(url, "fetching remote image");
    let network = |message: String| StrataError::Network {
        url: url.to_string(),
        message,
    };
    let response = reqwest::blocking::get(url)
        .map_err(|e| network(e.to_string()))?
        .error_for_status()
        .map_err(|e| network(e.to_string()))?;
    let body = response.bytes().map_err(|e| network(e.to_string()))?;

    let name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("image.tar");
    let path = dest_dir.join(name);
    let mut file = std::fs::File::create(&path).map_err(|e| StrataError::io(&path, e))?;
    file.write_all(&body).map_err(|e| StrataError::io(&path, e))?;

    if let Some(expected) = expected {
        crate::hash::validate_hash(&path, expected)?;
    }
    tracing::info!(url, bytes = body.len(), "remote image fetched");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_file_source_existing_dir_returns_file() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let uri = format!("file://{}", dir.path().display());
        let source = resolve_source(&uri).expect("resolve failed");
        assert!(matches!(source, ImageSource::File(_)));
    }

    #[test]
    fn resolve_tar_source_existing_file_returns_tar() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = dir.path().join("test.tar");
        std::fs::write(&tar_path, b"fake tar").expect("failed to write");
        let uri = format!("tar://{}", tar_path.display());
        let source = resolve_source(&uri).expect("resolve failed");
        assert!(matches!(source, ImageSource::Tar(_)));
    }

    #[test]
    fn resolve_https_source_with_pin() {
        let hex = "b".repeat(64);
        let source =
            resolve_source(&format!("https://example.com/uv.tar.gz#sha256={hex}")).expect("resolve");
        match source {
            ImageSource::Remote { url, sha256 } => {
                assert_eq!(url, "https://example.com/uv.tar.gz");
                assert_eq!(sha256.expect("pin").as_hex(), hex);
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn resolve_bad_fragment_returns_error() {
        assert!(resolve_source("https://example.com/uv.tar#md5=abc").is_err());
    }

    #[test]
    fn resolve_unknown_scheme_returns_error() {
        assert!(resolve_source("ftp://example.com/image").is_err());
    }

    #[test]
    fn resolve_missing_paths_return_error() {
        assert!(resolve_source("file:///nonexistent/path").is_err());
        assert!(resolve_source("tar:///nonexistent/archive.tar").is_err());
    }

    #[test]
    fn offline_mode_refuses_remote_fetch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = fetch_remote("https://example.com/img.tar", None, dir.path(), true).unwrap_err();
        assert!(matches!(err, StrataError::Offline { .. }));
    }

    #[test]
    fn materialize_file_source_copies_rootfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(rootfs.join("usr/bin")).expect("mkdir");
        std::fs::write(rootfs.join("usr/bin/python3"), b"py").expect("write");

        let target = dir.path().join("target");
        ImageSource::File(rootfs)
            .materialize(&target, true)
            .expect("materialize");
        assert!(target.join("usr/bin/python3").exists());
    }
}

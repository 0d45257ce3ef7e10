//! Recursive directory copying that preserves symlinks and permissions.

use std::path::Path;

use strata_common::error::{Result, StrataError};

/// Copies the contents of `src` into `dst`, creating `dst` if needed.
///
/// `keep` receives each path relative to `src` and decides whether the
/// entry (and, for directories, everything below it) is copied.
/// Symlinks are recreated, not followed.
///
/// # Errors
///
/// Returns an error if any entry cannot be read or written.
pub fn copy_tree(src: &Path, dst: &Path, keep: &dyn Fn(&Path) -> bool) -> Result<u64> {
    std::fs::create_dir_all(dst).map_err(|e| StrataError::io(dst, e))?;
    copy_dir(src, dst, Path::new(""), keep)
}

fn copy_dir(
    src_root: &Path,
    dst_root: &Path,
    rel: &Path,
    keep: &dyn Fn(&Path) -> bool,
) -> Result<u64> {
    let dir = src_root.join(rel);
    let mut names: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| StrataError::io(&dir, e))?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()
        .map_err(|e| StrataError::io(&dir, e))?;
    names.sort();

    let mut copied = 0;
    for name in names {
        let child = rel.join(&name);
        if !keep(&child) {
            tracing::trace!(path = %child.display(), "skipped");
            continue;
        }
        copied += copy_entry(&src_root.join(&child), &dst_root.join(&child))?;
        if src_root.join(&child).symlink_metadata().is_ok_and(|m| m.is_dir()) {
            copied += copy_dir(src_root, dst_root, &child, keep)?;
        }
    }
    Ok(copied)
}

/// Copies a single file, symlink, or directory node (not its children).
///
/// Returns the number of regular files copied (0 or 1).
///
/// # Errors
///
/// Returns an error if the source cannot be read or the target written.
pub fn copy_entry(src: &Path, dst: &Path) -> Result<u64> {
    let meta = std::fs::symlink_metadata(src).map_err(|e| StrataError::io(src, e))?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StrataError::io(parent, e))?;
    }

    if meta.file_type().is_symlink() {
        let link = std::fs::read_link(src).map_err(|e| StrataError::io(src, e))?;
        if std::fs::symlink_metadata(dst).is_ok() {
            std::fs::remove_file(dst).map_err(|e| StrataError::io(dst, e))?;
        }
        make_symlink(&link, dst)?;
        Ok(0)
    } else if meta.is_dir() {
        std::fs::create_dir_all(dst).map_err(|e| StrataError::io(dst, e))?;
        std::fs::set_permissions(dst, meta.permissions()).map_err(|e| StrataError::io(dst, e))?;
        Ok(0)
    } else {
        let _ = std::fs::copy(src, dst).map_err(|e| StrataError::io(dst, e))?;
        Ok(1)
    }
}

#[cfg(unix)]
fn make_symlink(link: &Path, dst: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, dst).map_err(|e| StrataError::io(dst, e))
}

#[cfg(not(unix))]
fn make_symlink(_link: &Path, dst: &Path) -> Result<()> {
    Err(StrataError::Config {
        message: format!("symlinks are not supported on this platform: {}", dst.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("pkg/sub")).expect("mkdir");
        std::fs::write(src.join("main.py"), b"main").expect("write");
        std::fs::write(src.join("pkg/sub/mod.py"), b"mod").expect("write");

        let dst = dir.path().join("dst");
        let copied = copy_tree(&src, &dst, &|_| true).expect("copy");
        assert_eq!(copied, 2);
        assert_eq!(std::fs::read(dst.join("pkg/sub/mod.py")).expect("read"), b"mod");
    }

    #[test]
    fn filter_prunes_whole_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join(".git/objects")).expect("mkdir");
        std::fs::write(src.join(".git/objects/x"), b"x").expect("write");
        std::fs::write(src.join("main.py"), b"main").expect("write");

        let dst = dir.path().join("dst");
        let _ = copy_tree(&src, &dst, &|p| !p.starts_with(".git")).expect("copy");
        assert!(dst.join("main.py").exists());
        assert!(!dst.join(".git").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_recreated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).expect("mkdir");
        std::os::unix::fs::symlink("python3.12", src.join("python3")).expect("symlink");

        let dst = dir.path().join("dst");
        let _ = copy_tree(&src, &dst, &|_| true).expect("copy");
        let link = std::fs::read_link(dst.join("python3")).expect("read_link");
        assert_eq!(link, Path::new("python3.12"));
    }
}

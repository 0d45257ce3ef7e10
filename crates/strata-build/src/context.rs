//! Build context handling: ignore rules and copying into the rootfs.

use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use strata_common::constants::{ALWAYS_IGNORED, IGNORE_FILE};
use strata_common::error::StrataError;
use strata_image::tree::{copy_entry, copy_tree};

use crate::error::{BuildError, Result};

/// Patterns deciding which context paths are not sent into the image.
///
/// Patterns follow gitignore glob syntax, except that every pattern is
/// anchored at the context root as Docker does: `*.log` matches
/// `debug.log` but not `logs/debug.log`. A pattern that matches a
/// directory excludes everything below it. Later patterns override earlier
/// ones, and `!pattern` re-includes.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    matcher: Gitignore,
    count: usize,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            matcher: Gitignore::empty(),
            count: 0,
        }
    }
}

impl IgnoreRules {
    /// Parses ignore-file text.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::Config` naming the line of an invalid glob.
    pub fn parse(text: &str) -> Result<Self> {
        let mut builder = GitignoreBuilder::new("");
        let mut count = 0;
        for (number, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let pattern = anchored(trimmed);
            let _ = builder.add_line(None, &pattern).map_err(|e| StrataError::Config {
                message: format!("{IGNORE_FILE} line {}: {e}", number + 1),
            })?;
            count += 1;
        }
        let matcher = builder.build().map_err(|e| StrataError::Config {
            message: format!("{IGNORE_FILE}: {e}"),
        })?;
        Ok(Self { matcher, count })
    }

    /// Loads the ignore file of a context directory, if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or holds an
    /// invalid pattern.
    pub fn load(context_dir: &Path) -> Result<Self> {
        let path = context_dir.join(IGNORE_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| StrataError::io(&path, e))?;
        let rules = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), rules = rules.count, "loaded ignore file");
        Ok(rules)
    }

    /// Returns `true` if the context-relative `path` must not be copied.
    ///
    /// `is_dir` tells whether `path` itself is a directory; its ancestors
    /// are always matched as directories.
    #[must_use]
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let always = path.components().any(|c| match c {
            Component::Normal(s) => s.to_str().is_some_and(|s| ALWAYS_IGNORED.contains(&s)),
            _ => false,
        });
        if always {
            return true;
        }
        if self.count == 0 || path.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }
}

/// Roots a pattern at the context directory unless it already starts
/// with `/` or `**`.
fn anchored(line: &str) -> String {
    let (bang, pattern) = match line.strip_prefix('!') {
        Some(rest) => ("!", rest.trim_start()),
        None => ("", line),
    };
    let pattern = pattern.trim_start_matches("./");
    if pattern.starts_with('/') || pattern.starts_with("**") {
        format!("{bang}{pattern}")
    } else {
        format!("{bang}/{pattern}")
    }
}

/// Normalizes a context-relative source, refusing paths that escape it.
fn context_relative(source: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(source.trim_start_matches('/')).components() {
        match component {
            Component::Normal(s) => out.push(s),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Copies `sources` from the build context into `dest` inside `rootfs`.
///
/// Directory sources have their contents copied into `dest`. A single
/// file source is copied to `dest` itself unless `dest` ends with `/`.
/// Returns the number of regular files copied.
///
/// # Errors
///
/// Returns `BuildError::MissingSource` for an absent or escaping source,
/// and I/O errors from copying.
pub fn copy_context(
    context_dir: &Path,
    sources: &[String],
    rootfs: &Path,
    dest: &str,
    rules: &IgnoreRules,
) -> Result<u64> {
    let into_dir = dest.ends_with('/') || sources.len() > 1;
    let target = rootfs.join(dest.trim_start_matches('/'));
    let mut copied = 0;

    for source in sources {
        let missing = || BuildError::MissingSource {
            path: PathBuf::from(source),
            origin: format!("build context {}", context_dir.display()),
        };
        let rel = context_relative(source).ok_or_else(missing)?;
        let src = context_dir.join(&rel);
        let meta = std::fs::symlink_metadata(&src).map_err(|_| missing())?;

        if meta.is_dir() {
            let keep = |child: &Path| {
                let is_dir = std::fs::symlink_metadata(src.join(child)).is_ok_and(|m| m.is_dir());
                !rules.is_ignored(&rel.join(child), is_dir)
            };
            copied += copy_tree(&src, &target, &keep)?;
        } else if rules.is_ignored(&rel, false) {
            tracing::debug!(source = %rel.display(), "source excluded by ignore rules");
        } else {
            let file_target = match (into_dir, rel.file_name()) {
                (true, Some(name)) => target.join(name),
                _ => target.clone(),
            };
            copied += copy_entry(&src, &file_target)?;
        }
    }
    tracing::info!(files = copied, dest, "copied build context");
    Ok(copied)
}

//! Per-build log files.

use std::io::Write;
use std::path::{Path, PathBuf};

use strata_common::error::{Result, StrataError};
use strata_common::types::BuildId;

/// Returns the log file path for a build.
#[must_use]
pub fn log_path(logs_dir: &Path, build_id: &BuildId) -> PathBuf {
    logs_dir.join(format!("{build_id}.log"))
}

/// Reads the log of a build.
///
/// # Errors
///
/// Returns `StrataError::NotFound` if no build with that id logged
/// anything, or an I/O error if the file cannot be read.
pub fn read_logs(logs_dir: &Path, build_id: &BuildId) -> Result<String> {
    let path = log_path(logs_dir, build_id);
    if !path.exists() {
        return Err(StrataError::NotFound {
            kind: "build log",
            id: build_id.to_string(),
        });
    }
    std::fs::read_to_string(&path).map_err(|e| StrataError::io(path, e))
}

/// Appends lines to the log of a build, prefixing each with `prefix`.
///
/// Creates the log directory and file if they do not exist.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created or written.
pub fn append_log(logs_dir: &Path, build_id: &BuildId, prefix: &str, text: &str) -> Result<()> {
    std::fs::create_dir_all(logs_dir).map_err(|e| StrataError::io(logs_dir, e))?;
    let path = log_path(logs_dir, build_id);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StrataError::io(&path, e))?;
    for line in text.lines() {
        writeln!(file, "{prefix} {line}").map_err(|e| StrataError::io(&path, e))?;
    }
    Ok(())
}

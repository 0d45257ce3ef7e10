//! Command execution inside a staging root filesystem.
//!
//! The [`CommandRunner`] trait is the only seam between the provisioner and
//! the host. [`ChrootRunner`] executes commands with `chroot(8)`; tests use
//! scripted runners that simulate command effects on the rootfs.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use strata_common::constants::DEFAULT_ROOTFS_PATH;
use strata_recipe::shell::RESERVED_WORDS;

use crate::error::{BuildError, Result};

/// Shell builtins that never resolve on `PATH`.
const SHELL_BUILTINS: &[&str] = &[
    ".", ":", "[", "alias", "break", "cd", "command", "continue", "echo", "eval", "exec", "exit",
    "export", "false", "printf", "pwd", "read", "return", "set", "shift", "source", "test",
    "trap", "true", "type", "ulimit", "umask", "unset", "wait",
];

/// A command to run inside the rootfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program and arguments, already wrapped in a shell for shell form.
    pub argv: Vec<String>,
    /// Absolute working directory inside the rootfs.
    pub workdir: String,
    /// Complete environment; nothing is inherited from the host.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// `PATH` the command runs with.
    #[must_use]
    pub fn search_path(&self) -> &str {
        self.env
            .get("PATH")
            .map_or(DEFAULT_ROOTFS_PATH, String::as_str)
    }
}

/// Captured result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if terminated by a signal.
    pub status: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes commands against a root filesystem.
///
/// Implementors must not mutate anything outside `rootfs`.
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` with `rootfs` as the filesystem root.
    ///
    /// A command that runs and exits non-zero is reported through
    /// [`CommandOutput::status`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be started at all.
    fn run(&self, rootfs: &Path, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Human-readable runner name for logs.
    fn name(&self) -> &'static str;
}

/// Runs commands on the host with `chroot(8)`.
#[derive(Debug, Clone)]
pub struct ChrootRunner {
    chroot: PathBuf,
}

impl ChrootRunner {
    /// Locates `chroot` on the host.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Unsupported` if `chroot` is not installed or
    /// the host is not Linux.
    #[cfg(target_os = "linux")]
    pub fn detect() -> Result<Self> {
        let chroot = which::which("chroot").map_err(|e| BuildError::Unsupported {
            message: format!("chroot not found on the host: {e}"),
        })?;
        tracing::debug!(chroot = %chroot.display(), "host command runner");
        Ok(Self { chroot })
    }

    /// Locates `chroot` on the host.
    ///
    /// On non-Linux platforms, returns an error because building needs
    /// a Linux kernel to run the image's binaries.
    ///
    /// # Errors
    ///
    /// Always returns an error on non-Linux platforms.
    #[cfg(not(target_os = "linux"))]
    pub fn detect() -> Result<Self> {
        Err(BuildError::Unsupported {
            message: "running build commands requires Linux".into(),
        })
    }
}

impl CommandRunner for ChrootRunner {
    fn run(&self, rootfs: &Path, spec: &CommandSpec) -> Result<CommandOutput> {
        if spec.argv.is_empty() {
            return Err(BuildError::InvalidPlan {
                message: "empty command".into(),
            });
        }
        tracing::debug!(argv = ?spec.argv, workdir = %spec.workdir, "chroot exec");

        // `cd` happens inside the chroot; the workdir and argv travel as
        // positional parameters so nothing needs quoting.
        let output = std::process::Command::new(&self.chroot)
            .arg(rootfs)
            .args(["/bin/sh", "-c", r#"cd "$1" && shift && exec "$@""#, "sh"])
            .arg(&spec.workdir)
            .args(&spec.argv)
            .env_clear()
            .envs(&spec.env)
            .env("PATH", spec.search_path())
            .output()
            .map_err(|e| strata_common::error::StrataError::io(&self.chroot, e))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &'static str {
        "chroot"
    }
}

/// Finds `program` on the rootfs `PATH` (or at its literal path when it
/// contains a `/`), returning the host path of the executable.
///
/// Shell builtins resolve to `None` but are not errors; use
/// [`require_programs`] to check a step's tools.
#[must_use]
pub fn resolve_program(rootfs: &Path, program: &str, spec: &CommandSpec) -> Option<PathBuf> {
    let cwd = rootfs.join(spec.workdir.trim_start_matches('/'));
    if program.contains('/') {
        let inside = if program.starts_with('/') {
            rootfs.join(program.trim_start_matches('/'))
        } else {
            cwd.join(program)
        };
        return inside.symlink_metadata().is_ok().then_some(inside);
    }
    let dirs: Vec<PathBuf> = spec
        .search_path()
        .split(':')
        .filter(|d| d.starts_with('/'))
        .map(|d| rootfs.join(d.trim_start_matches('/')))
        .collect();
    let joined: OsString = std::env::join_paths(dirs).ok()?;
    which::which_in(program, Some(joined), cwd).ok()
}

/// Checks that every program in `programs` resolves, skipping shell
/// builtins and reserved words.
///
/// # Errors
///
/// Returns `BuildError::ToolNotFound` for the first program that does not.
pub fn require_programs(rootfs: &Path, programs: &[String], spec: &CommandSpec) -> Result<()> {
    for program in programs {
        let name = program.as_str();
        if SHELL_BUILTINS.contains(&name) || RESERVED_WORDS.contains(&name) {
            continue;
        }
        if resolve_program(rootfs, program, spec).is_none() {
            return Err(BuildError::ToolNotFound {
                program: program.clone(),
                path: spec.search_path().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CommandSpec {
        CommandSpec {
            argv: vec!["uv".into(), "sync".into()],
            workdir: "/app".into(),
            env: BTreeMap::new(),
        }
    }

    #[cfg(unix)]
    fn executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, b"#!/bin/sh\n").expect("write");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[test]
    fn default_search_path() {
        assert_eq!(spec().search_path(), DEFAULT_ROOTFS_PATH);
        let mut custom = spec();
        let _ = custom.env.insert("PATH".into(), "/app/.venv/bin:/bin".into());
        assert_eq!(custom.search_path(), "/app/.venv/bin:/bin");
    }

    #[cfg(unix)]
    #[test]
    fn program_resolves_inside_rootfs_only() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("app")).expect("mkdir");
        assert!(resolve_program(root.path(), "uv", &spec()).is_none());

        executable(&root.path().join("bin/uv"));
        let found = resolve_program(root.path(), "uv", &spec()).expect("resolves");
        assert!(found.starts_with(root.path()));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_program_paths() {
        let root = tempfile::tempdir().expect("tempdir");
        executable(&root.path().join("usr/local/bin/python3"));
        assert!(resolve_program(root.path(), "/usr/local/bin/python3", &spec()).is_some());
        assert!(resolve_program(root.path(), "/usr/bin/python3", &spec()).is_none());
    }

    #[test]
    fn missing_tool_is_reported_with_path() {
        let root = tempfile::tempdir().expect("tempdir");
        let err = require_programs(root.path(), &["cd".into(), "uv".into()], &spec()).unwrap_err();
        match err {
            BuildError::ToolNotFound { program, path } => {
                assert_eq!(program, "uv");
                assert_eq!(path, DEFAULT_ROOTFS_PATH);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn keywords_and_local_scripts_resolve() {
        let root = tempfile::tempdir().expect("tempdir");
        executable(&root.path().join("app/setup.sh"));
        let programs = ["if".to_string(), "fi".into(), "./setup.sh".into()];
        require_programs(root.path(), &programs, &spec()).expect("resolves");

        let err = require_programs(root.path(), &["./missing.sh".into()], &spec()).unwrap_err();
        assert!(matches!(err, BuildError::ToolNotFound { program, .. } if program == "./missing.sh"));
    }

    #[test]
    fn output_status_helpers() {
        assert!(CommandOutput::ok("done").success());
        assert!(!CommandOutput::failed(100, "E: nope").success());
        assert!(!CommandOutput::default().success());
    }
}

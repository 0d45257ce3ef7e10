//! Errors raised while executing a build plan.

use std::path::PathBuf;

use strata_common::error::StrataError;
use strata_lock::LockError;
use thiserror::Error;

/// Reasons a build stops.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A step failed; the build was aborted at this point.
    #[error("step {index} (line {line}) failed: {instruction}")]
    StepFailed {
        /// 0-based step index.
        index: usize,
        /// Recipe line of the step.
        line: usize,
        /// Instruction text as written.
        instruction: String,
        /// What went wrong.
        #[source]
        source: Box<BuildError>,
    },

    /// A program invoked by a step does not exist in the rootfs.
    #[error("`{program}` not found on PATH ({path}) inside the image")]
    ToolNotFound {
        /// Program name.
        program: String,
        /// `PATH` that was searched.
        path: String,
    },

    /// A command exited unsuccessfully.
    #[error("`{program}` exited with {}:\n{stderr}", status_text(*.status))]
    CommandFailed {
        /// Program that was run.
        program: String,
        /// Exit code, or `None` if terminated by a signal.
        status: Option<i32>,
        /// Standard error, verbatim.
        stderr: String,
    },

    /// A file named by a copy step does not exist.
    #[error("copy source not found: {path} (from {origin})")]
    MissingSource {
        /// Missing path.
        path: PathBuf,
        /// Image or build context the path was looked up in.
        origin: String,
    },

    /// The plan cannot be built as given.
    #[error("invalid build plan: {message}")]
    InvalidPlan {
        /// Description of the problem.
        message: String,
    },

    /// Commands cannot be executed on this host.
    #[error("command execution unavailable: {message}")]
    Unsupported {
        /// Description of the limitation.
        message: String,
    },

    /// The lockfile protocol refused synchronization.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A shared error (I/O, images, storage).
    #[error(transparent)]
    Common(#[from] StrataError),
}

fn status_text(status: Option<i32>) -> String {
    status.map_or_else(|| "a signal".to_string(), |code| format!("status {code}"))
}

impl BuildError {
    /// Wraps `self` as the failure of a step.
    #[must_use]
    pub fn at_step(self, index: usize, line: usize, instruction: &str) -> Self {
        Self::StepFailed {
            index,
            line,
            instruction: instruction.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping step wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Convenience alias for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failure_carries_stderr_verbatim() {
        let err = BuildError::CommandFailed {
            program: "apt-get".into(),
            status: Some(100),
            stderr: "E: Unable to locate package ffmpeg-nope".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("status 100"), "got: {msg}");
        assert!(msg.contains("E: Unable to locate package ffmpeg-nope"), "got: {msg}");
    }

    #[test]
    fn signal_termination_is_reported() {
        let err = BuildError::CommandFailed {
            program: "uv".into(),
            status: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn step_wrapper_keeps_root_cause() {
        let err = BuildError::ToolNotFound {
            program: "uv".into(),
            path: "/bin".into(),
        }
        .at_step(5, 6, "RUN uv sync --locked");
        let msg = err.to_string();
        assert!(msg.contains("step 5 (line 6)"), "got: {msg}");
        assert!(matches!(err.root_cause(), BuildError::ToolNotFound { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn lock_errors_convert() {
        let err: BuildError = LockError::Stale {
            reason: "added [edge-tts]".into(),
        }
        .into();
        assert!(err.to_string().contains("lockfile is stale"));
    }
}

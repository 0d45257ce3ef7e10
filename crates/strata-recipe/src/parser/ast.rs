//! Abstract Syntax Tree for recipes.

use serde::Serialize;

/// Root node of a parsed recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    /// Instructions in source order.
    pub instructions: Vec<Located>,
}

/// An instruction together with where it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// 1-based line number.
    pub line: usize,
    /// The logical line as written.
    pub text: String,
    /// Parsed instruction.
    pub instruction: Instruction,
}

/// How a command is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandForm {
    /// JSON array, executed without a shell.
    Exec(Vec<String>),
    /// Text handed to the shell.
    Shell(String),
}

impl CommandForm {
    /// Returns `true` for an empty command (`[]` or blank text).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Exec(argv) => argv.is_empty(),
            Self::Shell(text) => text.trim().is_empty(),
        }
    }
}

/// A single recipe instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `FROM image [AS name]`.
    From {
        /// Image reference.
        image: String,
        /// Stage alias.
        alias: Option<String>,
    },
    /// `COPY [--from=image] src... dest`.
    Copy {
        /// Image to copy from; build context when absent.
        from: Option<String>,
        /// Source paths.
        sources: Vec<String>,
        /// Destination path.
        dest: String,
    },
    /// `ADD src... dest` (build context only).
    Add {
        /// Source paths.
        sources: Vec<String>,
        /// Destination path.
        dest: String,
    },
    /// `WORKDIR path`.
    Workdir(String),
    /// `ENV key=value...` or the legacy `ENV key value`.
    Env(Vec<(String, String)>),
    /// `RUN command`.
    Run(CommandForm),
    /// `CMD command`.
    Cmd(CommandForm),
    /// `ENTRYPOINT command`.
    Entrypoint(CommandForm),
}

impl Instruction {
    /// Keyword as written in recipes.
    #[must_use]
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::From { .. } => "FROM",
            Self::Copy { .. } => "COPY",
            Self::Add { .. } => "ADD",
            Self::Workdir(_) => "WORKDIR",
            Self::Env(_) => "ENV",
            Self::Run(_) => "RUN",
            Self::Cmd(_) => "CMD",
            Self::Entrypoint(_) => "ENTRYPOINT",
        }
    }
}

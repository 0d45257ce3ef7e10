//! Classification of parsed instructions into typed build steps.
//!
//! A [`BuildPlan`] is the linear, ordered sequence of steps the provisioner
//! executes. Each `RUN` is inspected to tell OS package installation and
//! locked dependency synchronization apart from arbitrary commands, and to
//! record which programs it invokes.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use strata_common::constants::DEFAULT_ROOTFS_PATH;
use strata_common::error::{Result, StrataError};
use strata_image::reference::ImageRef;

use crate::parser::ast::{CommandForm, Instruction, Recipe};
use crate::shell::{SimpleCommand, simple_commands};

/// Shell used for shell-form commands.
pub const DEFAULT_SHELL: &[&str] = &["/bin/sh", "-c"];

/// Severity of a static-analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Weakens reproducibility but does not reject the plan.
    Warning,
    /// Rejects the plan.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A static-analysis result attached to a recipe line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// How serious the finding is.
    pub severity: Severity,
    /// Recipe line, when the finding concerns one instruction.
    pub line: Option<usize>,
    /// Human-readable message.
    pub message: String,
}

impl Finding {
    /// Creates a warning.
    pub fn warning(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            line,
            message: message.into(),
        }
    }

    /// Creates an error.
    pub fn error(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            line,
            message: message.into(),
        }
    }

    /// Returns `true` for error findings.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}: {}", self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// OS package manager recognised in `RUN` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian/Ubuntu `apt-get` / `apt`.
    Apt,
    /// Alpine `apk`.
    Apk,
}

impl PackageManager {
    /// Separator between a package name and its pinned version.
    #[must_use]
    pub const fn pin_separators(self) -> &'static [char] {
        match self {
            Self::Apt => &['='],
            Self::Apk => &['=', '~'],
        }
    }
}

/// How `uv sync` treats the lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// `--locked`: fail if the lockfile is stale.
    Locked,
    /// `--frozen`: use the lockfile without checking it.
    Frozen,
    /// Neither: the lockfile may be silently re-resolved.
    Unlocked,
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Materialize the base runtime image.
    Base {
        /// Base image reference.
        image: ImageRef,
    },
    /// Copy files out of an external image.
    CopyFromImage {
        /// Source image.
        image: ImageRef,
        /// Absolute paths inside the source image.
        sources: Vec<String>,
        /// Destination in the rootfs, resolved against the working directory.
        dest: String,
    },
    /// Copy files from the build context.
    CopyContext {
        /// Context-relative sources.
        sources: Vec<String>,
        /// Destination in the rootfs, resolved against the working directory.
        dest: String,
    },
    /// Set (and create) the working directory.
    Workdir {
        /// Absolute path.
        path: String,
    },
    /// Set environment variables for later steps and the image.
    Env {
        /// Assignments in order.
        vars: Vec<(String, String)>,
    },
    /// Install OS-level packages.
    OsPackages {
        /// Package manager used.
        manager: PackageManager,
        /// Requested packages as written (`name` or `name=version`).
        packages: Vec<String>,
        /// Whether the package index is refreshed before installation.
        refreshes_index: bool,
    },
    /// Synchronize the dependency environment from the lockfile.
    LockedSync {
        /// Lockfile handling.
        mode: SyncMode,
    },
    /// Any other command.
    Run,
    /// The image's startup command.
    Entry {
        /// Final argument vector.
        argv: Vec<String>,
        /// Whether the command was written in shell form.
        shell_form: bool,
    },
}

impl StepKind {
    /// Short label used in logs and plan listings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Base { .. } => "base",
            Self::CopyFromImage { .. } => "copy-from-image",
            Self::CopyContext { .. } => "copy-context",
            Self::Workdir { .. } => "workdir",
            Self::Env { .. } => "env",
            Self::OsPackages { .. } => "os-packages",
            Self::LockedSync { .. } => "locked-sync",
            Self::Run => "run",
            Self::Entry { .. } => "entry",
        }
    }

    /// Returns `true` if the step produces a filesystem layer.
    #[must_use]
    pub const fn changes_filesystem(&self) -> bool {
        !matches!(self, Self::Env { .. } | Self::Entry { .. })
    }
}

/// One step of a build plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    /// 0-based position in the plan.
    pub index: usize,
    /// Recipe line the step comes from.
    pub line: usize,
    /// Instruction text as written.
    pub instruction: String,
    /// Typed step.
    pub kind: StepKind,
    /// Command to execute, for steps derived from `RUN`.
    pub command: Option<CommandForm>,
    /// Working directory in effect for this step.
    pub workdir: String,
    /// Environment in effect for this step.
    pub env: BTreeMap<String, String>,
    /// Basenames of the programs the step invokes.
    pub tools: Vec<String>,
}

impl PlannedStep {
    /// Tool names this step makes available to later steps.
    #[must_use]
    pub fn provides(&self) -> Vec<String> {
        match &self.kind {
            StepKind::CopyFromImage { sources, .. } => sources
                .iter()
                .filter_map(|s| s.trim_end_matches('/').rsplit('/').next())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            StepKind::OsPackages { manager, packages, .. } => packages
                .iter()
                .filter_map(|p| p.split(manager.pin_separators()).next())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First program word of the step's command, as written.
    #[must_use]
    pub fn leading_program(&self) -> Option<String> {
        let first = match self.command.as_ref()? {
            CommandForm::Exec(argv) => SimpleCommand::from_words(argv.clone()),
            CommandForm::Shell(script) => simple_commands(script).into_iter().next()?,
        };
        first.argv.into_iter().next()
    }
}

/// The startup command recorded in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    /// Argument vector.
    pub argv: Vec<String>,
    /// Whether it was written in shell form.
    pub shell_form: bool,
    /// Recipe line.
    pub line: usize,
}

/// A classified, ordered build plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    /// Base image, from the first `FROM`.
    pub base: Option<ImageRef>,
    /// Steps in execution order.
    pub steps: Vec<PlannedStep>,
    /// Startup command, from the last `CMD`/`ENTRYPOINT`.
    pub entry: Option<EntryPoint>,
    /// Final working directory.
    pub workdir: String,
    /// Final environment.
    pub env: BTreeMap<String, String>,
    /// Static-analysis findings.
    pub findings: Vec<Finding>,
}

impl BuildPlan {
    /// Returns `true` if any finding is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(Finding::is_error)
    }

    /// Error findings.
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_error())
    }

    /// Warning findings.
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.is_error())
    }

    /// Rejects the plan if it has errors, or any finding when `strict`.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::Config` listing the offending findings.
    pub fn enforce(&self, strict: bool) -> Result<()> {
        let blocking: Vec<String> = self
            .findings
            .iter()
            .filter(|f| strict || f.is_error())
            .map(ToString::to_string)
            .collect();
        if blocking.is_empty() {
            return Ok(());
        }
        Err(StrataError::Config {
            message: format!("recipe rejected:\n  {}", blocking.join("\n  ")),
        })
    }
}

/// Resolves `path` against `base`, normalizing `.` and `..` lexically.
///
/// A trailing `/` on `path` is preserved so callers can tell directory
/// destinations apart.
#[must_use]
pub fn resolve_path(base: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{path}", base.trim_end_matches('/'))
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = format!("/{}", parts.join("/"));
    if (path.ends_with('/') || path.ends_with("/.") || path == ".") && out != "/" {
        out.push('/');
    }
    out
}

/// Mutable state threaded through classification.
struct Classifier {
    workdir: String,
    env: BTreeMap<String, String>,
    index_refreshed: bool,
    steps: Vec<PlannedStep>,
    findings: Vec<Finding>,
    base: Option<ImageRef>,
    entry: Option<EntryPoint>,
}

impl Classifier {
    fn push(
        &mut self,
        line: usize,
        text: &str,
        kind: StepKind,
        command: Option<CommandForm>,
        tools: Vec<String>,
    ) {
        let step = PlannedStep {
            index: self.steps.len(),
            line,
            instruction: text.to_string(),
            kind,
            command,
            workdir: self.workdir.clone(),
            env: self.env.clone(),
            tools,
        };
        self.steps.push(step);
    }

    fn classify_run(&mut self, line: usize, text: &str, command: CommandForm) {
        let commands = match &command {
            CommandForm::Shell(script) => simple_commands(script),
            CommandForm::Exec(argv) => vec![SimpleCommand::from_words(argv.clone())],
        };
        let tools = programs(&commands);

        let mut install: Option<(PackageManager, Vec<String>, bool)> = None;
        let mut sync: Option<SyncMode> = None;
        for cmd in &commands {
            if refreshes_index(cmd) {
                self.index_refreshed = true;
            }
            if let Some((manager, packages)) = package_install(cmd) {
                let refreshed = self.index_refreshed || apk_fetches_index(cmd);
                match &mut install {
                    Some((_, all, _)) => all.extend(packages),
                    None => install = Some((manager, packages, refreshed)),
                }
            }
            if let Some(mode) = sync_mode(cmd, &self.env) {
                sync = Some(mode);
            }
        }

        let kind = match (install, sync) {
            (Some((manager, packages, refreshes_index)), sync) => {
                if sync.is_some() {
                    self.findings.push(Finding::error(
                        Some(line),
                        "OS package installation and dependency synchronization share one RUN; \
                         split them so a package failure stops the build before synchronization",
                    ));
                }
                StepKind::OsPackages {
                    manager,
                    packages,
                    refreshes_index,
                }
            }
            (None, Some(mode)) => StepKind::LockedSync { mode },
            (None, None) => StepKind::Run,
        };
        self.push(line, text, kind, Some(command), tools);
    }

    fn classify_entry(&mut self, line: usize, text: &str, command: &CommandForm) {
        let (argv, shell_form, tools) = match command {
            CommandForm::Exec(argv) => {
                let tools = programs(&[SimpleCommand::from_words(argv.clone())]);
                (argv.clone(), false, tools)
            }
            CommandForm::Shell(script) => {
                let mut argv: Vec<String> = DEFAULT_SHELL.iter().map(|s| (*s).to_string()).collect();
                argv.push(script.clone());
                (argv, true, programs(&simple_commands(script)))
            }
        };
        self.entry = Some(EntryPoint {
            argv: argv.clone(),
            shell_form,
            line,
        });
        self.push(line, text, StepKind::Entry { argv, shell_form }, None, tools);
    }
}

fn programs(commands: &[SimpleCommand]) -> Vec<String> {
    let mut tools: Vec<String> = Vec::new();
    for name in commands.iter().filter_map(SimpleCommand::program) {
        if !tools.iter().any(|t| t == name) {
            tools.push(name.to_string());
        }
    }
    tools
}

fn refreshes_index(cmd: &SimpleCommand) -> bool {
    matches!(cmd.program(), Some("apt-get" | "apt" | "apk")) && subcommand(cmd) == Some("update")
}

/// First argument that is neither an option nor an option's value.
fn subcommand(cmd: &SimpleCommand) -> Option<&str> {
    let mut args = cmd.args().iter();
    while let Some(arg) = args.next() {
        if VALUED_OPTIONS.contains(&arg.as_str()) {
            let _ = args.next();
        } else if !arg.starts_with('-') {
            return Some(arg);
        }
    }
    None
}

/// Expands `$NAME`, `${NAME}`, `${NAME:-word}` and `${NAME:+word}` in an
/// `ENV` value against the environment in effect before the instruction.
///
/// An unset `PATH` expands to the default rootfs path; other unset names
/// expand to nothing. `\$` is a literal dollar sign.
fn expand_vars(value: &str, env: &BTreeMap<String, String>) -> String {
    let lookup = |name: &str| -> Option<String> {
        env.get(name)
            .cloned()
            .or_else(|| (name == "PATH").then(|| DEFAULT_ROOTFS_PATH.to_string()))
    };
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('\\', Some('$')) => {
                out.push('$');
                let _ = chars.next();
            }
            ('$', Some('{')) => {
                let _ = chars.next();
                let inner: String = chars.by_ref().take_while(|&ch| ch != '}').collect();
                let expanded = if let Some((name, word)) = inner.split_once(":-") {
                    lookup(name).filter(|v| !v.is_empty()).unwrap_or_else(|| word.to_string())
                } else if let Some((name, word)) = inner.split_once(":+") {
                    lookup(name)
                        .filter(|v| !v.is_empty())
                        .map(|_| word.to_string())
                        .unwrap_or_default()
                } else {
                    lookup(&inner).unwrap_or_default()
                };
                out.push_str(&expanded);
            }
            ('$', Some(next)) if next.is_ascii_alphabetic() || next == '_' => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if !(ch.is_ascii_alphanumeric() || ch == '_') {
                        break;
                    }
                    name.push(ch);
                    let _ = chars.next();
                }
                out.push_str(&lookup(&name).unwrap_or_default());
            }
            _ => out.push(c),
        }
    }
    out
}

fn apk_fetches_index(cmd: &SimpleCommand) -> bool {
    cmd.program() == Some("apk")
        && cmd
            .args()
            .iter()
            .any(|a| matches!(a.as_str(), "--no-cache" | "--update" | "-U" | "--update-cache"))
}

/// Options of the install subcommands that consume the following word.
const VALUED_OPTIONS: &[&str] = &[
    "-o",
    "-t",
    "--option",
    "--target-release",
    "--repository",
    "-X",
    "--virtual",
    "--root",
    "-p",
];

fn package_install(cmd: &SimpleCommand) -> Option<(PackageManager, Vec<String>)> {
    let (manager, verb) = match cmd.program()? {
        "apt-get" | "apt" => (PackageManager::Apt, "install"),
        "apk" => (PackageManager::Apk, "add"),
        _ => return None,
    };
    let args = cmd.args();
    let pos = args.iter().position(|a| a == verb)?;

    let mut packages = Vec::new();
    let mut skip_next = false;
    for (i, arg) in args.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUED_OPTIONS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if i > pos && !arg.starts_with('-') {
            packages.push(arg.clone());
        }
    }
    Some((manager, packages))
}

fn env_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn sync_mode(cmd: &SimpleCommand, env: &BTreeMap<String, String>) -> Option<SyncMode> {
    if cmd.program() != Some("uv") || cmd.args().first().map(String::as_str) != Some("sync") {
        return None;
    }
    let lookup = |name: &str| cmd.sets(name).or_else(|| env.get(name).map(String::as_str));
    let has = |flag: &str| cmd.args().iter().any(|a| a == flag);

    Some(if has("--locked") || env_flag(lookup("UV_LOCKED")) {
        SyncMode::Locked
    } else if has("--frozen") || env_flag(lookup("UV_FROZEN")) {
        SyncMode::Frozen
    } else {
        SyncMode::Unlocked
    })
}

fn image_ref(line: usize, raw: &str) -> Result<ImageRef> {
    ImageRef::parse(raw).map_err(|e| StrataError::Parse {
        line,
        message: e.to_string(),
    })
}

/// Turns a parsed recipe into an ordered build plan.
///
/// Findings that can only be seen during classification (such as a `RUN`
/// mixing package installation with synchronization) are recorded on the
/// plan; the rule checks in [`crate::parser::validator`] add the rest.
///
/// # Errors
///
/// Returns `StrataError::Parse` if an image reference is malformed.
pub fn classify(recipe: &Recipe) -> Result<BuildPlan> {
    let mut c = Classifier {
        workdir: "/".into(),
        env: BTreeMap::new(),
        index_refreshed: false,
        steps: Vec::new(),
        findings: Vec::new(),
        base: None,
        entry: None,
    };

    for located in &recipe.instructions {
        let (line, text) = (located.line, located.text.as_str());
        match &located.instruction {
            Instruction::From { image, .. } => {
                let image = image_ref(line, image)?;
                if c.base.is_none() {
                    c.base = Some(image.clone());
                }
                c.push(line, text, StepKind::Base { image }, None, Vec::new());
            }
            Instruction::Copy {
                from: Some(from),
                sources,
                dest,
            } => {
                let kind = StepKind::CopyFromImage {
                    image: image_ref(line, from)?,
                    sources: sources.iter().map(|s| resolve_path("/", s)).collect(),
                    dest: resolve_path(&c.workdir, dest),
                };
                c.push(line, text, kind, None, Vec::new());
            }
            Instruction::Copy {
                from: None,
                sources,
                dest,
            }
            | Instruction::Add { sources, dest } => {
                let kind = StepKind::CopyContext {
                    sources: sources.clone(),
                    dest: resolve_path(&c.workdir, dest),
                };
                c.push(line, text, kind, None, Vec::new());
            }
            Instruction::Workdir(path) => {
                let resolved = resolve_path(&c.workdir, path);
                c.workdir = match resolved.trim_end_matches('/') {
                    "" => "/".to_string(),
                    trimmed => trimmed.to_string(),
                };
                let kind = StepKind::Workdir {
                    path: c.workdir.clone(),
                };
                c.push(line, text, kind, None, Vec::new());
            }
            Instruction::Env(vars) => {
                let vars: Vec<(String, String)> = vars
                    .iter()
                    .map(|(k, v)| (k.clone(), expand_vars(v, &c.env)))
                    .collect();
                c.env.extend(vars.iter().cloned());
                let kind = StepKind::Env { vars };
                c.push(line, text, kind, None, Vec::new());
            }
            Instruction::Run(command) => c.classify_run(line, text, command.clone()),
            Instruction::Cmd(command) | Instruction::Entrypoint(command) => {
                c.classify_entry(line, text, command);
            }
        }
    }

    tracing::debug!(steps = c.steps.len(), "classified recipe");
    Ok(BuildPlan {
        base: c.base,
        steps: c.steps,
        entry: c.entry,
        workdir: c.workdir,
        env: c.env,
        findings: c.findings,
    })
}

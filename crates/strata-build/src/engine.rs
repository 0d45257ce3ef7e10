//! Build engine that turns a validated plan into a stored image.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use strata_common::config::StrataConfig;
use strata_common::constants::MAX_IMAGE_LAYERS;
use strata_common::error::StrataError;
use strata_common::types::BuildId;
use strata_image::layer::write_layer;
use strata_image::manifest::{ImageConfig, ImageManifest, LayerRecord, LockRecord};
use strata_image::reference::ImageRef;
use strata_image::registry::{ImageCatalog, ImageEntry};
use strata_image::resolve::ImageResolver;
use strata_image::storage::StorageBackend;
use strata_image::tree::{copy_entry, copy_tree};
use strata_recipe::parser::ast::CommandForm;
use strata_recipe::{BuildPlan, PlannedStep, StepKind};

use crate::context::{IgnoreRules, copy_context};
use crate::error::{BuildError, Result};
use crate::logs;
use crate::runner::{ChrootRunner, CommandRunner, CommandSpec, require_programs};
use crate::snapshot::Snapshot;

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Identifier of this build invocation.
    pub build_id: BuildId,
    /// Stored manifest of the new image.
    pub manifest: ImageManifest,
    /// Log file holding the output of every step.
    pub log_path: PathBuf,
    /// Catalog entry previously registered under the same name.
    pub replaced: Option<ImageEntry>,
}

/// Mutable state threaded through the steps of one build.
struct BuildState {
    rootfs: PathBuf,
    scratch: PathBuf,
    layers: Vec<LayerRecord>,
    lock: Option<LockRecord>,
    runtime: Option<String>,
    /// Tool names copied in from other images.
    provided: BTreeSet<String>,
}

/// Executes build plans and records the resulting images.
pub struct Provisioner {
    config: StrataConfig,
    runner: Box<dyn CommandRunner>,
    storage: StorageBackend,
    catalog: ImageCatalog,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("data_dir", &self.config.data_dir)
            .field("runner", &self.runner.name())
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Creates a provisioner that runs commands on the host via `chroot`.
    ///
    /// # Errors
    ///
    /// Returns an error if no host runner is available or the data
    /// directory cannot be initialized.
    pub fn new(config: StrataConfig) -> Result<Self> {
        let runner = ChrootRunner::detect()?;
        Self::with_runner(config, Box::new(runner))
    }

    /// Creates a provisioner with a custom command runner.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be initialized.
    pub fn with_runner(config: StrataConfig, runner: Box<dyn CommandRunner>) -> Result<Self> {
        let storage = StorageBackend::open(&config.data_dir)?;
        let catalog = ImageCatalog::open(&config.data_dir)?;
        tracing::debug!(data_dir = %config.data_dir.display(), runner = runner.name(), "provisioner ready");
        Ok(Self {
            config,
            runner,
            storage,
            catalog,
        })
    }

    /// Returns the image catalog.
    #[must_use]
    pub const fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    /// Returns the layer and manifest store.
    #[must_use]
    pub const fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    /// Builds `plan` against `context_dir` and registers the image as `name`.
    ///
    /// Steps run strictly in order; the first failing step aborts the
    /// build and the staging root is discarded.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidPlan` if the plan carries error
    /// findings or no base, and `BuildError::StepFailed` wrapping the
    /// cause of the first failing step.
    pub fn build(&self, plan: &BuildPlan, context_dir: &Path, name: &str) -> Result<BuildOutcome> {
        plan.enforce(false)?;
        let base = plan.base.as_ref().ok_or_else(|| BuildError::InvalidPlan {
            message: "no base image".into(),
        })?;

        let build_id = BuildId::generate();
        let span = tracing::info_span!("build", id = %build_id, image = name);
        let _enter = span.enter();

        let tmp_root = self.config.data_dir.join("tmp");
        std::fs::create_dir_all(&tmp_root).map_err(|e| StrataError::io(&tmp_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(&tmp_root)
            .map_err(|e| StrataError::io(&tmp_root, e))?;

        let mut state = BuildState {
            rootfs: staging.path().join("rootfs"),
            scratch: staging.path().join("scratch"),
            layers: Vec::new(),
            lock: None,
            runtime: runtime_version(base),
            provided: plan
                .steps
                .iter()
                .filter(|s| matches!(s.kind, StepKind::CopyFromImage { .. }))
                .flat_map(PlannedStep::provides)
                .collect(),
        };
        for dir in [&state.rootfs, &state.scratch] {
            std::fs::create_dir_all(dir).map_err(|e| StrataError::io(dir, e))?;
        }
        let rules = IgnoreRules::load(context_dir)?;
        let logs_dir = self.config.logs_dir();

        tracing::info!(steps = plan.steps.len(), context = %context_dir.display(), "starting build");
        for step in &plan.steps {
            logs::append_log(
                &logs_dir,
                &build_id,
                &format!("[{}]", step.index),
                &format!("{} {}", step.kind.label(), step.instruction),
            )?;
            self.run_step(step, context_dir, &rules, &mut state, &build_id)
                .map_err(|e| {
                    tracing::error!(step = step.index, line = step.line, error = %e, "step failed");
                    let _ = logs::append_log(&logs_dir, &build_id, &format!("[{}] error:", step.index), &e.to_string());
                    e.at_step(step.index, step.line, &step.instruction)
                })?;
        }

        let manifest = self.finish(plan, base, name, state)?;
        let replaced = self.catalog.register(ImageEntry {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            base: manifest.base.clone(),
            layers: manifest.layers.iter().map(|l| l.digest.to_string()).collect(),
            size_bytes: manifest.size_bytes(),
            created_at: manifest.created_at.clone(),
        })?;
        if let Some(old) = &replaced {
            tracing::info!(name, previous = %old.id.short(), "replaced catalog entry");
        }
        tracing::info!(id = %manifest.id.short(), layers = manifest.layers.len(), "build complete");

        Ok(BuildOutcome {
            log_path: logs::log_path(&logs_dir, &build_id),
            build_id,
            manifest,
            replaced,
        })
    }

    fn run_step(
        &self,
        step: &PlannedStep,
        context_dir: &Path,
        rules: &IgnoreRules,
        state: &mut BuildState,
        build_id: &BuildId,
    ) -> Result<()> {
        tracing::info!(step = step.index, kind = step.kind.label(), "{}", step.instruction);
        let before = if step.kind.changes_filesystem() {
            Some(Snapshot::capture(&state.rootfs)?)
        } else {
            None
        };

        match &step.kind {
            StepKind::Base { image } => {
                ImageResolver::new(&self.config, &self.storage, &self.catalog)
                    .materialize(image, &state.rootfs)?;
            }
            StepKind::CopyFromImage {
                image,
                sources,
                dest,
            } => self.copy_from_image(image, sources, dest, state)?,
            StepKind::CopyContext { sources, dest } => {
                let _ = copy_context(context_dir, sources, &state.rootfs, dest, rules)?;
            }
            StepKind::Workdir { path } => {
                let dir = state.rootfs.join(path.trim_start_matches('/'));
                std::fs::create_dir_all(&dir).map_err(|e| StrataError::io(&dir, e))?;
            }
            StepKind::Env { vars } => {
                tracing::debug!(count = vars.len(), "environment updated");
            }
            StepKind::LockedSync { mode } => {
                let dir = state.rootfs.join(step.workdir.trim_start_matches('/'));
                let summary = strata_lock::verify(&dir, state.runtime.as_deref())?;
                tracing::info!(mode = ?mode, packages = summary.packages.len(), fingerprint = %summary.fingerprint, "lockfile verified");
                self.execute(step, state, build_id)?;
                state.lock = Some(LockRecord {
                    fingerprint: summary.fingerprint,
                    requires_python: summary.requires_python,
                    packages: summary.packages,
                });
            }
            StepKind::OsPackages { .. } | StepKind::Run => self.execute(step, state, build_id)?,
            StepKind::Entry { argv, shell_form } => {
                let spec = CommandSpec {
                    argv: self.entry_argv(argv, *shell_form),
                    workdir: step.workdir.clone(),
                    env: step.env.clone(),
                };
                require_programs(&state.rootfs, &spec.argv[..spec.argv.len().min(1)], &spec)?;
            }
        }

        if let Some(before) = before {
            let after = Snapshot::capture(&state.rootfs)?;
            record_layer(&self.storage, step, &before.diff(&after), state)?;
        }
        Ok(())
    }

    fn copy_from_image(
        &self,
        image: &ImageRef,
        sources: &[String],
        dest: &str,
        state: &BuildState,
    ) -> Result<()> {
        let source_root = state.scratch.join("image");
        if source_root.exists() {
            std::fs::remove_dir_all(&source_root).map_err(|e| StrataError::io(&source_root, e))?;
        }
        std::fs::create_dir_all(&source_root).map_err(|e| StrataError::io(&source_root, e))?;
        ImageResolver::new(&self.config, &self.storage, &self.catalog)
            .materialize(image, &source_root)?;

        let into_dir = dest.ends_with('/') || sources.len() > 1;
        let target = state.rootfs.join(dest.trim_start_matches('/'));
        for source in sources {
            let src = source_root.join(source.trim_start_matches('/'));
            let meta = std::fs::symlink_metadata(&src).map_err(|_| BuildError::MissingSource {
                path: PathBuf::from(source),
                origin: image.to_string(),
            })?;
            if meta.is_dir() {
                let _ = copy_tree(&src, &target, &|_| true)?;
                continue;
            }
            let file_target = match (into_dir, src.file_name()) {
                (true, Some(file)) => target.join(file),
                _ => target.clone(),
            };
            let _ = copy_entry(&src, &file_target)?;
            tracing::debug!(source, target = %file_target.display(), "copied from image");
        }
        std::fs::remove_dir_all(&source_root).map_err(|e| StrataError::io(&source_root, e))?;
        Ok(())
    }

    fn shell_argv(&self, script: &str) -> Vec<String> {
        let mut argv = self.config.shell.clone();
        argv.push(script.to_string());
        argv
    }

    /// Entry command as recorded in the image. A shell-form entry carries
    /// its script last and runs under the configured shell.
    fn entry_argv(&self, argv: &[String], shell_form: bool) -> Vec<String> {
        match (shell_form, argv.last()) {
            (true, Some(script)) => self.shell_argv(script),
            _ => argv.to_vec(),
        }
    }

    /// Runs the command of a `RUN`-derived step inside the rootfs.
    fn execute(&self, step: &PlannedStep, state: &BuildState, build_id: &BuildId) -> Result<()> {
        let argv = match &step.command {
            Some(CommandForm::Exec(argv)) => argv.clone(),
            Some(CommandForm::Shell(script)) => self.shell_argv(script),
            None => {
                return Err(BuildError::InvalidPlan {
                    message: format!("step {} has no command", step.index),
                });
            }
        };
        let spec = CommandSpec {
            argv,
            workdir: step.workdir.clone(),
            env: step.env.clone(),
        };
        // Later programs may be installed by the command itself; a missing
        // one surfaces as the runner's exit status.
        let mut required: Vec<String> = step.leading_program().into_iter().collect();
        required.extend(
            step.tools
                .iter()
                .filter(|t| state.provided.contains(*t))
                .cloned(),
        );
        require_programs(&state.rootfs, &required, &spec)?;

        let output = self.runner.run(&state.rootfs, &spec)?;
        let logs_dir = self.config.logs_dir();
        logs::append_log(&logs_dir, build_id, &format!("[{} stdout]", step.index), &output.stdout)?;
        logs::append_log(&logs_dir, build_id, &format!("[{} stderr]", step.index), &output.stderr)?;

        if !output.success() {
            let program = step
                .tools
                .first()
                .cloned()
                .unwrap_or_else(|| spec.argv.first().cloned().unwrap_or_default());
            return Err(BuildError::CommandFailed {
                program,
                status: output.status,
                stderr: output.stderr,
            });
        }
        tracing::debug!(step = step.index, runner = self.runner.name(), "command succeeded");
        Ok(())
    }

    fn finish(
        &self,
        plan: &BuildPlan,
        base: &ImageRef,
        name: &str,
        state: BuildState,
    ) -> Result<ImageManifest> {
        if state.layers.len() > MAX_IMAGE_LAYERS {
            return Err(BuildError::InvalidPlan {
                message: format!(
                    "image has {} layers, more than the limit of {MAX_IMAGE_LAYERS}",
                    state.layers.len()
                ),
            });
        }
        let config = ImageConfig {
            entrypoint: plan
                .entry
                .as_ref()
                .map(|e| self.entry_argv(&e.argv, e.shell_form))
                .unwrap_or_default(),
            working_dir: plan.workdir.clone(),
            env: plan.env.clone(),
        };
        let base = base.to_string();
        let id = ImageManifest::compute_id(&base, &state.layers, &config, state.lock.as_ref())?;
        let manifest = ImageManifest {
            id,
            name: name.to_string(),
            base,
            layers: state.layers,
            config,
            lock: state.lock,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.storage.write_manifest(&manifest)?;
        Ok(manifest)
    }
}

/// Writes the diff of one step as a layer and stores it.
fn record_layer(
    storage: &StorageBackend,
    step: &PlannedStep,
    changes: &strata_image::layer::LayerChanges,
    state: &mut BuildState,
) -> Result<()> {
    if changes.is_empty() {
        tracing::debug!(step = step.index, "no filesystem changes, no layer");
        return Ok(());
    }
    let archive = state.scratch.join(format!("layer-{}.tar", step.index));
    let layer = write_layer(&state.rootfs, changes, &archive)?;
    let _ = storage.store_layer(&archive, &layer.hash)?;
    tracing::info!(step = step.index, digest = %layer.hash, size = layer.size_bytes, "layer recorded");
    state.layers.push(LayerRecord {
        digest: layer.hash,
        size_bytes: layer.size_bytes,
        step: step.index,
        created_by: step.instruction.clone(),
    });
    Ok(())
}

/// Interpreter version implied by the base image, for `requires-python`.
fn runtime_version(base: &ImageRef) -> Option<String> {
    let image = base.repository.rsplit('/').next()?;
    if image.starts_with("python") {
        base.version()
    } else {
        None
    }
}

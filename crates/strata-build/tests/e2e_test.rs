//! End-to-end builds against fixture images with a scripted command runner.
//!
//! The runner simulates the effects of `apt-get` and `uv` on the staging
//! rootfs, so the whole pipeline runs without a host `chroot`:
//! 1. Plan the recipe (parse, classify, validate)
//! 2. Materialize base and tool images from `file://` sources
//! 3. Copy the build context, honoring `.dockerignore`
//! 4. Install OS packages, verify the lockfile, synchronize
//! 5. Record layers, manifest and catalog entry

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use strata_build::{BuildError, CommandOutput, CommandRunner, CommandSpec, Provisioner};
use strata_common::config::StrataConfig;
use strata_common::constants::DEFAULT_ROOTFS_PATH;
use strata_lock::LockError;

const RECIPE: &str = r#"FROM python:3.12-slim-bookworm
COPY --from=ghcr.io/astral-sh/uv:0.5.11 /uv /uvx /bin/
ADD . /app
WORKDIR /app
RUN apt-get update && apt-get install -y ffmpeg
RUN uv sync --locked
CMD ["uv", "run", "main.py"]
"#;

const PYPROJECT: &str = r#"[project]
name = "tts-bot"
version = "0.1.0"
requires-python = ">=3.12"
dependencies = ["edge-tts>=6.1.9"]
"#;

const UV_LOCK: &str = r#"version = 1
requires-python = ">=3.12"

[[package]]
name = "tts-bot"
version = "0.1.0"
source = { virtual = "." }
dependencies = [
    { name = "edge-tts" },
]

[package.metadata]
requires-dist = [
    { name = "edge-tts", specifier = ">=6.1.9" },
]

[[package]]
name = "edge-tts"
version = "6.1.18"
source = { registry = "https://pypi.org/simple" }
"#;

// ── Fixtures ─────────────────────────────────────────────────────────

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write");
}

fn executable(root: &Path, rel: &str) {
    write(root, rel, "#!/bin/sh\n");
    std::fs::set_permissions(root.join(rel), std::fs::Permissions::from_mode(0o755))
        .expect("chmod");
}

struct Fixture {
    _dir: tempfile::TempDir,
    data_dir: PathBuf,
    context: PathBuf,
    config: StrataConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("images/python");
        executable(&base, "bin/sh");
        executable(&base, "usr/bin/apt-get");
        executable(&base, "usr/local/bin/python3");
        write(&base, "etc/os-release", "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n");

        let uv = dir.path().join("images/uv");
        executable(&uv, "uv");
        executable(&uv, "uvx");

        let context = dir.path().join("context");
        write(&context, "pyproject.toml", PYPROJECT);
        write(&context, "uv.lock", UV_LOCK);
        write(&context, "main.py", "print('hello')\n");
        write(&context, ".env", "DISCORD_TOKEN=secret\n");
        write(&context, ".dockerignore", ".env\n");

        let data_dir = dir.path().join("data");
        let mut config = StrataConfig {
            data_dir: data_dir.clone(),
            ..StrataConfig::default()
        };
        let _ = config.image_sources.insert(
            "python:3.12-slim-bookworm".into(),
            format!("file://{}", base.display()),
        );
        let _ = config.image_sources.insert(
            "ghcr.io/astral-sh/uv:0.5.11".into(),
            format!("file://{}", uv.display()),
        );

        Self {
            _dir: dir,
            data_dir,
            context,
            config,
        }
    }
}

/// Simulates `apt-get` and `uv` by editing the rootfs directly.
#[derive(Clone, Default)]
struct ScriptedRunner {
    invoked: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    fn invoked(&self) -> Vec<String> {
        self.invoked.lock().expect("lock").clone()
    }

    fn simulate(rootfs: &Path, workdir: &str, words: &[&str]) -> CommandOutput {
        let app = rootfs.join(workdir.trim_start_matches('/'));
        match words {
            [] | ["true"] => CommandOutput::ok(""),
            ["if" | "then" | "else", rest @ ..] => Self::simulate(rootfs, workdir, rest),
            ["fi"] => CommandOutput::ok(""),
            ["[", "-f", file, "]"] if app.join(file).is_file() => CommandOutput::ok(""),
            ["[", ..] => CommandOutput::failed(1, ""),
            ["ffmpeg", "-version"] if rootfs.join("usr/bin/ffmpeg").is_file() => {
                CommandOutput::ok("ffmpeg version 5.1.6-0+deb12u1")
            }
            [script] if script.starts_with("./") && app.join(script).is_file() => {
                CommandOutput::ok(format!("ran {script}"))
            }
            ["apt-get", "update", ..] => CommandOutput::ok("Reading package lists... Done"),
            ["apt-get", "install", rest @ ..] => {
                let mut out = String::new();
                for pkg in rest.iter().filter(|w| !w.starts_with('-')) {
                    if *pkg != "ffmpeg" {
                        return CommandOutput::failed(100, format!("E: Unable to locate package {pkg}"));
                    }
                    executable(rootfs, &format!("usr/bin/{pkg}"));
                    out.push_str(&format!("Setting up {pkg} (7:5.1.6-0+deb12u1) ...\n"));
                }
                CommandOutput::ok(out)
            }
            ["uv", "sync", ..] => {
                let lock = std::fs::read_to_string(app.join("uv.lock")).expect("lockfile present");
                write(&app, ".venv/lock.snapshot", &lock);
                CommandOutput::ok("Installed 1 package")
            }
            _ => CommandOutput::failed(127, format!("{}: not simulated", words.join(" "))),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, rootfs: &Path, spec: &CommandSpec) -> strata_build::Result<CommandOutput> {
        let script = if spec.argv.first().is_some_and(|p| p.ends_with("sh")) {
            spec.argv.last().cloned().unwrap_or_default()
        } else {
            spec.argv.join(" ")
        };
        self.invoked.lock().expect("lock").push(script.clone());

        let mut last = CommandOutput::ok("");
        for command in script.split(';').flat_map(|part| part.split("&&")) {
            let words: Vec<&str> = command.split_whitespace().collect();
            last = Self::simulate(rootfs, &spec.workdir, &words);
            if !last.success() {
                break;
            }
        }
        Ok(last)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn build(
    fixture: &Fixture,
    recipe: &str,
    runner: &ScriptedRunner,
) -> strata_build::Result<strata_build::BuildOutcome> {
    let plan = strata_recipe::plan_recipe(recipe, false).expect("recipe should plan");
    let provisioner = Provisioner::with_runner(fixture.config.clone(), Box::new(runner.clone()))
        .expect("provisioner");
    provisioner.build(&plan, &fixture.context, "tts-bot")
}

fn failed_step(err: BuildError) -> (usize, BuildError) {
    match err {
        BuildError::StepFailed { index, source, .. } => (index, *source),
        other => panic!("expected a step failure, got: {other}"),
    }
}

fn layer_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("open layer");
    let mut archive = tar::Archive::new(file);
    archive
        .entries()
        .expect("entries")
        .map(|e| e.expect("entry").path().expect("path").display().to_string())
        .collect()
}

// ── Successful builds ────────────────────────────────────────────────

#[test]
fn build_records_entry_and_lock() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::default();
    let outcome = build(&fixture, RECIPE, &runner).expect("build");

    let manifest = &outcome.manifest;
    assert_eq!(manifest.config.entrypoint, vec!["uv", "run", "main.py"]);
    assert_eq!(manifest.config.working_dir, "/app");
    assert_eq!(manifest.base, "python:3.12-slim-bookworm");
    let lock = manifest.lock.as_ref().expect("lock recorded");
    assert_eq!(lock.packages.get("edge-tts").map(String::as_str), Some("6.1.18"));

    let storage = strata_image::storage::StorageBackend::open(&fixture.data_dir).expect("storage");
    let stored = storage.read_manifest(&manifest.id).expect("stored manifest");
    assert_eq!(&stored, manifest);

    let catalog = strata_image::registry::ImageCatalog::open(&fixture.data_dir).expect("catalog");
    assert_eq!(catalog.find("tts-bot").expect("entry").id, manifest.id);

    assert_eq!(
        runner.invoked(),
        vec!["apt-get update && apt-get install -y ffmpeg", "uv sync --locked"]
    );
}

#[test]
fn same_inputs_give_same_image_id() {
    let fixture = Fixture::new();
    let first = build(&fixture, RECIPE, &ScriptedRunner::default()).expect("first build");
    let second = build(&fixture, RECIPE, &ScriptedRunner::default()).expect("second build");

    assert_eq!(first.manifest.id, second.manifest.id);
    assert_eq!(first.manifest.layers, second.manifest.layers);
    assert_ne!(first.build_id, second.build_id);
    assert_eq!(
        second.replaced.expect("first build replaced").id,
        first.manifest.id
    );
}

#[test]
fn ignored_context_files_stay_out_of_the_image() {
    let fixture = Fixture::new();
    let outcome = build(&fixture, RECIPE, &ScriptedRunner::default()).expect("build");

    let storage = strata_image::storage::StorageBackend::open(&fixture.data_dir).expect("storage");
    let context_layer = outcome
        .manifest
        .layers
        .iter()
        .find(|l| l.step == 2)
        .expect("context layer");
    let entries = layer_entries(&storage.layer_path(&context_layer.digest));
    assert!(entries.iter().any(|e| e == "app/main.py"), "got: {entries:?}");
    assert!(!entries.iter().any(|e| e.ends_with(".env")), "got: {entries:?}");
}

#[test]
fn step_output_lands_in_the_build_log() {
    let fixture = Fixture::new();
    let outcome = build(&fixture, RECIPE, &ScriptedRunner::default()).expect("build");

    let log = strata_build::logs::read_logs(&fixture.config.logs_dir(), &outcome.build_id)
        .expect("log");
    assert!(log.contains("[4 stdout] Setting up ffmpeg"), "got: {log}");
    assert!(log.contains("[5 stdout] Installed 1 package"), "got: {log}");
    assert_eq!(outcome.log_path, fixture.config.logs_dir().join(format!("{}.log", outcome.build_id)));
}

#[test]
fn program_installed_earlier_in_the_same_run() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::default();
    let recipe = RECIPE.replace("install -y ffmpeg", "install -y ffmpeg && ffmpeg -version");

    let outcome = build(&fixture, &recipe, &runner).expect("build");
    assert_eq!(
        runner.invoked()[0],
        "apt-get update && apt-get install -y ffmpeg && ffmpeg -version"
    );
    let log = strata_build::logs::read_logs(&fixture.config.logs_dir(), &outcome.build_id)
        .expect("log");
    assert!(log.contains("ffmpeg version 5.1.6"), "got: {log}");
}

#[test]
fn script_from_the_context_runs_by_relative_path() {
    let fixture = Fixture::new();
    executable(&fixture.context, "setup.sh");
    let runner = ScriptedRunner::default();
    let recipe = RECIPE.replace("RUN uv sync --locked\n", "RUN uv sync --locked\nRUN ./setup.sh\n");

    let _ = build(&fixture, &recipe, &runner).expect("build");
    assert_eq!(runner.invoked().last().map(String::as_str), Some("./setup.sh"));
}

#[test]
fn compound_shell_commands_reach_the_runner() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::default();
    let recipe = RECIPE.replace(
        "RUN uv sync --locked\n",
        "RUN uv sync --locked\nRUN if [ -f uv.lock ]; then true; fi\n",
    );

    let _ = build(&fixture, &recipe, &runner).expect("build");
    assert_eq!(
        runner.invoked().last().map(String::as_str),
        Some("if [ -f uv.lock ]; then true; fi")
    );
}

#[test]
fn missing_program_later_in_a_run_is_a_command_failure() {
    let fixture = Fixture::new();
    let recipe = RECIPE.replace("install -y ffmpeg", "install -y ffmpeg && curl -sSf https://example.org");

    let (index, cause) = failed_step(build(&fixture, &recipe, &ScriptedRunner::default()).unwrap_err());
    assert_eq!(index, 4);
    assert!(matches!(cause, BuildError::CommandFailed { status: Some(127), .. }), "got: {cause}");
}

#[test]
fn env_path_extends_the_default_search_path() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::default();
    let recipe = RECIPE.replace("WORKDIR /app\n", "WORKDIR /app\nENV PATH=\"/app/.venv/bin:$PATH\"\n");

    let outcome = build(&fixture, &recipe, &runner).expect("build");
    assert_eq!(
        outcome.manifest.config.env.get("PATH"),
        Some(&format!("/app/.venv/bin:{DEFAULT_ROOTFS_PATH}"))
    );
    assert_eq!(runner.invoked().len(), 2);
}

#[test]
fn shell_form_entry_runs_under_the_configured_shell() {
    let mut fixture = Fixture::new();
    fixture.config.shell = vec!["/bin/bash".into(), "-c".into()];
    let base = fixture.config.image_sources["python:3.12-slim-bookworm"]
        .trim_start_matches("file://")
        .to_string();
    executable(Path::new(&base), "bin/bash");
    let recipe = RECIPE.replace(r#"CMD ["uv", "run", "main.py"]"#, "CMD uv run main.py");

    let outcome = build(&fixture, &recipe, &ScriptedRunner::default()).expect("build");
    assert_eq!(
        outcome.manifest.config.entrypoint,
        vec!["/bin/bash", "-c", "uv run main.py"]
    );
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn missing_lockfile_fails_the_sync_step() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.context.join("uv.lock")).expect("rm");
    let runner = ScriptedRunner::default();

    let (index, cause) = failed_step(build(&fixture, RECIPE, &runner).unwrap_err());
    assert_eq!(index, 5);
    assert!(matches!(cause, BuildError::Lock(LockError::Missing { .. })), "got: {cause}");
    assert!(!runner.invoked().iter().any(|c| c.starts_with("uv")));
}

#[test]
fn dependency_missing_from_lock_is_stale() {
    let fixture = Fixture::new();
    write(
        &fixture.context,
        "pyproject.toml",
        &PYPROJECT.replace(r#"["edge-tts>=6.1.9"]"#, r#"["edge-tts>=6.1.9", "requests>=2.32"]"#),
    );

    let (index, cause) = failed_step(build(&fixture, RECIPE, &ScriptedRunner::default()).unwrap_err());
    assert_eq!(index, 5);
    assert!(matches!(cause, BuildError::Lock(LockError::Stale { .. })), "got: {cause}");
}

#[test]
fn unavailable_package_fails_before_sync() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::default();
    let recipe = RECIPE.replace("install -y ffmpeg", "install -y ffmpeg libfoo-nonexistent");

    let (index, cause) = failed_step(build(&fixture, &recipe, &runner).unwrap_err());
    assert_eq!(index, 4);
    match cause {
        BuildError::CommandFailed { status, stderr, .. } => {
            assert_eq!(status, Some(100));
            assert_eq!(stderr, "E: Unable to locate package libfoo-nonexistent");
        }
        other => panic!("expected a command failure, got: {other}"),
    }
    assert!(!runner.invoked().iter().any(|c| c.starts_with("uv")));

    let catalog = strata_image::registry::ImageCatalog::open(&fixture.data_dir).expect("catalog");
    assert!(catalog.list().expect("list").is_empty());
}

#[test]
fn removing_the_tool_copy_breaks_later_steps() {
    let fixture = Fixture::new();
    let recipe = RECIPE.replace("COPY --from=ghcr.io/astral-sh/uv:0.5.11 /uv /uvx /bin/\n", "");

    let (index, cause) = failed_step(build(&fixture, &recipe, &ScriptedRunner::default()).unwrap_err());
    assert_eq!(index, 4);
    match cause {
        BuildError::ToolNotFound { program, .. } => assert_eq!(program, "uv"),
        other => panic!("expected a missing tool, got: {other}"),
    }
}

#[test]
fn missing_base_source_fails_the_first_step() {
    let mut fixture = Fixture::new();
    fixture.config.image_sources.clear();

    let (index, cause) = failed_step(build(&fixture, RECIPE, &ScriptedRunner::default()).unwrap_err());
    assert_eq!(index, 0);
    assert!(cause.to_string().contains("python:3.12-slim-bookworm"), "got: {cause}");
}

#[test]
fn staging_is_discarded_after_failure() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.context.join("uv.lock")).expect("rm");
    let _ = build(&fixture, RECIPE, &ScriptedRunner::default()).unwrap_err();

    let tmp = fixture.data_dir.join("tmp");
    let leftovers: Vec<_> = std::fs::read_dir(&tmp).expect("tmp").collect();
    assert!(leftovers.is_empty());
}

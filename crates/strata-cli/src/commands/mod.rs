//! CLI command definitions and dispatch.

pub mod build;
pub mod images;
pub mod inspect;
pub mod logs;
pub mod plan;
pub mod verify;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use strata_common::config::StrataConfig;
use strata_common::constants::{APP_NAME, CONFIG_FILE};

/// strata: layered environment provisioner.
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Refuse remote image sources.
    #[arg(long, global = true, env = "STRATA_OFFLINE")]
    pub offline: bool,

    /// Directory for layers, manifests, the catalog and build logs.
    #[arg(long, global = true, env = "STRATA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (defaults to `<data-dir>/config.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    pub fn load_config(&self) -> anyhow::Result<StrataConfig> {
        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| strata_common::constants::data_dir().clone());
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join(CONFIG_FILE));
        let mut config = StrataConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        config.offline |= self.offline;
        tracing::debug!(
            data_dir = %config.data_dir.display(),
            offline = config.offline,
            sources = config.image_sources.len(),
            "configuration resolved"
        );
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan and build an image from a recipe and its context.
    Build(build::BuildArgs),
    /// Show the classified steps and findings of a recipe.
    Plan(plan::PlanArgs),
    /// Check a manifest and lockfile without building.
    Verify(verify::VerifyArgs),
    /// List or remove images in the local catalog.
    Images(images::ImagesArgs),
    /// Print the stored manifest of an image.
    Inspect(inspect::InspectArgs),
    /// Print the log of a build.
    Logs(logs::LogsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Build(args) => build::execute(args, &cli.load_config()?),
        Command::Plan(args) => plan::execute(args),
        Command::Verify(args) => verify::execute(args),
        Command::Images(args) => images::execute(args, &cli.load_config()?),
        Command::Inspect(args) => inspect::execute(args, &cli.load_config()?),
        Command::Logs(args) => logs::execute(args, &cli.load_config()?),
    }
}

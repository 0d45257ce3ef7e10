//! `strata build`: Plan and build an image from a recipe.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use strata_build::Provisioner;
use strata_common::config::StrataConfig;
use strata_common::constants::DEFAULT_RECIPE;
use strata_common::types::BuildId;

use crate::output::format_bytes;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build context directory.
    #[arg(default_value = ".")]
    pub context: PathBuf,

    /// Recipe file (defaults to `Dockerfile` inside the context).
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Name to register the image under (defaults to the context directory name).
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

impl BuildArgs {
    fn recipe_path(&self) -> PathBuf {
        self.file
            .clone()
            .unwrap_or_else(|| self.context.join(DEFAULT_RECIPE))
    }

    fn image_name(&self) -> String {
        if let Some(tag) = &self.tag {
            return tag.clone();
        }
        std::fs::canonicalize(&self.context)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()))
            .unwrap_or_else(|| "image".into())
    }
}

/// One-line report of a finished build; the build id is what `strata logs`
/// takes.
fn summary(name: &str, build_id: &BuildId, layers: usize, size: u64, log_path: &Path) -> String {
    format!(
        "Built {name}: {layers} layer(s), {} (build {build_id}, log: {})",
        format_bytes(size),
        log_path.display()
    )
}

/// Executes the `build` command.
///
/// Prints the image id on stdout; progress goes to the log.
///
/// # Errors
///
/// Returns an error if the recipe is rejected or any build step fails.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn execute(args: &BuildArgs, config: &StrataConfig) -> anyhow::Result<()> {
    let recipe_path = args.recipe_path();
    let text = std::fs::read_to_string(&recipe_path)
        .with_context(|| format!("reading recipe {}", recipe_path.display()))?;
    let plan = strata_recipe::plan_recipe(&text, args.strict)
        .with_context(|| format!("planning {}", recipe_path.display()))?;

    let name = args.image_name();
    let provisioner = Provisioner::new(config.clone())?;
    let outcome = provisioner
        .build(&plan, &args.context, &name)
        .with_context(|| format!("building {name}"))?;

    let manifest = &outcome.manifest;
    eprintln!(
        "{}",
        summary(
            &name,
            &outcome.build_id,
            manifest.layers.len(),
            manifest.size_bytes(),
            &outcome.log_path
        )
    );
    if let Some(old) = &outcome.replaced {
        if old.id != manifest.id {
            eprintln!("Replaced previous image {}", old.id.short());
        }
    }
    println!("{}", manifest.id);
    Ok(())
}

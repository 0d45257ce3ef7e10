//! `strata images`: List or remove images in the local catalog.

use clap::Args;
use strata_common::config::StrataConfig;
use strata_image::registry::{ImageCatalog, ImageEntry};
use strata_image::storage::StorageBackend;

use crate::output::format_bytes;

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Remove an image by name or id prefix.
    #[arg(long)]
    pub remove: Option<String>,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
#[allow(clippy::print_stdout)]
pub fn execute(args: &ImagesArgs, config: &StrataConfig) -> anyhow::Result<()> {
    let catalog = ImageCatalog::open(&config.data_dir)?;

    if let Some(target) = &args.remove {
        let removed = catalog.remove(target)?;
        if !catalog.list()?.iter().any(|e| e.id == removed.id) {
            StorageBackend::open(&config.data_dir)?.remove_manifest(&removed.id)?;
        }
        tracing::info!(name = %removed.name, id = %removed.id, "image removed");
        println!("Removed {} ({})", removed.name, removed.id.short());
        return Ok(());
    }

    print!("{}", render(&catalog.list()?));
    Ok(())
}

fn render(entries: &[ImageEntry]) -> String {
    use std::fmt::Write;

    let mut out = format!(
        "{:<14}{:<24}{:<8}{:<12}{}\n",
        "IMAGE ID", "NAME", "LAYERS", "SIZE", "CREATED"
    );
    for e in entries {
        let _ = writeln!(
            out,
            "{:<14}{:<24}{:<8}{:<12}{}",
            e.id.short(),
            e.name,
            e.layers.len(),
            format_bytes(e.size_bytes),
            e.created_at
        );
    }
    out
}

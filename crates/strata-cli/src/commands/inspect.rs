//! `strata inspect`: Print the stored manifest of an image.

use clap::Args;
use strata_common::config::StrataConfig;
use strata_image::registry::ImageCatalog;
use strata_image::storage::StorageBackend;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image name or id prefix.
    pub image: String,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the image is unknown or its manifest is missing.
#[allow(clippy::print_stdout)]
pub fn execute(args: &InspectArgs, config: &StrataConfig) -> anyhow::Result<()> {
    let entry = ImageCatalog::open(&config.data_dir)?.find(&args.image)?;
    let manifest = StorageBackend::open(&config.data_dir)?.read_manifest(&entry.id)?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

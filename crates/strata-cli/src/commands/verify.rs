//! `strata verify`: Run the lockfile protocol without building.

use std::path::PathBuf;

use clap::Args;

/// Arguments for the `verify` command.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Directory holding `pyproject.toml` and `uv.lock`.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Interpreter version the lock must support (e.g. `3.12`).
    #[arg(long)]
    pub python: Option<String>,
}

/// Executes the `verify` command.
///
/// # Errors
///
/// Returns an error if the lockfile is missing, stale, or incompatible
/// with `--python`.
#[allow(clippy::print_stdout)]
pub fn execute(args: &VerifyArgs) -> anyhow::Result<()> {
    let summary = strata_lock::verify(&args.dir, args.python.as_deref())?;
    println!("lockfile OK: {}", summary.fingerprint);
    if let Some(requires) = &summary.requires_python {
        println!("requires-python: {requires}");
    }
    for (name, version) in &summary.packages {
        println!("  {name} {version}");
    }
    Ok(())
}

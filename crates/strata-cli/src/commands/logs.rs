//! `strata logs`: Print the log of a build.

use clap::Args;
use strata_common::config::StrataConfig;
use strata_common::types::BuildId;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Build id, as printed in the build summary.
    pub build: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if no log exists for the build.
#[allow(clippy::print_stdout)]
pub fn execute(args: &LogsArgs, config: &StrataConfig) -> anyhow::Result<()> {
    let logs = strata_build::logs::read_logs(&config.logs_dir(), &BuildId::new(&args.build))?;
    print!("{logs}");
    Ok(())
}

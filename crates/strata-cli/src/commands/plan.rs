//! `strata plan`: Show how a recipe will be built.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use strata_recipe::{BuildPlan, Severity};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Recipe file.
    #[arg(short, long, default_value = strata_common::constants::DEFAULT_RECIPE)]
    pub file: PathBuf,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,

    /// Print the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// Prints every step and finding, then fails if the recipe would be
/// rejected by `build`.
///
/// # Errors
///
/// Returns an error if the recipe cannot be read or parsed, or carries
/// blocking findings.
#[allow(clippy::print_stdout)]
pub fn execute(args: &PlanArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading recipe {}", args.file.display()))?;
    let plan = strata_recipe::analyze(&text)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render(&plan, &args.file.display().to_string()));
    }
    plan.enforce(args.strict)?;
    Ok(())
}

fn render(plan: &BuildPlan, source: &str) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Build plan for: {source}");
    if let Some(base) = &plan.base {
        let _ = writeln!(out, "  base: {base}");
    }
    let _ = writeln!(out);
    for step in &plan.steps {
        let _ = writeln!(
            out,
            "  {:>2}. [{:<15}] line {:<3} {}",
            step.index,
            step.kind.label(),
            step.line,
            step.instruction
        );
    }
    let _ = writeln!(out);
    if let Some(entry) = &plan.entry {
        let _ = writeln!(out, "  entry: {}", entry.argv.join(" "));
    }
    let _ = writeln!(out, "  workdir: {}", plan.workdir);

    if plan.findings.is_empty() {
        let _ = writeln!(out, "\n  No findings.");
        return out;
    }
    let _ = writeln!(out, "\n  Findings:");
    for finding in &plan.findings {
        let marker = match finding.severity {
            Severity::Error => "x",
            Severity::Warning => "!",
        };
        let _ = writeln!(out, "    {marker} {finding}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_steps_and_findings() {
        let plan = strata_recipe::analyze(
            "FROM python:3.12-slim-bookworm\nWORKDIR /app\nRUN apt-get update && apt-get install -y ffmpeg\nCMD [\"python\", \"main.py\"]\n",
        )
        .expect("analyze");
        let text = render(&plan, "Dockerfile");
        assert!(text.contains("base: python:3.12-slim-bookworm"), "got: {text}");
        assert!(text.contains("[os-packages"), "got: {text}");
        assert!(text.contains("entry: python main.py"), "got: {text}");
        assert!(text.contains("! line 3: warning:"), "got: {text}");
    }
}

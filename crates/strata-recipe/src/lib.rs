//! # strata-recipe
//!
//! Parser and static analyzer for build recipes.
//!
//! Handles:
//! - **Parser**: Lexing and AST construction for the recipe language.
//! - **Plan**: Classification of instructions into typed, ordered build steps.
//! - **Validator**: Pinning, lockfile, entry command and ordering checks.
//! - **Graph**: Step requirement graph and ordering verification.
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod graph;
pub mod parser;
pub mod plan;
pub mod shell;

use strata_common::error::Result;

pub use parser::parse_recipe;
pub use plan::{BuildPlan, Finding, PlannedStep, Severity, StepKind, classify};

/// Parses, classifies and validates a recipe without rejecting it.
///
/// The returned plan carries every finding; callers decide what to do
/// with them (see [`BuildPlan::enforce`]).
///
/// # Errors
///
/// Returns an error if the recipe cannot be parsed or names a malformed
/// image reference.
pub fn analyze(text: &str) -> Result<BuildPlan> {
    let recipe = parse_recipe(text)?;
    let mut plan = classify(&recipe)?;
    plan.findings.extend(parser::validator::validate(&plan));
    plan.findings.sort_by_key(|f| f.line.unwrap_or(usize::MAX));
    Ok(plan)
}

/// Parses, classifies and validates a recipe, rejecting it on any error
/// finding (or any finding at all when `strict`).
///
/// # Errors
///
/// Returns an error if the recipe cannot be parsed, or if validation
/// produced blocking findings.
pub fn plan_recipe(text: &str, strict: bool) -> Result<BuildPlan> {
    let plan = analyze(text)?;
    for finding in plan.warnings() {
        tracing::warn!(line = ?finding.line, "{}", finding.message);
    }
    plan.enforce(strict)?;
    Ok(plan)
}

//! Static analysis of a classified build plan.
//!
//! Checks the base and tool image pinning, OS package pinning, lockfile
//! handling, the entry command, and step ordering before anything is built.

use strata_image::reference::{ImageRef, Pinning};

use crate::graph::{Requirement, StepGraph};
use crate::plan::{BuildPlan, Finding, PlannedStep, StepKind, SyncMode};

/// Validates a plan and returns every finding, in plan order.
///
/// # Checks performed
///
/// 1. Exactly one `FROM`, and it is the first instruction.
/// 2. The base image is pinned to a version and distribution release.
/// 3. Tool images are pinned.
/// 4. OS packages are pinned and installed after an index refresh.
/// 5. Dependency synchronization refuses stale lockfiles.
/// 6. Exactly one non-empty entry command, preferably in exec form.
/// 7. Providers of tools and the manifest precede their users; OS packages
///    installed after synchronization only warn.
#[must_use]
pub fn validate(plan: &BuildPlan) -> Vec<Finding> {
    tracing::info!(steps = plan.steps.len(), "validating build plan");
    let mut findings = Vec::new();
    check_base(plan, &mut findings);
    for step in &plan.steps {
        check_step(step, &mut findings);
    }
    check_entry(plan, &mut findings);
    check_ordering(plan, &mut findings);
    findings.sort_by_key(|f| f.line.unwrap_or(usize::MAX));
    findings
}

fn check_base(plan: &BuildPlan, findings: &mut Vec<Finding>) {
    let bases: Vec<&PlannedStep> = plan
        .steps
        .iter()
        .filter(|s| matches!(s.kind, StepKind::Base { .. }))
        .collect();

    match bases.as_slice() {
        [] => findings.push(Finding::error(None, "recipe has no FROM instruction")),
        [first, rest @ ..] => {
            if first.index != 0 {
                findings.push(Finding::error(
                    Some(first.line),
                    "FROM must be the first instruction",
                ));
            }
            for extra in rest {
                findings.push(Finding::error(
                    Some(extra.line),
                    "only one FROM is supported; multi-stage builds are not",
                ));
            }
        }
    }

    let Some(base) = &plan.base else { return };
    let line = bases.first().map(|s| s.line);
    match base.pinning() {
        Pinning::Floating => findings.push(Finding::error(
            line,
            format!("base image {base} is floating; pin a version tag or digest"),
        )),
        Pinning::Versioned { distro: None, .. } => findings.push(Finding::warning(
            line,
            format!(
                "base image {base} does not pin a distribution release; \
                 OS packages may change underneath it"
            ),
        )),
        Pinning::Versioned { .. } | Pinning::Digest => {}
    }
}

fn check_tool_image(image: &ImageRef, line: usize, findings: &mut Vec<Finding>) {
    if image.pinning() == Pinning::Floating {
        findings.push(Finding::warning(
            Some(line),
            format!("tool image {image} is floating; the copied binaries can change between builds"),
        ));
    }
}

fn check_step(step: &PlannedStep, findings: &mut Vec<Finding>) {
    let line = Some(step.line);
    match &step.kind {
        StepKind::CopyFromImage { image, sources, .. } => {
            check_tool_image(image, step.line, findings);
            if sources.iter().any(|s| s == "/") {
                findings.push(Finding::warning(
                    line,
                    format!("copying the whole filesystem of {image}"),
                ));
            }
        }
        StepKind::OsPackages {
            manager,
            packages,
            refreshes_index,
        } => {
            if packages.is_empty() {
                findings.push(Finding::error(line, "package installation names no packages"));
            }
            let unpinned: Vec<&str> = packages
                .iter()
                .filter(|p| !p.contains(manager.pin_separators()))
                .map(String::as_str)
                .collect();
            if !unpinned.is_empty() {
                findings.push(Finding::warning(
                    line,
                    format!(
                        "OS packages without a pinned version: {}; the installed versions \
                         depend on the package index at build time",
                        unpinned.join(", ")
                    ),
                ));
            }
            if !refreshes_index {
                findings.push(Finding::warning(
                    line,
                    "packages are installed without refreshing the package index first",
                ));
            }
        }
        StepKind::LockedSync {
            mode: SyncMode::Unlocked,
        } => findings.push(Finding::error(
            line,
            "dependency synchronization without --locked may silently re-resolve a stale lockfile",
        )),
        StepKind::LockedSync {
            mode: SyncMode::Frozen,
        } => findings.push(Finding::warning(
            line,
            "--frozen skips the lockfile freshness check; prefer --locked",
        )),
        _ => {}
    }
}

fn check_entry(plan: &BuildPlan, findings: &mut Vec<Finding>) {
    let entries: Vec<&PlannedStep> = plan
        .steps
        .iter()
        .filter(|s| matches!(s.kind, StepKind::Entry { .. }))
        .collect();

    if entries.is_empty() {
        findings.push(Finding::error(
            None,
            "recipe has no CMD or ENTRYPOINT; the image would have no startup command",
        ));
        return;
    }
    for extra in entries.iter().skip(1) {
        findings.push(Finding::error(
            Some(extra.line),
            "more than one CMD/ENTRYPOINT; the startup command must be stated exactly once",
        ));
    }
    for step in &entries {
        let StepKind::Entry { argv, shell_form } = &step.kind else {
            continue;
        };
        let empty = if *shell_form {
            argv.last().is_none_or(|s| s.trim().is_empty())
        } else {
            argv.first().is_none_or(String::is_empty)
        };
        if empty {
            findings.push(Finding::error(Some(step.line), "entry command is empty"));
        } else if *shell_form {
            findings.push(Finding::warning(
                Some(step.line),
                "shell-form entry runs under /bin/sh -c and will not receive signals directly",
            ));
        }
    }
}

fn check_ordering(plan: &BuildPlan, findings: &mut Vec<Finding>) {
    let graph = StepGraph::from_steps(&plan.steps);
    let describe = |index: usize| {
        plan.steps
            .get(index)
            .map_or_else(String::new, |s| format!("`{}` (line {})", s.instruction, s.line))
    };

    for v in graph.violations() {
        let line = plan.steps.get(v.consumer).map(|s| s.line);
        let message = format!(
            "{} needs {} from {}, which comes later",
            describe(v.consumer),
            v.requirement,
            describe(v.provider)
        );
        // Synchronization often does not depend on OS packages at all.
        findings.push(if v.requirement == Requirement::Packages {
            Finding::warning(line, message)
        } else {
            Finding::error(line, message)
        });
    }
    if graph.resolve_order().is_err() {
        findings.push(Finding::error(
            None,
            "steps require each other cyclically; no step order satisfies them",
        ));
    }

    for step in &plan.steps {
        if !matches!(step.kind, StepKind::LockedSync { .. }) {
            continue;
        }
        if !graph.has_manifest_provider(step.index) {
            findings.push(Finding::error(
                Some(step.line),
                format!(
                    "no step copies {} into {} for dependency synchronization",
                    strata_common::constants::MANIFEST_FILE,
                    step.workdir
                ),
            ));
        }
    }
}

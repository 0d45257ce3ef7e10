//! The locked-sync protocol: refuse to synchronize unless the lockfile
//! exists and exactly covers the manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_common::types::Sha256Hash;

use crate::error::{LockError, Result};
use crate::lockfile::{DependencyRef, LockedPackage, LockedRequirement, Lockfile, load_lockfile};
use crate::manifest::{Manifest, Requirement, load_manifest, normalize_name, normalize_specifier};
use crate::specifier::VersionSpecifiers;

/// What a verified lockfile pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSummary {
    /// SHA-256 of the lockfile bytes.
    pub fingerprint: Sha256Hash,
    /// `requires-python` of the lockfile.
    pub requires_python: Option<String>,
    /// Installed-dependency set: package name to version.
    pub packages: BTreeMap<String, String>,
}

/// Verifies the manifest and lockfile in `dir`.
///
/// `runtime` is the language runtime version of the base image, when
/// known; it must satisfy the lockfile's `requires-python`.
///
/// # Errors
///
/// Returns the first [`LockError`] found: missing files, parse failures,
/// stale or unresolved entries, or an incompatible runtime.
pub fn verify(dir: &Path, runtime: Option<&str>) -> Result<LockSummary> {
    tracing::info!(dir = %dir.display(), runtime = ?runtime, "verifying lockfile");
    let (lock, bytes) = load_lockfile(dir)?;
    let manifest = load_manifest(dir)?;
    check(&manifest, &lock, runtime)?;

    let summary = LockSummary {
        fingerprint: strata_image::hash::hash_bytes(&bytes),
        requires_python: lock.requires_python.clone(),
        packages: lock.resolved_set(),
    };
    tracing::info!(
        fingerprint = %summary.fingerprint,
        packages = summary.packages.len(),
        "lockfile verified"
    );
    Ok(summary)
}

/// Checks a parsed manifest against a parsed lockfile.
///
/// # Errors
///
/// See [`verify`].
pub fn check(manifest: &Manifest, lock: &Lockfile, runtime: Option<&str>) -> Result<()> {
    let root = lock.root(&manifest.name).ok_or_else(|| LockError::Stale {
        reason: format!("project \"{}\" has no entry in the lockfile", manifest.name),
    })?;

    check_declared_names(manifest, root)?;
    if let Some(metadata) = &root.metadata {
        check_requirements(manifest, &metadata.requires_dist, &metadata.requires_dev)?;
    }
    check_requires_python(manifest, lock)?;
    check_resolved(lock)?;

    if let (Some(runtime), Some(requires)) = (runtime, lock.requires_python.as_deref()) {
        let spec = VersionSpecifiers::parse(requires).map_err(|e| LockError::Malformed {
            path: strata_common::constants::LOCKFILE_FILE.into(),
            message: e.to_string(),
        })?;
        if !spec.admits(runtime) {
            return Err(LockError::IncompatibleRuntime {
                runtime: runtime.to_string(),
                requires: requires.to_string(),
            });
        }
    }
    Ok(())
}

fn names_of_requirements(reqs: &[Requirement]) -> BTreeSet<String> {
    reqs.iter().map(|r| r.name.clone()).collect()
}

fn names_of_refs(refs: &[DependencyRef]) -> BTreeSet<String> {
    refs.iter().map(|r| normalize_name(&r.name)).collect()
}

fn compare_sets(scope: &str, declared: &BTreeSet<String>, locked: &BTreeSet<String>) -> Result<()> {
    let added: Vec<&str> = declared.difference(locked).map(String::as_str).collect();
    let removed: Vec<&str> = locked.difference(declared).map(String::as_str).collect();
    if added.is_empty() && removed.is_empty() {
        return Ok(());
    }
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("added [{}]", added.join(", ")));
    }
    if !removed.is_empty() {
        parts.push(format!("removed [{}]", removed.join(", ")));
    }
    Err(LockError::Stale {
        reason: format!("{scope}: {} since the lockfile was written", parts.join("; ")),
    })
}

fn normalized_keys<V>(map: &BTreeMap<String, V>) -> BTreeMap<String, &V> {
    map.iter().map(|(k, v)| (normalize_name(k), v)).collect()
}

fn check_declared_names(manifest: &Manifest, root: &LockedPackage) -> Result<()> {
    compare_sets(
        "dependencies",
        &names_of_requirements(&manifest.dependencies),
        &names_of_refs(&root.dependencies),
    )?;

    let locked_extras = normalized_keys(&root.optional_dependencies);
    compare_sets(
        "extras",
        &manifest.optional.keys().cloned().collect(),
        &locked_extras.keys().cloned().collect(),
    )?;
    for (extra, reqs) in &manifest.optional {
        let locked = locked_extras
            .get(extra)
            .map(|refs| names_of_refs(refs))
            .unwrap_or_default();
        compare_sets(&format!("extra \"{extra}\""), &names_of_requirements(reqs), &locked)?;
    }

    let locked_groups = normalized_keys(&root.dev_dependencies);
    compare_sets(
        "dependency groups",
        &manifest.groups.keys().cloned().collect(),
        &locked_groups.keys().cloned().collect(),
    )?;
    for (group, reqs) in &manifest.groups {
        let locked = locked_groups
            .get(group)
            .map(|refs| names_of_refs(refs))
            .unwrap_or_default();
        // Included groups contribute packages the manifest lists elsewhere.
        let declared = names_of_requirements(reqs);
        if !declared.is_subset(&locked) {
            compare_sets(&format!("group \"{group}\""), &declared, &locked)?;
        }
    }
    Ok(())
}

/// Comparable form: markers are rewritten by the locker, so they are ignored.
fn comparable(reqs: impl IntoIterator<Item = Requirement>) -> Vec<(String, Vec<String>, String)> {
    let mut out: Vec<_> = reqs
        .into_iter()
        .map(|r| (r.name, r.extras, r.specifier))
        .collect();
    out.sort();
    out
}

fn check_requirements(
    manifest: &Manifest,
    requires_dist: &[LockedRequirement],
    requires_dev: &BTreeMap<String, Vec<LockedRequirement>>,
) -> Result<()> {
    let changed = |scope: &str| LockError::Stale {
        reason: format!("{scope}: version constraints changed since the lockfile was written"),
    };

    let locked_main = requires_dist
        .iter()
        .filter(|r| r.provides_extra.is_none())
        .map(LockedRequirement::to_requirement);
    if comparable(manifest.dependencies.iter().cloned()) != comparable(locked_main) {
        return Err(changed("dependencies"));
    }

    for (extra, reqs) in &manifest.optional {
        let locked = requires_dist
            .iter()
            .filter(|r| r.provides_extra.as_deref().map(normalize_name).as_ref() == Some(extra))
            .map(LockedRequirement::to_requirement);
        if comparable(reqs.iter().cloned()) != comparable(locked) {
            return Err(changed(&format!("extra \"{extra}\"")));
        }
    }

    let locked_dev = normalized_keys(requires_dev);
    for (group, reqs) in &manifest.groups {
        let Some(locked) = locked_dev.get(group) else {
            continue;
        };
        let locked = locked.iter().map(LockedRequirement::to_requirement);
        if comparable(reqs.iter().cloned()) != comparable(locked) {
            return Err(changed(&format!("group \"{group}\"")));
        }
    }
    Ok(())
}

fn check_requires_python(manifest: &Manifest, lock: &Lockfile) -> Result<()> {
    if let (Some(declared), Some(locked)) = (&manifest.requires_python, &lock.requires_python) {
        if normalize_specifier(declared) != normalize_specifier(locked) {
            return Err(LockError::Stale {
                reason: format!(
                    "requires-python is \"{declared}\" in the manifest but \"{locked}\" in the lockfile"
                ),
            });
        }
    }
    Ok(())
}

fn check_resolved(lock: &Lockfile) -> Result<()> {
    let known: BTreeSet<String> = lock.packages.iter().map(LockedPackage::normalized_name).collect();
    for package in &lock.packages {
        let refs = package
            .dependencies
            .iter()
            .chain(package.optional_dependencies.values().flatten())
            .chain(package.dev_dependencies.values().flatten());
        for dep in refs {
            if !known.contains(&normalize_name(&dep.name)) {
                return Err(LockError::Unresolved {
                    package: dep.name.clone(),
                    required_by: package.name.clone(),
                });
            }
        }
    }
    Ok(())
}

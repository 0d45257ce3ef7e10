//! The dependency manifest (`pyproject.toml`) and its requirement strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{LockError, Result};

/// A single dependency requirement, normalized for comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Requirement {
    /// Normalized package name.
    pub name: String,
    /// Requested extras, normalized and sorted.
    pub extras: Vec<String>,
    /// Version specifier with whitespace removed and clauses sorted
    /// (empty when unconstrained). Direct references keep their `@ url`.
    pub specifier: String,
    /// Environment marker, if any.
    pub marker: Option<String>,
}

/// The parts of the manifest that decide the locked package set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Normalized project name.
    pub name: String,
    /// `requires-python`, if declared.
    pub requires_python: Option<String>,
    /// `[project] dependencies`.
    pub dependencies: Vec<Requirement>,
    /// `[project.optional-dependencies]`, keyed by extra.
    pub optional: BTreeMap<String, Vec<Requirement>>,
    /// `[dependency-groups]`, keyed by group.
    pub groups: BTreeMap<String, Vec<Requirement>>,
}

#[derive(Deserialize)]
struct PyProject {
    project: Option<Project>,
    #[serde(default, rename = "dependency-groups")]
    dependency_groups: BTreeMap<String, Vec<toml::Value>>,
}

#[derive(Deserialize)]
struct Project {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, rename = "optional-dependencies")]
    optional_dependencies: BTreeMap<String, Vec<String>>,
    #[serde(rename = "requires-python")]
    requires_python: Option<String>,
}

/// Normalizes a package name: lowercase, with runs of `-`, `_`, `.`
/// collapsed to a single `-`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Normalizes a specifier for comparison.
#[must_use]
pub fn normalize_specifier(spec: &str) -> String {
    let compact: String = spec.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('@') {
        return compact;
    }
    let mut clauses: Vec<&str> = compact.split(',').filter(|c| !c.is_empty()).collect();
    clauses.sort_unstable();
    clauses.join(",")
}

/// Parses a requirement string such as `discord.py[voice] >= 2.3 ; python_version >= "3.9"`.
///
/// Returns `None` if the string does not start with a package name.
#[must_use]
pub fn parse_requirement(input: &str) -> Option<Requirement> {
    let (body, marker) = match input.split_once(';') {
        Some((body, marker)) => (body, Some(marker.trim().to_string())),
        None => (input, None),
    };
    let body = body.trim();
    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(body.len());
    if name_len == 0 {
        return None;
    }
    let name = normalize_name(&body[..name_len]);
    let mut rest = body[name_len..].trim_start();

    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let (list, tail) = after.split_once(']')?;
        extras = list
            .split(',')
            .map(normalize_name)
            .filter(|e| !e.is_empty())
            .collect();
        extras.sort();
        rest = tail.trim_start();
    }

    let rest = rest.trim();
    let rest = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .unwrap_or(rest);

    Some(Requirement {
        name,
        extras,
        specifier: normalize_specifier(rest),
        marker: marker.filter(|m| !m.is_empty()),
    })
}

fn parse_all(items: &[String], path: &Path) -> Result<Vec<Requirement>> {
    items
        .iter()
        .map(|raw| {
            parse_requirement(raw).ok_or_else(|| LockError::Malformed {
                path: path.to_path_buf(),
                message: format!("invalid requirement \"{raw}\""),
            })
        })
        .collect()
}

/// Parses manifest text. `path` is only used in error messages.
///
/// # Errors
///
/// Returns `LockError::Malformed` if the TOML is invalid, there is no
/// `[project]` table, or a requirement cannot be parsed.
pub fn parse_manifest(text: &str, path: &Path) -> Result<Manifest> {
    let malformed = |message: String| LockError::Malformed {
        path: path.to_path_buf(),
        message,
    };
    let doc: PyProject = toml::from_str(text).map_err(|e| malformed(e.to_string()))?;
    let project = doc
        .project
        .ok_or_else(|| malformed("no [project] table".into()))?;

    let optional = project
        .optional_dependencies
        .iter()
        .map(|(extra, items)| Ok((normalize_name(extra), parse_all(items, path)?)))
        .collect::<Result<_>>()?;

    let groups = doc
        .dependency_groups
        .iter()
        .map(|(group, items)| {
            // `{ include-group = ".." }` entries are resolved by the locker.
            let strings: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            Ok((normalize_name(group), parse_all(&strings, path)?))
        })
        .collect::<Result<_>>()?;

    Ok(Manifest {
        name: normalize_name(&project.name),
        requires_python: project.requires_python,
        dependencies: parse_all(&project.dependencies, path)?,
        optional,
        groups,
    })
}

/// Loads `pyproject.toml` from `dir`.
///
/// # Errors
///
/// Returns `LockError::MissingManifest` if the file does not exist, and
/// parse errors as in [`parse_manifest`].
pub fn load_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(strata_common::constants::MANIFEST_FILE);
    if !path.is_file() {
        return Err(LockError::MissingManifest { path });
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| strata_common::error::StrataError::io(&path, e))?;
    parse_manifest(&text, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("discord.py"), "discord-py");
        assert_eq!(normalize_name("Python_Dotenv"), "python-dotenv");
        assert_eq!(normalize_name("a--b__c"), "a-b-c");
    }

    #[test]
    fn requirement_with_extras_specifier_and_marker() {
        let req = parse_requirement("discord.py[voice] >= 2.3.2 ; python_version >= '3.9'")
            .expect("parse");
        assert_eq!(req.name, "discord-py");
        assert_eq!(req.extras, vec!["voice"]);
        assert_eq!(req.specifier, ">=2.3.2");
        assert_eq!(req.marker.as_deref(), Some("python_version >= '3.9'"));
    }

    #[test]
    fn requirement_clause_order_is_irrelevant() {
        let a = parse_requirement("edge-tts<8, >=6.1").expect("a");
        let b = parse_requirement("edge-tts (>=6.1,<8)").expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn bare_and_invalid_requirements() {
        let req = parse_requirement("python-dotenv").expect("parse");
        assert_eq!(req.specifier, "");
        assert!(parse_requirement(">=1.0").is_none());
    }

    #[test]
    fn parse_full_manifest() {
        let text = r#"
[project]
name = "TTS_Bot"
version = "0.1.0"
requires-python = ">=3.12"
dependencies = ["discord.py[voice]>=2.3.2", "edge-tts>=6.1.9", "python-dotenv>=1.0.0"]

[project.optional-dependencies]
speed = ["uvloop"]

[dependency-groups]
dev = ["pytest>=8", { include-group = "lint" }]
lint = ["ruff"]
"#;
        let manifest = parse_manifest(text, Path::new("pyproject.toml")).expect("parse");
        assert_eq!(manifest.name, "tts-bot");
        assert_eq!(manifest.requires_python.as_deref(), Some(">=3.12"));
        assert_eq!(manifest.dependencies.len(), 3);
        assert_eq!(manifest.optional["speed"][0].name, "uvloop");
        assert_eq!(manifest.groups["dev"].len(), 1);
        assert_eq!(manifest.groups["lint"][0].name, "ruff");
    }

    #[test]
    fn manifest_without_project_is_malformed() {
        let err = parse_manifest("[tool.uv]\n", Path::new("pyproject.toml")).unwrap_err();
        assert!(matches!(err, LockError::Malformed { .. }));
    }

    #[test]
    fn missing_manifest_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, LockError::MissingManifest { .. }));
    }
}

//! Image references and pinning classification.
//!
//! A reference has the shape `[registry/]repository[:tag][@sha256:<hex>]`.
//! Its pinning decides whether a build using it can be reproduced.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StrataError};
use strata_common::types::Sha256Hash;

/// Distribution release names recognised in image tags.
const DISTRO_RELEASES: &[&str] = &[
    "bookworm", "bullseye", "buster", "trixie", "jammy", "noble", "focal", "alpine",
];

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host, when the first path component names one.
    pub registry: Option<String>,
    /// Repository path (`library/python`, `astral-sh/uv`).
    pub repository: String,
    /// Tag, if given.
    pub tag: Option<String>,
    /// Content digest, if given.
    pub digest: Option<Sha256Hash>,
}

/// How firmly a reference identifies one exact image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pinning {
    /// Pinned by content digest.
    Digest,
    /// Pinned to a `major.minor[...]` version tag.
    Versioned {
        /// Version prefix of the tag (`3.12`, `0.5.11`).
        version: String,
        /// Distribution release bound into the tag, if any.
        distro: Option<String>,
    },
    /// No tag, `latest`, or a tag carrying no `major.minor` version.
    Floating,
}

impl ImageRef {
    /// Parses an image reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is empty, contains characters not
    /// allowed in repository names, or carries a malformed digest.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = |message: &str| StrataError::Config {
            message: format!("invalid image reference \"{input}\": {message}"),
        };

        let (name_part, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !digest.starts_with("sha256:") {
                    return Err(invalid("only sha256 digests are supported"));
                }
                (name, Some(Sha256Hash::from_hex(digest)?))
            }
            None => (input, None),
        };

        let last_slash = name_part.rfind('/');
        let (path, tag) = match name_part.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => (
                &name_part[..colon],
                Some(name_part[colon + 1..].to_string()),
            ),
            _ => (name_part, None),
        };

        if tag.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("empty tag"));
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        if repository.is_empty() {
            return Err(invalid("empty repository"));
        }
        if !repository
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c))
        {
            return Err(invalid("repository must be lowercase alphanumerics, '.', '_', '-', '/'"));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Classifies how firmly this reference is pinned.
    #[must_use]
    pub fn pinning(&self) -> Pinning {
        if self.digest.is_some() {
            return Pinning::Digest;
        }
        let Some(tag) = self.tag.as_deref() else {
            return Pinning::Floating;
        };

        let version_len = tag
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(tag.len());
        let version = tag[..version_len].trim_end_matches('.');
        let components = version.split('.').filter(|s| !s.is_empty()).count();
        if components < 2 {
            return Pinning::Floating;
        }

        let distro = tag[version_len..]
            .split('-')
            .find(|segment| {
                DISTRO_RELEASES
                    .iter()
                    .any(|release| segment.starts_with(release))
            })
            .map(str::to_string);

        Pinning::Versioned {
            version: version.to_string(),
            distro,
        }
    }

    /// Returns the version carried by the tag, if the reference is versioned.
    #[must_use]
    pub fn version(&self) -> Option<String> {
        match self.pinning() {
            Pinning::Versioned { version, .. } => Some(version),
            Pinning::Digest | Pinning::Floating => None,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_official_image_with_tag() {
        let r = ImageRef::parse("python:3.12-slim-bookworm").expect("parse");
        assert!(r.registry.is_none());
        assert_eq!(r.repository, "python");
        assert_eq!(r.tag.as_deref(), Some("3.12-slim-bookworm"));
        assert_eq!(
            r.pinning(),
            Pinning::Versioned {
                version: "3.12".into(),
                distro: Some("bookworm".into()),
            }
        );
    }

    #[test]
    fn parse_registry_and_path() {
        let r = ImageRef::parse("ghcr.io/astral-sh/uv:0.5.11").expect("parse");
        assert_eq!(r.registry.as_deref(), Some("ghcr.io"));
        assert_eq!(r.repository, "astral-sh/uv");
        assert_eq!(r.version().as_deref(), Some("0.5.11"));
        assert_eq!(r.to_string(), "ghcr.io/astral-sh/uv:0.5.11");
    }

    #[test]
    fn registry_with_port_is_not_mistaken_for_tag() {
        let r = ImageRef::parse("localhost:5000/tools/uv").expect("parse");
        assert_eq!(r.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(r.repository, "tools/uv");
        assert!(r.tag.is_none());
    }

    #[test]
    fn latest_and_missing_tags_are_floating() {
        assert_eq!(
            ImageRef::parse("ghcr.io/astral-sh/uv:latest")
                .expect("parse")
                .pinning(),
            Pinning::Floating
        );
        assert_eq!(
            ImageRef::parse("python").expect("parse").pinning(),
            Pinning::Floating
        );
        assert_eq!(
            ImageRef::parse("python:3").expect("parse").pinning(),
            Pinning::Floating
        );
        assert_eq!(
            ImageRef::parse("python:slim").expect("parse").pinning(),
            Pinning::Floating
        );
    }

    #[test]
    fn version_without_distro_release() {
        let r = ImageRef::parse("python:3.12-slim").expect("parse");
        assert_eq!(
            r.pinning(),
            Pinning::Versioned {
                version: "3.12".into(),
                distro: None,
            }
        );
    }

    #[test]
    fn alpine_release_counts_as_distro() {
        let r = ImageRef::parse("python:3.11-alpine3.19").expect("parse");
        assert!(matches!(
            r.pinning(),
            Pinning::Versioned { distro: Some(d), .. } if d == "alpine3.19"
        ));
    }

    #[test]
    fn digest_pin_wins() {
        let digest = "a".repeat(64);
        let r = ImageRef::parse(&format!("python:3.12@sha256:{digest}")).expect("parse");
        assert_eq!(r.pinning(), Pinning::Digest);
        assert!(r.to_string().ends_with(&digest));
    }

    #[test]
    fn invalid_references_are_rejected() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("Python:3.12").is_err());
        assert!(ImageRef::parse("python:").is_err());
        assert!(ImageRef::parse("python@md5:abc").is_err());
    }
}

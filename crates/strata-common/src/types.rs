//! Domain primitive types used across the strata workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a single build invocation, used to correlate logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(String);

impl BuildId {
    /// Creates a build ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random build ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-derived identifier of a built image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates an image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, as shown in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&Sha256Hash> for ImageId {
    fn from(hash: &Sha256Hash) -> Self {
        Self(hash.as_hex().to_string())
    }
}

/// SHA-256 hash digest used for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// Accepts an optional `sha256:` prefix. Hex digits are lowercased.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> crate::error::Result<Self> {
        let hex = hex.into();
        let bare = hex.strip_prefix("sha256:").unwrap_or(&hex);
        if bare.len() != crate::constants::SHA256_HEX_LENGTH
            || !bare.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(crate::error::StrataError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(bare.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl From<[u8; 32]> for Sha256Hash {
    fn from(digest: [u8; 32]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(crate::constants::SHA256_HEX_LENGTH);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sha256_accepts_prefixed_and_bare_hex() {
        let bare = Sha256Hash::from_hex(HEX).expect("bare");
        let prefixed = Sha256Hash::from_hex(format!("sha256:{HEX}")).expect("prefixed");
        assert_eq!(bare, prefixed);
        assert_eq!(bare.to_string(), format!("sha256:{HEX}"));
    }

    #[test]
    fn sha256_normalizes_case() {
        let upper = Sha256Hash::from_hex(HEX.to_ascii_uppercase()).expect("upper");
        assert_eq!(upper.as_hex(), HEX);
    }

    #[test]
    fn sha256_rejects_short_or_non_hex() {
        assert!(Sha256Hash::from_hex("abc").is_err());
        assert!(Sha256Hash::from_hex("z".repeat(64)).is_err());
    }

    #[test]
    fn from_raw_digest_renders_lowercase_hex() {
        let hash = Sha256Hash::from([0xab; 32]);
        assert_eq!(hash.as_hex(), "ab".repeat(32));
    }

    #[test]
    fn image_id_short_form() {
        let hash = Sha256Hash::from_hex(HEX).expect("hash");
        let id = ImageId::from(&hash);
        assert_eq!(id.short(), "e3b0c44298fc");
    }

    #[test]
    fn generated_build_ids_differ() {
        assert_ne!(BuildId::generate(), BuildId::generate());
    }
}

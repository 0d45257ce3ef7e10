//! SHA-256 content verification.
//!
//! Layers, lockfiles, and downloaded archives are all addressed and
//! checked by their SHA-256 digest.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use strata_common::error::{Result, StrataError};
use strata_common::types::Sha256Hash;

/// Computes the SHA-256 hash of a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Sha256Hash {
    let digest = Sha256::digest(data);
    to_hash(digest.as_slice())
}

/// Computes the SHA-256 hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| StrataError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| StrataError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hash(hasher.finalize().as_slice()))
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `StrataError::HashMismatch` if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &Sha256Hash) -> Result<()> {
    tracing::debug!(path = %path.display(), "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(StrataError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn to_hash(digest: &[u8]) -> Sha256Hash {
    let mut raw = [0u8; 32];
    raw.copy_from_slice(digest);
    Sha256Hash::from(raw)
}

//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for strata data when running as root.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/strata";

/// Returns the data directory, preferring `$HOME/.strata` and falling
/// back to `/var/lib/strata`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".strata");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Default recipe file name looked up in the build context.
pub const DEFAULT_RECIPE: &str = "Dockerfile";

/// Ignore file consulted when copying the build context.
pub const IGNORE_FILE: &str = ".dockerignore";

/// Dependency manifest read by the locked-sync protocol.
pub const MANIFEST_FILE: &str = "pyproject.toml";

/// Lockfile read by the locked-sync protocol.
pub const LOCKFILE_FILE: &str = "uv.lock";

/// Configuration file name inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Image catalog file name inside the data directory.
pub const CATALOG_FILE: &str = "catalog.json";

/// `PATH` used inside the rootfs when the recipe sets none.
pub const DEFAULT_ROOTFS_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Context entries that are never copied into an image.
pub const ALWAYS_IGNORED: &[&str] = &[".git", ".venv", "__pycache__"];

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "strata";

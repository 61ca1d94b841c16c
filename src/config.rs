//! Configuration for the data-access core.

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::PathBuf;

/// Reserved scope under which internal rows (version markers) are filed.
pub const INTERNAL_SCOPE: &str = "mailstation";

/// Column routed to the credential-update path instead of a plain update.
pub const CREDENTIAL_COLUMN: &str = "password";

/// Main configuration for the store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    pub database: PathBuf,
    /// Version of the running software, compared against per-table version
    /// markers to decide whether schema patches are needed.
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Scope for internal rows such as version markers.
    #[serde(default = "default_internal_scope")]
    pub internal_scope: String,
}

impl StoreConfig {
    /// Creates a configuration for the given database path with defaults
    /// for everything else.
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            app_version: default_app_version(),
            internal_scope: default_internal_scope(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(default_database_path())
    }
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_internal_scope() -> String {
    INTERNAL_SCOPE.to_string()
}

/// Default on-disk location for the database.
///
/// Uses the platform data directory when available, falling back to the
/// current directory.
#[must_use]
pub fn default_database_path() -> PathBuf {
    ProjectDirs::from("", "", "mailstation").map_or_else(
        || PathBuf::from("mailstation.sqlite3"),
        |dirs| dirs.data_dir().join("mailstation.sqlite3"),
    )
}

//! Idempotent table creation and versioned, best-effort schema patching.
//!
//! Each logical table records the version of the software that last shaped
//! it in a `DB_VERSION_<table>` marker row. At startup the engine creates
//! missing tables from their init scripts, then walks every table's patch
//! list and applies the patches whose target version exceeds the recorded
//! one, in ascending numeric-aware order.
//!
//! Patches are safe to re-run: an `ALTER TABLE ... ADD` that fails because
//! the column already exists, or a `DROP COLUMN` whose column is already
//! gone, is recognized by matching the identifier in the statement against
//! the identifier in the error and skipped. Any other patch failure is
//! logged and stops that table's patches without blocking the rest of the
//! system.

use crate::config::StoreConfig;
use crate::store::connection::ConnectionManager;
use crate::store::executor::{Params, QueryExecutor, Row};
use crate::store::registry::{self, Patch, StatementKind, VERSION_MARKER_PREFIX};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;

// Identifier-capturing patterns pairing a patch statement with the error
// it produces when its effect is already in place.
#[allow(clippy::unwrap_used)]
static ADD_PATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)ALTER\s+TABLE\s+"?\w+"?\s+ADD\s+(?:COLUMN\s+)?"?(\w+)"?"#).unwrap()
});
#[allow(clippy::unwrap_used)]
static ADD_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)duplicate\s+column\s+name:?\s+"?(\w+)"?"#).unwrap());
#[allow(clippy::unwrap_used)]
static DROP_PATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)DROP\s+COLUMN\s+"?(\w+)"?"#).unwrap());
#[allow(clippy::unwrap_used)]
static DROP_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)no\s+such\s+column:?\s+"?(\w+)"?"#).unwrap());

/// Compares two dotted version strings segment by segment, numerically.
///
/// `"1.5.2"` sorts before `"1.5.13"`; missing segments count as zero, and
/// non-numeric segments fall back to string order.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let l = l.unwrap_or("0");
                let r = r.unwrap_or("0");
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            },
        }
    }
}

/// Whether a failed patch statement can be skipped because its effect is
/// already in place.
fn patch_is_skippable(statement: &str, err: &Error) -> bool {
    let cause = err.to_string();
    if let (Some(patch), Some(error)) = (ADD_PATCH.captures(statement), ADD_ERROR.captures(&cause))
    {
        if patch[1].eq_ignore_ascii_case(&error[1]) {
            return true;
        }
    }
    if let (Some(patch), Some(error)) =
        (DROP_PATCH.captures(statement), DROP_ERROR.captures(&cause))
    {
        if patch[1].eq_ignore_ascii_case(&error[1]) {
            return true;
        }
    }
    false
}

/// Creates missing tables and applies pending schema patches.
#[derive(Clone, Debug)]
pub struct MigrationEngine {
    manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
    config: StoreConfig,
}

impl MigrationEngine {
    /// Creates an engine over the shared executor.
    #[must_use]
    pub fn new(executor: QueryExecutor, config: StoreConfig) -> Self {
        Self {
            manager: Arc::clone(executor.manager()),
            executor,
            config,
        }
    }

    /// Initializes the store, then upgrades it.
    ///
    /// With `reset`, the underlying database file is wiped first. Every
    /// registered table is probed; missing ones are created from their
    /// init scripts. The system must not run against a partially
    /// initialized store, so any probe or init failure that is not
    /// "object already exists" aborts startup.
    ///
    /// # Errors
    ///
    /// Returns the first fatal initialization error; the process should
    /// not serve requests after a failure here.
    pub fn init(&self, reset: bool) -> Result<()> {
        tracing::debug!(reset, "init start");
        if reset {
            self.wipe()?;
        }
        self.manager.open()?;
        for def in registry::TABLES {
            if self.table_exists(def.name)? {
                tracing::debug!(table = def.name, "table present");
                continue;
            }
            match self.executor.run(def.init_script, Params::Empty, &[]) {
                Ok(_) => tracing::info!(table = def.name, "table initialized"),
                Err(Error::Schema { cause }) if cause.to_lowercase().contains("already exists") => {
                    tracing::info!(table = def.name, %cause, "init skipped");
                },
                Err(e) => {
                    tracing::error!(table = def.name, error = %e, "table init failed");
                    return Err(e);
                },
            }
        }
        self.manager.close();
        self.upgrade()?;
        tracing::debug!("init end");
        Ok(())
    }

    /// Applies pending patches for every registered table.
    ///
    /// Patch application is best-effort: one table's patch failure is
    /// logged and stops that table's remaining patches, but never blocks
    /// the other tables.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be opened or a version
    /// marker read fails for a reason other than a missing column (a
    /// missing column means the table predates the marker machinery and
    /// simply needs its patches).
    pub fn upgrade(&self) -> Result<()> {
        tracing::debug!("upgrade start");
        self.manager.open()?;
        for def in registry::TABLES {
            let recorded = self.recorded_version(def.name)?;
            tracing::debug!(table = def.name, version = recorded.as_deref(), "recorded version");
            if def.patches.is_empty() {
                continue;
            }
            let behind = recorded
                .as_deref()
                .is_none_or(|v| compare_versions(v, &self.config.app_version) == Ordering::Less);
            if !behind {
                continue;
            }
            let mut current = recorded;
            for patch in def.patches {
                let pending = current
                    .as_deref()
                    .is_none_or(|v| compare_versions(v, patch.target_version) == Ordering::Less);
                if !pending {
                    continue;
                }
                let applied = self
                    .apply_patch(def.name, patch)
                    .and_then(|()| self.record_version(def.name, patch.target_version));
                match applied {
                    Ok(()) => {
                        tracing::info!(
                            table = def.name,
                            from = current.as_deref().unwrap_or("none"),
                            to = patch.target_version,
                            "patched"
                        );
                        current = Some(patch.target_version.to_string());
                    },
                    Err(e) => {
                        tracing::error!(
                            table = def.name,
                            version = patch.target_version,
                            error = %e,
                            "patch failed, leaving table as is"
                        );
                        break;
                    },
                }
            }
        }
        tracing::debug!("upgrade end");
        Ok(())
    }

    /// Reads a table's recorded version marker.
    ///
    /// `Ok(None)` means the marker is absent, or unreadable because the
    /// marker column itself does not exist yet; both mean "patch needed".
    ///
    /// # Errors
    ///
    /// Any read failure other than a missing column is fatal.
    pub fn recorded_version(&self, table: &str) -> Result<Option<String>> {
        let settings = registry::table("settings")?;
        let sql = settings.statement(StatementKind::Select, "env")?;
        let mut named = Row::new();
        named.insert(
            "scope".to_string(),
            Value::String(self.config.internal_scope.clone()),
        );
        let marker = format!("{VERSION_MARKER_PREFIX}{table}");
        match self.executor.get(sql, &named, &[json!(marker)]) {
            Ok(row) => Ok(row
                .and_then(|r| r.get("value").and_then(Value::as_str).map(ToString::to_string))),
            Err(Error::Schema { cause }) if DROP_ERROR.is_match(&cause) => {
                tracing::debug!(table, %cause, "version marker unreadable, patch needed");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    fn record_version(&self, table: &str, version: &str) -> Result<()> {
        let settings = registry::table("settings")?;
        let sql = settings.statement(StatementKind::Insert, "env")?;
        let mut named = Row::new();
        named.insert(
            "name".to_string(),
            Value::String(format!("{VERSION_MARKER_PREFIX}{table}")),
        );
        named.insert("value".to_string(), Value::String(version.to_string()));
        named.insert(
            "scope".to_string(),
            Value::String(self.config.internal_scope.clone()),
        );
        self.executor.run(sql, Params::Single(&named), &[])?;
        Ok(())
    }

    fn apply_patch(&self, table: &str, patch: &Patch) -> Result<()> {
        for statement in patch.statements {
            match self.executor.run(statement, Params::Empty, &[]) {
                Ok(_) => {},
                Err(e) if patch_is_skippable(statement, &e) => {
                    tracing::info!(
                        table,
                        version = patch.target_version,
                        statement,
                        "patch statement already in effect, skipped"
                    );
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self.executor.get(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &Row::new(),
            &[json!(table)],
        )?;
        Ok(row.is_some())
    }

    fn wipe(&self) -> Result<()> {
        self.manager.close();
        let path = self.manager.path();
        for suffix in ["", "-wal", "-shm"] {
            let mut target = path.as_os_str().to_owned();
            target.push(suffix);
            match std::fs::remove_file(&target) {
                Ok(()) => tracing::info!(path = %std::path::Path::new(&target).display(), "wiped"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    return Err(Error::OperationFailed {
                        operation: "wipe".to_string(),
                        cause: e.to_string(),
                    });
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1.5.2", "1.5.13", Ordering::Less; "digit aware not lexicographic")]
    #[test_case("1.5.13", "1.5.2", Ordering::Greater; "reversed")]
    #[test_case("1.4.7", "1.5.13", Ordering::Less; "minor bump")]
    #[test_case("1.5.20", "1.5.13", Ordering::Greater; "twenty beats thirteen")]
    #[test_case("1.2.4", "1.2.4", Ordering::Equal; "equal")]
    #[test_case("1.10", "1.9", Ordering::Greater; "two segment")]
    #[test_case("1.5", "1.5.0", Ordering::Equal; "missing segment is zero")]
    fn test_compare_versions(a: &str, b: &str, expected: Ordering) {
        assert_eq!(compare_versions(a, b), expected);
    }

    #[test]
    fn test_add_patch_skip_matches_identifier() {
        let err = Error::Schema {
            cause: "duplicate column name: salt".to_string(),
        };
        assert!(patch_is_skippable(
            "ALTER TABLE logins ADD salt TEXT NOT NULL DEFAULT ''",
            &err
        ));
        assert!(patch_is_skippable(
            "ALTER TABLE logins ADD COLUMN salt TEXT",
            &err
        ));
        // A different column in the error is a real failure.
        assert!(!patch_is_skippable(
            "ALTER TABLE logins ADD hash TEXT NOT NULL DEFAULT ''",
            &err
        ));
    }

    #[test]
    fn test_drop_patch_skip_matches_identifier() {
        let err = Error::Schema {
            cause: r#"no such column: "password""#.to_string(),
        };
        assert!(patch_is_skippable(
            "ALTER TABLE logins DROP COLUMN password",
            &err
        ));
        assert!(!patch_is_skippable(
            "ALTER TABLE logins DROP COLUMN salt",
            &err
        ));
    }

    #[test]
    fn test_non_alter_failures_are_not_skippable() {
        let err = Error::Schema {
            cause: "no such table: logins".to_string(),
        };
        assert!(!patch_is_skippable(
            "UPDATE logins SET is_admin = 1 WHERE username = 'admin'",
            &err
        ));
    }
}

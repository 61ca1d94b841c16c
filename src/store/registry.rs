//! Static, per-table schema metadata.
//!
//! One [`TableDef`] per logical table: identifier column, scope column,
//! declared column types, statement templates, guard rules, init script and
//! ordered patch list. The registry is process-wide, immutable, and built
//! once; everything else in the store resolves tables and statements
//! through it.
//!
//! Statement templates use `SQLite` named placeholders (`@name`) plus
//! trailing positional placeholders (`?`), mixable within one statement.

use crate::{Error, Result};
use serde_json::Value;

/// Prefix of the per-table version marker rows stored in `settings`.
pub const VERSION_MARKER_PREFIX: &str = "DB_VERSION_";

/// Declared semantic type of an updatable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// A text value.
    Text,
    /// An integer value (flags are 0/1 integers).
    Integer,
    /// A JSON object or array, stored serialized as text.
    Json,
}

impl ColumnType {
    /// Human-readable label used in validation messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Json => "json",
        }
    }

    /// Whether a payload value matches this declared type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Json => value.is_object() || value.is_array(),
        }
    }
}

/// Kind of a registered statement template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// A read statement.
    Select,
    /// An insert/replace statement.
    Insert,
    /// A single-column update statement.
    Update,
    /// A delete statement.
    Delete,
}

impl StatementKind {
    /// Lowercase label for error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A named statement template.
#[derive(Debug, Clone, Copy)]
pub struct StatementDef {
    /// The statement kind.
    pub kind: StatementKind,
    /// The lookup key within the kind (for updates, the column name; for
    /// deletes, the delete key).
    pub key: &'static str,
    /// The SQL template.
    pub sql: &'static str,
}

/// Value a guard rule is keyed by.
///
/// Resolution order for a mutation with value `v`: the rule keyed by
/// exactly `v` wins, then a wildcard rule, then the column is unguarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMatch {
    /// Matches any value (wildcard).
    Any,
    /// Matches an exact integer value.
    Integer(i64),
    /// Matches an exact text value.
    Text(&'static str),
}

impl GuardMatch {
    /// Whether this key matches the runtime value exactly.
    ///
    /// `Any` is handled separately by the resolution order and never
    /// matches here.
    #[must_use]
    pub fn matches_exact(self, value: &Value) -> bool {
        match self {
            Self::Any => false,
            Self::Integer(expected) => value.as_i64() == Some(expected),
            Self::Text(expected) => value.as_str() == Some(expected),
        }
    }
}

/// A test-then-act gate protecting a business invariant.
///
/// The `test` statement never mutates state; only `pass` mutates, and only
/// after `predicate` accepts the test result.
#[derive(Debug, Clone, Copy)]
pub struct GuardRule {
    /// Column (for updates) or delete key this rule applies to.
    pub column: &'static str,
    /// Value the rule is keyed by.
    pub match_value: GuardMatch,
    /// What the rule protects.
    pub description: &'static str,
    /// Read-only test statement; selects a single `count` column.
    pub test: &'static str,
    /// Accepts or rejects based on the test's `count`.
    pub predicate: fn(i64) -> bool,
    /// Mutation to run when the predicate accepts.
    pub pass: &'static str,
    /// Fixed reason reported when the predicate rejects.
    pub fail: &'static str,
}

/// An ordered, versioned set of raw migration statements.
#[derive(Debug, Clone, Copy)]
pub struct Patch {
    /// Version this patch brings the table to.
    pub target_version: &'static str,
    /// Statements applied in order.
    pub statements: &'static [&'static str],
}

/// Static definition of one logical table.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Unique identifying column.
    pub id_column: &'static str,
    /// Tenant/container partition column, when the table is scoped.
    pub scope_column: Option<&'static str>,
    /// Updatable columns and their declared semantic types.
    pub columns: &'static [(&'static str, ColumnType)],
    /// Named statement templates.
    pub statements: &'static [StatementDef],
    /// Guard rules for updates, keyed by `(column, value)`.
    pub update_guards: &'static [GuardRule],
    /// Guard rules for deletes, keyed by `(key, id)`.
    pub delete_guards: &'static [GuardRule],
    /// Idempotent, transactional creation script; also seeds the table's
    /// version marker.
    pub init_script: &'static str,
    /// Schema patches in ascending `target_version` order.
    pub patches: &'static [Patch],
}

impl TableDef {
    /// Resolves a statement template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStatement`] when the `(kind, key)` pair is
    /// not registered. This is a programmer error, distinct from ordinary
    /// operational failures.
    pub fn statement(&self, kind: StatementKind, key: &str) -> Result<&'static str> {
        self.statements
            .iter()
            .find(|s| s.kind == kind && s.key == key)
            .map(|s| s.sql)
            .ok_or_else(|| Error::UnknownStatement {
                table: self.name.to_string(),
                kind: kind.label(),
                key: key.to_string(),
            })
    }

    /// Whether a statement template is registered.
    #[must_use]
    pub fn has_statement(&self, kind: StatementKind, key: &str) -> bool {
        self.statements.iter().any(|s| s.kind == kind && s.key == key)
    }

    /// Declared type of an updatable column, if declared.
    #[must_use]
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, ty)| *ty)
    }

    /// Resolves the guard for an update of `column` to `value`.
    ///
    /// Exact match first, then wildcard, else `None` (unguarded).
    #[must_use]
    pub fn update_guard(&self, column: &str, value: &Value) -> Option<&'static GuardRule> {
        resolve_guard(self.update_guards, column, value)
    }

    /// Resolves the guard for a delete via `key` of row `id`.
    #[must_use]
    pub fn delete_guard(&self, key: &str, id: &str) -> Option<&'static GuardRule> {
        resolve_guard(self.delete_guards, key, &Value::String(id.to_string()))
    }
}

fn resolve_guard(
    rules: &'static [GuardRule],
    column: &str,
    value: &Value,
) -> Option<&'static GuardRule> {
    rules
        .iter()
        .filter(|rule| rule.column == column)
        .find(|rule| rule.match_value.matches_exact(value))
        .or_else(|| {
            rules
                .iter()
                .find(|rule| rule.column == column && rule.match_value == GuardMatch::Any)
        })
}

/// Looks up a table definition by name.
///
/// # Errors
///
/// Returns [`Error::UnknownTable`] for unregistered names; programmer
/// error, fatal and non-recoverable.
pub fn table(name: &str) -> Result<&'static TableDef> {
    TABLES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::UnknownTable(name.to_string()))
}

// Guard predicates. The test statements all select a single `count`.

fn count_positive(count: i64) -> bool {
    count > 0
}

fn count_is_one(count: i64) -> bool {
    count == 1
}

fn always(_count: i64) -> bool {
    true
}

/// The process-wide table registry.
///
/// `settings` comes first: every other table's init script seeds its
/// version marker into it.
pub static TABLES: &[TableDef] = &[
    // ------------------------------------------------------------------
    // settings: per-tenant settings plus the immutable environment mirror
    // and the version marker rows.
    // ------------------------------------------------------------------
    TableDef {
        name: "settings",
        id_column: "name",
        scope_column: Some("scope"),
        columns: &[],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM settings WHERE is_mutable = 1",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "settings",
                sql: "SELECT name, value FROM settings WHERE is_mutable = 1 AND scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "setting",
                sql: "SELECT value FROM settings WHERE is_mutable = 1 AND scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "envs",
                sql: "SELECT name, value FROM settings WHERE is_mutable = 0 AND scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "env",
                sql: "SELECT value FROM settings WHERE is_mutable = 0 AND scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "scopes",
                sql: "SELECT DISTINCT scope FROM settings WHERE is_mutable = 1",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "setting",
                sql: "REPLACE INTO settings (name, value, scope, is_mutable) VALUES (@name, @value, @scope, 1)",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "env",
                sql: "REPLACE INTO settings (name, value, scope, is_mutable) VALUES (@name, @value, @scope, 0)",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "envs",
                sql: "DELETE FROM settings WHERE is_mutable = 0 AND scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "env",
                sql: "DELETE FROM settings WHERE is_mutable = 0 AND scope = @scope AND name = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS settings (\n",
            "  id         INTEGER PRIMARY KEY,\n",
            "  name       TEXT NOT NULL,\n",
            "  value      TEXT NOT NULL,\n",
            "  scope      TEXT NOT NULL,\n",
            "  is_mutable INTEGER NOT NULL DEFAULT 0,\n",
            "  UNIQUE (name, scope)\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_settings', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[Patch {
            target_version: "1.0.17",
            statements: &[
                "ALTER TABLE settings ADD scope TEXT NOT NULL DEFAULT ''",
                "ALTER TABLE settings ADD is_mutable INTEGER NOT NULL DEFAULT 0",
            ],
        }],
    },
    // ------------------------------------------------------------------
    // configs: per-plugin configuration entries, grouped by schema.
    // ------------------------------------------------------------------
    TableDef {
        name: "configs",
        id_column: "name",
        scope_column: Some("scope"),
        columns: &[("value", ColumnType::Text), ("schema", ColumnType::Text)],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM configs WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "count_schema",
                sql: "SELECT COUNT(*) AS count FROM configs WHERE scope = @scope AND schema = @schema",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "configs",
                sql: "SELECT plugin, name, value, schema FROM configs WHERE plugin = @plugin AND scope LIKE ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "schema",
                sql: "SELECT name, value FROM configs WHERE plugin = @plugin AND schema = @schema AND scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "config",
                sql: "SELECT value FROM configs WHERE plugin = @plugin AND scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "config",
                sql: "REPLACE INTO configs (plugin, name, value, schema, scope) VALUES (@plugin, @name, @value, @schema, @scope)",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "value",
                sql: "UPDATE configs SET value = @value WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "schema",
                sql: "UPDATE configs SET schema = @schema WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "name",
                sql: "DELETE FROM configs WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "plugin",
                sql: "DELETE FROM configs WHERE scope = @scope AND plugin = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS configs (\n",
            "  id     INTEGER PRIMARY KEY,\n",
            "  plugin TEXT NOT NULL,\n",
            "  name   TEXT NOT NULL,\n",
            "  value  TEXT NOT NULL DEFAULT '',\n",
            "  schema TEXT NOT NULL DEFAULT '',\n",
            "  scope  TEXT NOT NULL,\n",
            "  UNIQUE (plugin, name, scope)\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_configs', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[Patch {
            target_version: "1.2.0",
            statements: &["ALTER TABLE configs ADD schema TEXT NOT NULL DEFAULT ''"],
        }],
    },
    // ------------------------------------------------------------------
    // logins: operator accounts for the admin tool itself. Guards protect
    // the last active administrator.
    // ------------------------------------------------------------------
    TableDef {
        name: "logins",
        id_column: "email",
        scope_column: None,
        columns: &[
            ("password", ColumnType::Text),
            ("email", ColumnType::Text),
            ("username", ColumnType::Text),
            ("is_admin", ColumnType::Integer),
            ("is_active", ColumnType::Integer),
            ("is_account", ColumnType::Integer),
            ("roles", ColumnType::Json),
        ],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM logins",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "login",
                sql: "SELECT email, username, is_admin, is_active, is_account, roles FROM logins WHERE email = @email OR username = @username",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "logins",
                sql: "SELECT id, email, username, is_admin, is_active, is_account, roles FROM logins",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "admins",
                sql: "SELECT id, email, username, is_admin, is_active, is_account, roles FROM logins WHERE is_admin = 1",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "active_admins",
                sql: "SELECT id, email, username, is_admin, is_active, is_account, roles FROM logins WHERE is_active = 1 AND is_admin = 1",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "roles",
                sql: "SELECT roles FROM logins WHERE email = @email OR username = @username",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "salt_hash",
                sql: "SELECT salt, hash FROM logins WHERE email = @email OR username = @username",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "login",
                sql: "REPLACE INTO logins (email, username, salt, hash, is_admin, is_account, is_active, roles) VALUES (@email, @username, @salt, @hash, @is_admin, @is_account, @is_active, @roles)",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "from_server",
                sql: "INSERT OR IGNORE INTO logins (email, username, is_account, roles) VALUES (@email, @username, @is_account, @roles)",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "username",
                sql: "UPDATE logins SET username = @username WHERE email = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "password",
                sql: "UPDATE logins SET salt = @salt, hash = @hash WHERE email = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "roles",
                sql: "UPDATE logins SET roles = @roles WHERE email = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "is_account",
                sql: "UPDATE logins SET is_account = @is_account WHERE email = ?",
            },
        ],
        update_guards: &[
            GuardRule {
                column: "email",
                match_value: GuardMatch::Any,
                description: "allow an email change only for admins or logins not linked to a mailbox",
                test: "SELECT COUNT(email) AS count FROM logins WHERE (is_admin = 1 OR is_account = 0) AND email = ?",
                predicate: count_is_one,
                pass: "UPDATE logins SET email = @email WHERE email = ?",
                fail: "Cannot change the email of a mailbox-linked login.",
            },
            GuardRule {
                column: "is_admin",
                match_value: GuardMatch::Integer(0),
                description: "refuse to demote the last active admin",
                test: "SELECT COUNT(is_admin) AS count FROM logins WHERE is_active = 1 AND is_admin = 1 AND email IS NOT ?",
                predicate: count_positive,
                pass: "UPDATE logins SET is_admin = @is_admin WHERE email = ?",
                fail: "Cannot demote the last administrator, nobody would be left to administer mailstation.",
            },
            GuardRule {
                column: "is_admin",
                match_value: GuardMatch::Integer(1),
                description: "promoting to admin also unlinks the login from its mailbox",
                test: "SELECT COUNT(*) AS count FROM logins WHERE email = ?",
                predicate: always,
                pass: "UPDATE logins SET is_admin = @is_admin, is_account = 0 WHERE email = ?",
                fail: "Cannot promote this login.",
            },
            GuardRule {
                column: "is_active",
                match_value: GuardMatch::Integer(0),
                description: "refuse to deactivate the last active admin",
                test: "SELECT COUNT(is_active) AS count FROM logins WHERE is_active = 1 AND is_admin = 1 AND email IS NOT ?",
                predicate: count_positive,
                pass: "UPDATE logins SET is_active = @is_active WHERE email = ?",
                fail: "Cannot deactivate the last administrator, nobody would be left to administer mailstation.",
            },
            GuardRule {
                column: "is_active",
                match_value: GuardMatch::Any,
                description: "reactivation is always allowed",
                test: "SELECT COUNT(is_active) AS count FROM logins WHERE email = ?",
                predicate: always,
                pass: "UPDATE logins SET is_active = @is_active WHERE email = ?",
                fail: "Cannot change the active flag of this login.",
            },
            GuardRule {
                column: "is_account",
                match_value: GuardMatch::Integer(1),
                description: "linking a login to a mailbox also drops its admin flag",
                test: "SELECT COUNT(is_account) AS count FROM logins WHERE email = ?",
                predicate: always,
                pass: "UPDATE logins SET is_account = @is_account, is_admin = 0 WHERE email = ?",
                fail: "Cannot link this login to a mailbox.",
            },
        ],
        delete_guards: &[GuardRule {
            column: "email",
            match_value: GuardMatch::Any,
            description: "refuse to delete the last admin",
            test: "SELECT COUNT(is_admin) AS count FROM logins WHERE is_admin = 1 AND email IS NOT ?",
            predicate: count_positive,
            pass: "DELETE FROM logins WHERE email = ?",
            fail: "Cannot delete the last administrator, nobody would be left to administer mailstation.",
        }],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS logins (\n",
            "  id         INTEGER PRIMARY KEY,\n",
            "  email      TEXT NOT NULL UNIQUE,\n",
            "  username   TEXT NOT NULL UNIQUE,\n",
            "  salt       TEXT NOT NULL DEFAULT '',\n",
            "  hash       TEXT NOT NULL DEFAULT '',\n",
            "  is_admin   INTEGER NOT NULL DEFAULT 0,\n",
            "  is_active  INTEGER NOT NULL DEFAULT 1,\n",
            "  is_account INTEGER NOT NULL DEFAULT 0,\n",
            "  roles      TEXT NOT NULL DEFAULT '[]'\n",
            ");\n",
            // Seeded with empty credentials: the password must be set before
            // the account can log in.
            "INSERT OR IGNORE INTO logins (email, username, is_admin, is_active, is_account) VALUES ('admin@mailstation.local', 'admin', 1, 1, 0);\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_logins', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[
            Patch {
                target_version: "1.0.14",
                statements: &[
                    "ALTER TABLE logins DROP COLUMN password",
                    "ALTER TABLE logins ADD salt TEXT NOT NULL DEFAULT ''",
                    "ALTER TABLE logins ADD hash TEXT NOT NULL DEFAULT ''",
                ],
            },
            Patch {
                target_version: "1.1.6",
                statements: &[
                    "ALTER TABLE logins ADD is_admin INTEGER NOT NULL DEFAULT 0",
                    "ALTER TABLE logins ADD is_active INTEGER NOT NULL DEFAULT 1",
                    "UPDATE logins SET is_admin = 1 WHERE username = 'admin'",
                ],
            },
            Patch {
                target_version: "1.1.9",
                statements: &["ALTER TABLE logins ADD roles TEXT NOT NULL DEFAULT '[]'"],
            },
        ],
    },
    // ------------------------------------------------------------------
    // roles: login-to-mailbox grants per tenant.
    // ------------------------------------------------------------------
    TableDef {
        name: "roles",
        id_column: "username",
        scope_column: Some("scope"),
        columns: &[],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM roles WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "roles",
                sql: "SELECT username, mailbox FROM roles WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "username",
                sql: "SELECT username FROM roles WHERE scope = @scope AND mailbox = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "mailbox",
                sql: "SELECT mailbox FROM roles WHERE scope = @scope AND username = ?",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "role",
                sql: "REPLACE INTO roles (username, mailbox, scope) VALUES (@username, @mailbox, ?)",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "all",
                sql: "DELETE FROM roles",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "username",
                sql: "DELETE FROM roles WHERE scope = @scope AND username = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "mailbox",
                sql: "DELETE FROM roles WHERE scope = @scope AND mailbox = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "role",
                sql: "DELETE FROM roles WHERE scope = @scope AND username = ? AND mailbox = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS roles (\n",
            "  id       INTEGER PRIMARY KEY,\n",
            "  username TEXT NOT NULL,\n",
            "  mailbox  TEXT NOT NULL,\n",
            "  scope    TEXT NOT NULL,\n",
            "  UNIQUE (username, mailbox, scope)\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_roles', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[],
    },
    // ------------------------------------------------------------------
    // accounts: mailboxes on the managed mail server.
    // ------------------------------------------------------------------
    TableDef {
        name: "accounts",
        id_column: "mailbox",
        scope_column: Some("scope"),
        columns: &[
            ("password", ColumnType::Text),
            ("storage", ColumnType::Json),
            ("domain", ColumnType::Text),
        ],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM accounts WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "accounts",
                sql: "SELECT mailbox, domain, storage FROM accounts WHERE scope = @scope ORDER BY domain, mailbox",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "mailboxes",
                sql: "SELECT mailbox FROM accounts WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "mailbox",
                sql: "SELECT mailbox FROM accounts WHERE scope = @scope AND mailbox = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "by_domain",
                sql: "SELECT mailbox FROM accounts WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "salt_hash",
                sql: "SELECT salt, hash FROM accounts WHERE mailbox = @mailbox",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "from_server",
                sql: "REPLACE INTO accounts (mailbox, domain, storage, scope) VALUES (@mailbox, @domain, @storage, @scope)",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "from_admin",
                sql: "REPLACE INTO accounts (mailbox, domain, salt, hash, scope) VALUES (@mailbox, @domain, @salt, @hash, @scope)",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "password",
                sql: "UPDATE accounts SET salt = @salt, hash = @hash WHERE scope = @scope AND mailbox = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "storage",
                sql: "UPDATE accounts SET storage = @storage WHERE scope = @scope AND mailbox = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "domain",
                sql: "UPDATE accounts SET domain = @domain WHERE scope = @scope AND mailbox = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "mailbox",
                sql: "DELETE FROM accounts WHERE scope = @scope AND mailbox = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS accounts (\n",
            "  id      INTEGER PRIMARY KEY,\n",
            "  mailbox TEXT NOT NULL,\n",
            "  domain  TEXT NOT NULL DEFAULT '',\n",
            "  salt    TEXT NOT NULL DEFAULT '',\n",
            "  hash    TEXT NOT NULL DEFAULT '',\n",
            "  storage TEXT NOT NULL DEFAULT '{}',\n",
            "  scope   TEXT NOT NULL,\n",
            "  UNIQUE (mailbox, scope)\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_accounts', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[Patch {
            target_version: "1.1.3",
            statements: &["ALTER TABLE accounts ADD scope TEXT NOT NULL DEFAULT ''"],
        }],
    },
    // ------------------------------------------------------------------
    // aliases: forwarding rules, optionally regex-based.
    // ------------------------------------------------------------------
    TableDef {
        name: "aliases",
        id_column: "source",
        scope_column: Some("scope"),
        columns: &[
            ("destination", ColumnType::Text),
            ("regex", ColumnType::Integer),
        ],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM aliases WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "aliases",
                sql: "SELECT source, destination, regex FROM aliases WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "by_source",
                sql: "SELECT destination FROM aliases WHERE scope = @scope AND source = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "by_destination",
                sql: "SELECT source FROM aliases WHERE scope = @scope AND destination = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "regexes",
                sql: "SELECT source, destination FROM aliases WHERE regex = 1 AND scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "alias",
                sql: "REPLACE INTO aliases (source, destination, regex, scope) VALUES (@source, @destination, @regex, @scope)",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "destination",
                sql: "UPDATE aliases SET destination = @destination WHERE scope = @scope AND source = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "regex",
                sql: "UPDATE aliases SET regex = @regex WHERE scope = @scope AND source = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "source",
                sql: "DELETE FROM aliases WHERE scope = @scope AND source = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "destination",
                sql: "DELETE FROM aliases WHERE scope = @scope AND destination = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS aliases (\n",
            "  id          INTEGER PRIMARY KEY,\n",
            "  source      TEXT NOT NULL,\n",
            "  destination TEXT NOT NULL,\n",
            "  regex       INTEGER NOT NULL DEFAULT 0,\n",
            "  scope       TEXT NOT NULL,\n",
            "  UNIQUE (source, scope)\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_aliases', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[],
    },
    // ------------------------------------------------------------------
    // domains: managed mail domains and their DKIM material.
    // ------------------------------------------------------------------
    TableDef {
        name: "domains",
        id_column: "domain",
        scope_column: Some("scope"),
        columns: &[
            ("dkim", ColumnType::Text),
            ("keytype", ColumnType::Text),
            ("keysize", ColumnType::Text),
            ("path", ColumnType::Text),
        ],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM domains WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "domains",
                sql: "SELECT domain, dkim, keytype, keysize, path FROM domains WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "domain",
                sql: "SELECT domain, dkim, keytype, keysize, path FROM domains WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "dkims",
                sql: "SELECT DISTINCT dkim FROM domains WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "dkim",
                sql: "SELECT dkim FROM domains WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "domain",
                sql: "REPLACE INTO domains (domain, dkim, keytype, keysize, path, scope) VALUES (@domain, @dkim, @keytype, @keysize, @path, @scope)",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "dkim",
                sql: "UPDATE domains SET dkim = @dkim WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "keytype",
                sql: "UPDATE domains SET keytype = @keytype WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "keysize",
                sql: "UPDATE domains SET keysize = @keysize WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "path",
                sql: "UPDATE domains SET path = @path WHERE scope = @scope AND domain = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "domain",
                sql: "DELETE FROM domains WHERE scope = @scope AND domain = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS domains (\n",
            "  id      INTEGER PRIMARY KEY,\n",
            "  domain  TEXT NOT NULL UNIQUE,\n",
            "  dkim    TEXT NOT NULL DEFAULT 'mail',\n",
            "  keytype TEXT NOT NULL DEFAULT 'rsa',\n",
            "  keysize TEXT NOT NULL DEFAULT '2048',\n",
            "  path    TEXT NOT NULL DEFAULT '',\n",
            "  scope   TEXT NOT NULL\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_domains', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[
            Patch {
                target_version: "1.1.2",
                statements: &[
                    "ALTER TABLE domains ADD keytype TEXT NOT NULL DEFAULT 'rsa'",
                    "ALTER TABLE domains ADD keysize TEXT NOT NULL DEFAULT '2048'",
                ],
            },
            Patch {
                target_version: "1.1.3",
                statements: &["ALTER TABLE domains ADD scope TEXT NOT NULL DEFAULT ''"],
            },
        ],
    },
    // ------------------------------------------------------------------
    // dns: published DNS records (DKIM/SPF/DMARC TXT, MX) per tenant.
    // ------------------------------------------------------------------
    TableDef {
        name: "dns",
        id_column: "name",
        scope_column: Some("scope"),
        columns: &[
            ("value", ColumnType::Text),
            ("rtype", ColumnType::Text),
            ("ttl", ColumnType::Integer),
        ],
        statements: &[
            StatementDef {
                kind: StatementKind::Select,
                key: "count",
                sql: "SELECT COUNT(*) AS count FROM dns WHERE scope = @scope",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "records",
                sql: "SELECT name, rtype, value, ttl FROM dns WHERE scope = @scope ORDER BY name, rtype",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "by_name",
                sql: "SELECT rtype, value, ttl FROM dns WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Select,
                key: "by_type",
                sql: "SELECT name, value FROM dns WHERE scope = @scope AND rtype = ?",
            },
            StatementDef {
                kind: StatementKind::Insert,
                key: "record",
                sql: "REPLACE INTO dns (name, rtype, value, ttl, scope) VALUES (@name, @rtype, @value, @ttl, @scope)",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "value",
                sql: "UPDATE dns SET value = @value WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "rtype",
                sql: "UPDATE dns SET rtype = @rtype WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Update,
                key: "ttl",
                sql: "UPDATE dns SET ttl = @ttl WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "name",
                sql: "DELETE FROM dns WHERE scope = @scope AND name = ?",
            },
            StatementDef {
                kind: StatementKind::Delete,
                key: "record",
                sql: "DELETE FROM dns WHERE scope = @scope AND name = ? AND rtype = ?",
            },
        ],
        update_guards: &[],
        delete_guards: &[],
        init_script: concat!(
            "BEGIN TRANSACTION;\n",
            "CREATE TABLE IF NOT EXISTS dns (\n",
            "  id    INTEGER PRIMARY KEY,\n",
            "  name  TEXT NOT NULL,\n",
            "  rtype TEXT NOT NULL DEFAULT 'TXT',\n",
            "  value TEXT NOT NULL DEFAULT '',\n",
            "  ttl   INTEGER NOT NULL DEFAULT 3600,\n",
            "  scope TEXT NOT NULL,\n",
            "  UNIQUE (name, rtype, scope)\n",
            ");\n",
            "INSERT OR IGNORE INTO settings (name, value, scope, is_mutable) VALUES ('DB_VERSION_dns', '",
            env!("CARGO_PKG_VERSION"),
            "', 'mailstation', 0);\n",
            "COMMIT;"
        ),
        patches: &[Patch {
            target_version: "1.2.1",
            statements: &["ALTER TABLE dns ADD ttl INTEGER NOT NULL DEFAULT 3600"],
        }],
    },
];

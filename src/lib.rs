//! # mailstation-store
//!
//! Data-access core for the mailstation mail-server management tool.
//!
//! Mailstation keeps a small administrative dataset (accounts, aliases,
//! domains, DNS records, logins, per-tenant settings) in a local `SQLite`
//! database. This crate owns that database: it manages the single shared
//! connection, versions and migrates each logical table independently, and
//! enforces cross-row business invariants (for example "never remove the
//! last administrator") through guarded mutations layered on top of plain
//! statements.
//!
//! The HTTP/API surface, the mechanism that executes commands against the
//! remote mail-server process, the output parsers, and credential-hashing
//! primitives are external collaborators. They are consumed through the
//! traits in [`store::traits`] and never implemented here.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mailstation_store::{Store, StoreConfig};
//!
//! let store = Store::new(StoreConfig::new("mailstation.sqlite3"), hasher, runner);
//! store.init(false)?;
//! let admins = store.count("logins", None, None)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod store;

// Re-exports for convenience
pub use config::StoreConfig;
pub use store::connection::ConnectionManager;
pub use store::executor::{Params, QueryExecutor, Row, RunSummary};
pub use store::guard::{ColumnOutcome, MutationGuard, UpdateReport};
pub use store::migrate::MigrationEngine;
pub use store::registry::{ColumnType, GuardMatch, GuardRule, Patch, StatementKind, TableDef};
pub use store::traits::{CommandRunner, CredentialHasher, ExecOutput, SaltHash};
pub use store::Store;

/// Error type for store operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations. The variant is the error code callers branch on: the
/// migration engine treats a [`Error::Schema`] "no such column" failure as
/// "patch needed", and the mutation guard surfaces [`Error::GuardRejected`]
/// with the guard's fixed message.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty change sets, payloads with no updatable column |
/// | `Connection` | The database handle cannot be opened or is unusable |
/// | `Constraint` | A uniqueness or key conflict is reported by `SQLite` |
/// | `Schema` | A referenced table or column is missing or duplicated |
/// | `OperationFailed` | Any other statement or collaborator failure |
/// | `Validation` | A payload value does not match the declared column type |
/// | `GuardRejected` | A mutation would violate a business invariant |
/// | `UnknownTable` / `UnknownStatement` | A lookup for an unregistered table or statement (programmer error) |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - An empty change set is passed to `update_row`
    /// - No column of the change set is declared updatable
    /// - A statement references a named parameter the caller did not bind
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The connection handle is unusable.
    ///
    /// Triggers an automatic reopen; surfaced to the caller as a failure.
    /// Fatal only during startup initialization.
    #[error("connection error: {cause}")]
    Connection {
        /// The underlying cause.
        cause: String,
    },

    /// A uniqueness or key constraint was violated.
    #[error("constraint violation: {cause}")]
    Constraint {
        /// The underlying cause.
        cause: String,
    },

    /// A table or column is missing or duplicated.
    ///
    /// Fatal during initial table creation, treated as "patch needed"
    /// during upgrade, surfaced as a failure during normal queries.
    #[error("schema mismatch: {cause}")]
    Schema {
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - A statement fails for a reason outside the taxonomy above
    /// - A collaborator (command runner, hasher) reports a failure
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A payload value does not match the declared column type.
    ///
    /// Non-fatal and scoped to the one column; the rest of the change set
    /// continues to apply.
    #[error("validation failed for column '{column}': expected a {expected} value")]
    Validation {
        /// The offending column.
        column: String,
        /// The declared semantic type.
        expected: &'static str,
    },

    /// A guarded mutation was rejected.
    ///
    /// Carries the guard's fixed, human-readable reason.
    #[error("{0}")]
    GuardRejected(String),

    /// The table is not registered.
    ///
    /// Programmer error; should not occur in a correctly wired system.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// No statement is registered for the `(table, kind, key)` triple.
    ///
    /// Programmer error; should not occur in a correctly wired system.
    #[error("no {kind} statement '{key}' registered for table '{table}'")]
    UnknownStatement {
        /// The table the lookup targeted.
        table: String,
        /// The statement kind (select, insert, update, delete).
        kind: &'static str,
        /// The statement key.
        key: String,
    },
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

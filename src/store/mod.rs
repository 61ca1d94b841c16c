//! The data-access core.
//!
//! Components, leaves first:
//! - [`connection::ConnectionManager`]: owns the single storage handle
//! - [`executor::QueryExecutor`]: generic parameterized statement runner
//! - [`registry`]: static per-table schema metadata
//! - [`migrate::MigrationEngine`]: idempotent creation and versioned patching
//! - [`guard::MutationGuard`]: invariant-checked update/delete entry points
//!
//! [`Store`] wires them together over one shared connection and is the
//! surface external collaborators talk to.

pub mod connection;
pub mod credentials;
pub mod executor;
pub mod guard;
pub mod migrate;
pub mod registry;
pub mod traits;

use crate::config::StoreConfig;
use crate::Result;
use connection::ConnectionManager;
use credentials::Credentials;
use executor::{Params, QueryExecutor, Row, RunSummary};
use guard::{MutationGuard, UpdateReport};
use migrate::MigrationEngine;
use serde_json::Value;
use std::sync::Arc;
use traits::{CommandRunner, CredentialHasher};

/// The assembled data-access core.
///
/// Owns the shared connection and exposes the statement runner, the
/// migration engine and the guarded mutation entry points as one surface.
/// Collaborators for command execution and credential hashing are
/// injected at construction and never implemented here.
#[derive(Clone, Debug)]
pub struct Store {
    manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
    migrator: MigrationEngine,
    guard: MutationGuard,
}

impl Store {
    /// Assembles the core from its configuration and collaborators.
    #[must_use]
    pub fn new(
        config: StoreConfig,
        hasher: Arc<dyn CredentialHasher>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(config.database.clone()));
        let executor = QueryExecutor::new(Arc::clone(&manager));
        let migrator = MigrationEngine::new(executor.clone(), config);
        let credentials = Credentials::new(executor.clone(), hasher, runner);
        let guard = MutationGuard::new(executor.clone(), credentials);
        Self {
            manager,
            executor,
            migrator,
            guard,
        }
    }

    /// Initializes and upgrades the store; must run ahead of normal
    /// traffic.
    ///
    /// # Errors
    ///
    /// Any unresolved fatal condition here must abort the process before
    /// it serves a request: the core never runs against a partially
    /// initialized or unmigrated store.
    pub fn init(&self, reset: bool) -> Result<()> {
        self.migrator.init(reset)
    }

    /// Applies pending schema patches; safe to run repeatedly.
    ///
    /// # Errors
    ///
    /// See [`MigrationEngine::upgrade`].
    pub fn upgrade(&self) -> Result<()> {
        self.migrator.upgrade()
    }

    /// Executes a write statement, script, or transactional batch.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::run`].
    pub fn run(&self, sql: &str, params: Params<'_>, positional: &[Value]) -> Result<RunSummary> {
        self.executor.run(sql, params, positional)
    }

    /// Returns at most one row.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::get`].
    pub fn get(&self, sql: &str, named: &Row, positional: &[Value]) -> Result<Option<Row>> {
        self.executor.get(sql, named, positional)
    }

    /// Returns every matching row.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::all`].
    pub fn all(&self, sql: &str, named: &Row, positional: &[Value]) -> Result<Vec<Row>> {
        self.executor.all(sql, named, positional)
    }

    /// Counts rows via the table's declared count statement.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::count`].
    pub fn count(&self, table: &str, scope: Option<&str>, schema: Option<&str>) -> Result<i64> {
        self.executor.count(table, scope, schema)
    }

    /// Applies a guarded, per-column change set.
    ///
    /// # Errors
    ///
    /// See [`MutationGuard::update_row`].
    pub fn update_row(
        &self,
        table: &str,
        id: &str,
        changes: &Row,
        scope: Option<&str>,
    ) -> Result<UpdateReport> {
        self.guard.update_row(table, id, changes, scope)
    }

    /// Deletes a row through the guard for the given key.
    ///
    /// # Errors
    ///
    /// See [`MutationGuard::delete_entry`].
    pub fn delete_entry(
        &self,
        table: &str,
        id: &str,
        key: &str,
        scope: Option<&str>,
    ) -> Result<RunSummary> {
        self.guard.delete_entry(table, id, key, scope)
    }

    /// Sets a new password through the credential path.
    ///
    /// # Errors
    ///
    /// See [`Credentials::change_password`].
    pub fn change_password(
        &self,
        table: &str,
        id: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<String> {
        self.guard.credentials().change_password(table, id, password, scope)
    }

    /// Verifies a credential against its stored salted hash.
    ///
    /// # Errors
    ///
    /// See [`Credentials::verify_password`].
    pub fn verify_password(&self, table: &str, credential: &str, password: &str) -> Result<bool> {
        self.guard.credentials().verify_password(table, credential, password)
    }

    /// Reads a table's recorded schema version, for diagnostics.
    ///
    /// # Errors
    ///
    /// See [`MigrationEngine::recorded_version`].
    pub fn recorded_version(&self, table: &str) -> Result<Option<String>> {
        self.migrator.recorded_version(table)
    }

    /// Returns the shared connection manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Returns the statement runner.
    #[must_use]
    pub const fn executor(&self) -> &QueryExecutor {
        &self.executor
    }
}

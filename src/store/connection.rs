//! Shared connection handling for the store.
//!
//! One `SQLite` handle per process, guarded by a mutex with poison
//! recovery. WAL journaling allows concurrent readers alongside the single
//! writer; a failed operation marks the handle suspect and it is probed and
//! reopened before the error reaches the caller.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Helper to acquire the handle lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. This prevents cascading
/// failures when one operation panics.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("connection mutex was poisoned, recovering");
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for the store's access pattern.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits for locks instead of failing immediately
fn configure_connection(conn: &Connection) {
    // pragma_update returns the result which we ignore - journal_mode
    // returns a string like "wal" which would cause execute_batch to fail
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
}

/// Owner of the single shared database handle.
///
/// `open()` is idempotent, and every failed operation run through
/// [`ConnectionManager::with`] triggers a self-heal pass before the error
/// is surfaced: a handle stuck in a transaction or failing a trivial probe
/// is dropped and reopened. The handle is closed cleanly when the manager
/// is dropped.
pub struct ConnectionManager {
    /// The guarded handle; `None` until `open()` or first use.
    conn: Mutex<Option<Connection>>,
    /// Path to the database file.
    path: PathBuf,
}

impl ConnectionManager {
    /// Creates a manager for the given database path without opening it.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: Mutex::new(None),
            path: path.into(),
        }
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the database handle if it is not already open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the database cannot be opened. At
    /// startup this is fatal: initialization aborts entirely.
    pub fn open(&self) -> Result<()> {
        let mut guard = acquire_lock(&self.conn);
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        Ok(())
    }

    /// Closes the database handle if open.
    pub fn close(&self) {
        let mut guard = acquire_lock(&self.conn);
        if guard.take().is_some() {
            tracing::debug!(path = %self.path.display(), "closed database handle");
        }
    }

    /// Returns true if the handle is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        acquire_lock(&self.conn).is_some()
    }

    /// Runs `f` against the open handle, opening it on demand.
    ///
    /// On any failure the handle is treated as potentially invalid: it is
    /// probed and, if stuck or unusable, reopened before the error is
    /// returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`, or [`Error::Connection`] if no
    /// handle could be opened.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let outcome = {
            let mut guard = acquire_lock(&self.conn);
            if guard.is_none() {
                match self.connect() {
                    Ok(conn) => *guard = Some(conn),
                    Err(e) => return Err(e),
                }
            }
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(Error::Connection {
                    cause: "connection handle missing".to_string(),
                }),
            }
        };
        if outcome.is_err() {
            self.heal();
        }
        outcome
    }

    /// Probes the handle and reopens it if it is stale.
    ///
    /// A handle left inside a transaction by a failed script, or one that
    /// cannot answer `SELECT 1`, is dropped and replaced. Reopen failures
    /// are logged; the next operation will retry.
    fn heal(&self) {
        let mut guard = acquire_lock(&self.conn);
        let stale = match guard.as_ref() {
            Some(conn) => {
                !conn.is_autocommit()
                    || conn
                        .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                        .is_err()
            },
            None => true,
        };
        if !stale {
            return;
        }
        *guard = None;
        match self.connect() {
            Ok(conn) => {
                tracing::info!(path = %self.path.display(), "reopened stale database handle");
                *guard = Some(conn);
            },
            Err(e) => tracing::warn!(error = %e, "failed to reopen database handle"),
        }
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| Error::Connection {
            cause: e.to_string(),
        })?;
        configure_connection(&conn);
        tracing::debug!(path = %self.path.display(), "opened database handle");
        Ok(conn)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Dropping the inner Connection closes it cleanly.
        self.close();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

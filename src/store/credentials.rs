//! Credential updates and verification.
//!
//! Passwords never flow through the plain update path: they are hashed by
//! the injected [`CredentialHasher`], and for mailbox accounts the change
//! is first executed on the managed mail server through the injected
//! [`CommandRunner`] before the local row is touched.

use crate::store::executor::{Params, QueryExecutor, Row};
use crate::store::registry::{self, StatementKind};
use crate::store::traits::{CommandRunner, CredentialHasher, SaltHash};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;

/// Credential path shared by the mutation guard and direct callers.
#[derive(Clone)]
pub struct Credentials {
    executor: QueryExecutor,
    hasher: Arc<dyn CredentialHasher>,
    runner: Arc<dyn CommandRunner>,
}

impl Credentials {
    /// Creates the credential path over the shared executor and the
    /// injected collaborators.
    #[must_use]
    pub fn new(
        executor: QueryExecutor,
        hasher: Arc<dyn CredentialHasher>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            executor,
            hasher,
            runner,
        }
    }

    /// Sets a new password for `id` in `table`.
    ///
    /// For `accounts` the password is first changed on the mail server
    /// itself; the local row is only updated when that command succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] when the mail-server command
    /// reports a non-zero exit code, [`Error::InvalidInput`] when an
    /// account update lacks a scope, or the classified storage error.
    pub fn change_password(
        &self,
        table: &str,
        id: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<String> {
        let def = registry::table(table)?;
        let SaltHash { salt, hash } = self.hasher.hash(password, None)?;

        if table == "accounts" {
            let target = scope.ok_or_else(|| {
                Error::InvalidInput("account password updates require a scope".to_string())
            })?;
            tracing::debug!(id, target, "updating mailbox password on the server");
            let output = self.runner.exec(&format!("email update {id} password"), target)?;
            if output.returncode != 0 {
                tracing::error!(id, target, stderr = %output.stderr, "server password update failed");
                return Err(Error::OperationFailed {
                    operation: "email update".to_string(),
                    cause: output.stderr,
                });
            }
        }

        let sql = def.statement(StatementKind::Update, "password")?;
        let mut named = Row::new();
        named.insert("salt".to_string(), Value::String(salt));
        named.insert("hash".to_string(), Value::String(hash));
        named.insert(
            "scope".to_string(),
            scope.map_or(Value::Null, |s| Value::String(s.to_string())),
        );
        self.executor
            .run(sql, Params::Single(&named), &[Value::String(id.to_string())])?;
        tracing::info!(table, id, "password updated");
        Ok(format!("Password updated for {id} in {table}"))
    }

    /// Verifies `credential`/`password` against the stored salted hash.
    ///
    /// An unknown credential, or one with no password set yet, verifies
    /// false rather than erroring.
    ///
    /// # Errors
    ///
    /// Returns the classified storage error or a hasher failure.
    pub fn verify_password(&self, table: &str, credential: &str, password: &str) -> Result<bool> {
        let def = registry::table(table)?;
        let sql = def.statement(StatementKind::Select, "salt_hash")?;
        let mut named = Row::new();
        for key in ["email", "username", "mailbox"] {
            named.insert(key.to_string(), Value::String(credential.to_string()));
        }
        let Some(row) = self.executor.get(sql, &named, &[])? else {
            tracing::debug!(table, credential, "credential not found");
            return Ok(false);
        };
        let salt = row.get("salt").and_then(Value::as_str).unwrap_or_default();
        let hash = row.get("hash").and_then(Value::as_str).unwrap_or_default();
        if salt.is_empty() || hash.is_empty() {
            tracing::debug!(table, credential, "no password set");
            return Ok(false);
        }
        self.hasher.verify(
            password,
            &SaltHash {
                salt: salt.to_string(),
                hash: hash.to_string(),
            },
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

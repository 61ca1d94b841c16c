//! Invariant-checked update and delete entry points.
//!
//! Business invariants like "never remove the last administrator" cannot
//! be expressed as column constraints, so mutations on guarded columns go
//! through a test-then-act gate: the guard's read-only test runs first,
//! its predicate decides, and only then does the mutation statement run.
//! Guard selection is by exact value first, then wildcard, else the column
//! is unguarded and updated with its plain registered statement.
//!
//! Updates apply per column with partial-failure semantics: one column
//! failing validation or a guard check does not stop the others, and the
//! aggregated report carries every column's outcome.
//!
//! Test and act are two separate round trips with no row lock held in
//! between; a concurrent writer process could invalidate the precondition
//! in that gap. The intended deployment has a single writer process, which
//! is what makes this acceptable.

use crate::config::CREDENTIAL_COLUMN;
use crate::store::credentials::Credentials;
use crate::store::executor::{Params, QueryExecutor, Row, RunSummary};
use crate::store::registry::{self, GuardRule, StatementKind, TableDef};
use crate::{Error, Result};
use serde_json::{json, Value};
use tracing::instrument;

/// Outcome of one column of an update.
#[derive(Debug, Clone)]
pub struct ColumnOutcome {
    /// The column the outcome belongs to.
    pub column: String,
    /// Whether the column was mutated.
    pub applied: bool,
    /// Human-readable outcome, a guard's fixed reason when rejected.
    pub detail: String,
}

/// Aggregated result of an update.
///
/// `success` is true only when every surviving column applied; the
/// message concatenates each column's outcome either way.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// Whether every column applied.
    pub success: bool,
    /// Concatenated per-column outcome strings.
    pub message: String,
    /// Individual outcomes in processing order.
    pub outcomes: Vec<ColumnOutcome>,
}

impl UpdateReport {
    fn from_outcomes(outcomes: Vec<ColumnOutcome>) -> Self {
        let success = outcomes.iter().all(|o| o.applied);
        let message = outcomes
            .iter()
            .map(|o| o.detail.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            success,
            message,
            outcomes,
        }
    }
}

/// Guarded mutation entry points over the shared executor.
#[derive(Clone, Debug)]
pub struct MutationGuard {
    executor: QueryExecutor,
    credentials: Credentials,
}

impl MutationGuard {
    /// Creates the guard over the shared executor and credential path.
    #[must_use]
    pub const fn new(executor: QueryExecutor, credentials: Credentials) -> Self {
        Self {
            executor,
            credentials,
        }
    }

    /// Returns the credential path.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Applies a change set to the row identified by `id`.
    ///
    /// Columns not declared for the table are discarded. Each surviving
    /// column is validated against its declared type, routed through its
    /// guard when one matches, and otherwise updated with its plain
    /// registered statement. A change to the credential column routes the
    /// whole call to the credential path and stops the batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTable`] for unregistered tables and
    /// [`Error::InvalidInput`] when the change set is empty or nothing in
    /// it is updatable. Per-column failures do not error; they are
    /// reported in the returned [`UpdateReport`].
    #[instrument(skip(self, changes))]
    pub fn update_row(
        &self,
        table: &str,
        id: &str,
        changes: &Row,
        scope: Option<&str>,
    ) -> Result<UpdateReport> {
        let def = registry::table(table)?;
        if changes.is_empty() {
            return Err(Error::InvalidInput("nothing to modify was passed".to_string()));
        }

        // Keep only the columns declared updatable for this table.
        let valid: Vec<(&String, &Value)> = changes
            .iter()
            .filter(|(column, _)| def.column_type(column).is_some())
            .collect();
        if valid.is_empty() {
            tracing::error!(table, "change set contains no updatable column");
            return Err(Error::InvalidInput(
                "change set contains no updatable column".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(valid.len());
        for (column, value) in valid {
            let Some(ty) = def.column_type(column) else {
                continue;
            };

            if !ty.accepts(value) {
                let err = Error::Validation {
                    column: column.clone(),
                    expected: ty.label(),
                };
                tracing::error!(table, column, "{err}");
                outcomes.push(ColumnOutcome {
                    column: column.clone(),
                    applied: false,
                    detail: err.to_string(),
                });
                continue;
            }

            // The credential column takes over the whole call.
            if column == CREDENTIAL_COLUMN {
                let password = value.as_str().unwrap_or_default();
                match self.credentials.change_password(table, id, password, scope) {
                    Ok(message) => outcomes.push(ColumnOutcome {
                        column: column.clone(),
                        applied: true,
                        detail: message,
                    }),
                    Err(e) => outcomes.push(ColumnOutcome {
                        column: column.clone(),
                        applied: false,
                        detail: e.to_string(),
                    }),
                }
                break;
            }

            let outcome = if let Some(rule) = def.update_guard(column, value) {
                self.apply_guarded_update(def, rule, column, value, id, scope)
            } else {
                self.apply_plain_update(def, column, value, id, scope)
            };
            outcomes.push(outcome);
        }

        Ok(UpdateReport::from_outcomes(outcomes))
    }

    /// Deletes the row identified by `id` through the delete statement
    /// registered for `key`.
    ///
    /// When a guard is registered for the key, its test must pass before
    /// the delete runs; the guard's fixed reason is returned otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GuardRejected`] when the guard's predicate
    /// rejects, [`Error::UnknownStatement`] when no delete is registered
    /// for `key`, or the classified storage error.
    #[instrument(skip(self))]
    pub fn delete_entry(
        &self,
        table: &str,
        id: &str,
        key: &str,
        scope: Option<&str>,
    ) -> Result<RunSummary> {
        let def = registry::table(table)?;
        let named = scoped_params(scope);

        if let Some(rule) = def.delete_guard(key, id) {
            let count = self.guard_test_count(rule, &named, id)?;
            if !(rule.predicate)(count) {
                tracing::error!(table, id, "{}", rule.fail);
                return Err(Error::GuardRejected(rule.fail.to_string()));
            }
            let summary = self
                .executor
                .run(rule.pass, Params::Single(&named), &[json!(id)])?;
            tracing::info!(table, id, "entry deleted");
            return Ok(summary);
        }

        let sql = def.statement(StatementKind::Delete, key)?;
        let summary = self.executor.run(sql, Params::Single(&named), &[json!(id)])?;
        tracing::info!(table, id, "entry deleted");
        Ok(summary)
    }

    fn apply_guarded_update(
        &self,
        def: &TableDef,
        rule: &GuardRule,
        column: &str,
        value: &Value,
        id: &str,
        scope: Option<&str>,
    ) -> ColumnOutcome {
        let mut named = scoped_params(scope);
        named.insert(column.to_string(), value.clone());

        let count = match self.guard_test_count(rule, &named, id) {
            Ok(count) => count,
            Err(e) => {
                return ColumnOutcome {
                    column: column.to_string(),
                    applied: false,
                    detail: format!("column '{column}': {e}"),
                };
            },
        };
        tracing::debug!(
            table = def.name,
            column,
            count,
            guard = rule.description,
            "guard test evaluated"
        );

        if !(rule.predicate)(count) {
            tracing::error!(table = def.name, column, "{}", rule.fail);
            return ColumnOutcome {
                column: column.to_string(),
                applied: false,
                detail: rule.fail.to_string(),
            };
        }

        match self.executor.run(rule.pass, Params::Single(&named), &[json!(id)]) {
            Ok(_) => {
                tracing::info!(table = def.name, id, column, "updated");
                ColumnOutcome {
                    column: column.to_string(),
                    applied: true,
                    detail: format!("updated {column}"),
                }
            },
            Err(e) => ColumnOutcome {
                column: column.to_string(),
                applied: false,
                detail: format!("column '{column}': {e}"),
            },
        }
    }

    fn apply_plain_update(
        &self,
        def: &TableDef,
        column: &str,
        value: &Value,
        id: &str,
        scope: Option<&str>,
    ) -> ColumnOutcome {
        let sql = match def.statement(StatementKind::Update, column) {
            Ok(sql) => sql,
            Err(e) => {
                tracing::error!(table = def.name, column, "{e}");
                return ColumnOutcome {
                    column: column.to_string(),
                    applied: false,
                    detail: e.to_string(),
                };
            },
        };

        // JSON columns are stored serialized.
        let bound = if value.is_object() || value.is_array() {
            Value::String(value.to_string())
        } else {
            value.clone()
        };
        let mut named = scoped_params(scope);
        named.insert(column.to_string(), bound);

        match self.executor.run(sql, Params::Single(&named), &[json!(id)]) {
            Ok(_) => {
                tracing::info!(table = def.name, id, column, "updated");
                ColumnOutcome {
                    column: column.to_string(),
                    applied: true,
                    detail: format!("updated {column}"),
                }
            },
            Err(e) => ColumnOutcome {
                column: column.to_string(),
                applied: false,
                detail: format!("column '{column}': {e}"),
            },
        }
    }

    fn guard_test_count(&self, rule: &GuardRule, named: &Row, id: &str) -> Result<i64> {
        let row = self.executor.get(rule.test, named, &[json!(id)])?;
        Ok(row
            .and_then(|r| r.get("count").and_then(Value::as_i64))
            .unwrap_or(0))
    }
}

/// Named parameters carrying the scope; harmless for statements that do
/// not reference it.
fn scoped_params(scope: Option<&str>) -> Row {
    let mut named = Row::new();
    named.insert(
        "scope".to_string(),
        scope.map_or(Value::Null, |s| Value::String(s.to_string())),
    );
    named
}

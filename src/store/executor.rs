//! Generic parameterized statement runner.
//!
//! All statement execution funnels through here: single statements with a
//! mix of named (`@name`) and trailing positional (`?`) placeholders,
//! multi-statement transactional scripts, and bulk writes where a whole
//! sequence of parameter sets is applied in one transaction with
//! rollback-on-first-error.
//!
//! `SQLite` failures are classified into the crate error taxonomy here, so
//! the migration engine and mutation guard can branch on "constraint
//! violation" vs. "schema mismatch" vs. everything else. Every failure also
//! triggers a connection self-heal pass before the error is surfaced.

use crate::store::connection::ConnectionManager;
use crate::store::registry::{self, StatementKind};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// A dynamic result row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of rows changed.
    pub changes: usize,
    /// Rowid of the last inserted row.
    pub last_insert_rowid: i64,
}

/// Parameter sets accepted by [`QueryExecutor::run`].
#[derive(Debug, Clone, Copy)]
pub enum Params<'p> {
    /// No named parameters.
    Empty,
    /// One named-parameter set.
    Single(&'p Row),
    /// A sequence of named-parameter sets, applied as one transaction:
    /// either every row is applied or, on the first failure, none are.
    Batch(&'p [Row]),
}

#[allow(clippy::unwrap_used)]
static SCHEMA_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)no such table|no such column|duplicate column name|has no column named|already exists")
        .unwrap()
});

/// Converts a `rusqlite` failure into the crate error taxonomy.
pub(crate) fn classify(operation: &str, err: &rusqlite::Error) -> Error {
    let cause = err.to_string();
    if let rusqlite::Error::SqliteFailure(e, _) = err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation {
            return Error::Constraint { cause };
        }
        if matches!(
            e.code,
            rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::NotADatabase
                | rusqlite::ErrorCode::DatabaseCorrupt
        ) {
            return Error::Connection { cause };
        }
    }
    if SCHEMA_ERROR.is_match(&cause) {
        return Error::Schema { cause };
    }
    Error::OperationFailed {
        operation: operation.to_string(),
        cause,
    }
}

/// Binds one JSON value to a statement slot.
fn bind_value(
    stmt: &mut rusqlite::Statement<'_>,
    index: usize,
    value: &Value,
) -> rusqlite::Result<()> {
    match value {
        Value::Null => stmt.raw_bind_parameter(index, rusqlite::types::Null),
        Value::Bool(b) => stmt.raw_bind_parameter(index, i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                stmt.raw_bind_parameter(index, i)
            } else {
                stmt.raw_bind_parameter(index, n.as_f64().unwrap_or(0.0))
            }
        },
        Value::String(s) => stmt.raw_bind_parameter(index, s.as_str()),
        // Objects and arrays are stored serialized.
        other => stmt.raw_bind_parameter(index, other.to_string()),
    }
}

/// Binds every slot of a prepared statement.
///
/// Named slots (`@name`) resolve from the named-parameter set; extra named
/// parameters that the statement does not reference are ignored. Bare `?`
/// slots consume the positional values in order.
fn bind_all(
    stmt: &mut rusqlite::Statement<'_>,
    named: Option<&Row>,
    positional: &[Value],
) -> Result<()> {
    let slots: Vec<Option<String>> = (1..=stmt.parameter_count())
        .map(|i| stmt.parameter_name(i).map(str::to_owned))
        .collect();
    let mut remaining = positional.iter();
    for (offset, slot) in slots.iter().enumerate() {
        let index = offset + 1;
        match slot {
            Some(name) => {
                let key = name.trim_start_matches(['@', ':', '$']);
                let value = named.and_then(|map| map.get(key)).ok_or_else(|| {
                    Error::InvalidInput(format!("missing named parameter '{name}'"))
                })?;
                bind_value(stmt, index, value).map_err(|e| classify("bind", &e))?;
            },
            None => {
                let value = remaining.next().ok_or_else(|| {
                    Error::InvalidInput(format!("missing positional parameter #{index}"))
                })?;
                bind_value(stmt, index, value).map_err(|e| classify("bind", &e))?;
            },
        }
    }
    Ok(())
}

/// Converts the current row into a JSON map.
fn row_to_map(row: &rusqlite::Row<'_>, columns: &[String]) -> Result<Row> {
    let mut map = Map::new();
    for (i, name) in columns.iter().enumerate() {
        let value = match row.get_ref(i).map_err(|e| classify("decode", &e))? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Number(Number::from(n)),
            ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

/// Runs parameterized statements against the shared connection.
#[derive(Clone, Debug)]
pub struct QueryExecutor {
    manager: Arc<ConnectionManager>,
}

impl QueryExecutor {
    /// Creates an executor over the shared connection manager.
    #[must_use]
    pub const fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Returns the underlying connection manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Executes a write statement.
    ///
    /// Three shapes are supported:
    /// - a multi-statement transactional script (leading `BEGIN`) runs as
    ///   one atomic unit,
    /// - [`Params::Batch`] wraps the whole sequence in a single
    ///   transaction with rollback on the first failure,
    /// - otherwise a single statement with mixed named and trailing
    ///   positional placeholders.
    ///
    /// # Errors
    ///
    /// Returns the classified storage error; the connection is healed
    /// before it is surfaced.
    pub fn run(&self, sql: &str, params: Params<'_>, positional: &[Value]) -> Result<RunSummary> {
        if is_script(sql) {
            return self.run_script(sql);
        }
        match params {
            Params::Batch(rows) => self.run_batch(sql, rows, positional),
            Params::Single(row) => self.run_single(sql, Some(row), positional),
            Params::Empty => self.run_single(sql, None, positional),
        }
    }

    /// Returns at most one row; `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns the classified storage error. "No row found" is not an
    /// error.
    pub fn get(&self, sql: &str, named: &Row, positional: &[Value]) -> Result<Option<Row>> {
        tracing::debug!(sql, "get");
        self.manager.with(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| classify("get", &e))?;
            bind_all(&mut stmt, Some(named), positional)?;
            let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
            let mut rows = stmt.raw_query();
            match rows.next().map_err(|e| classify("get", &e))? {
                Some(row) => Ok(Some(row_to_map(row, &columns)?)),
                None => Ok(None),
            }
        })
    }

    /// Returns every matching row in statement order; empty when nothing
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns the classified storage error.
    pub fn all(&self, sql: &str, named: &Row, positional: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(sql, "all");
        self.manager.with(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| classify("all", &e))?;
            bind_all(&mut stmt, Some(named), positional)?;
            let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
            let mut rows = stmt.raw_query();
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| classify("all", &e))? {
                out.push(row_to_map(row, &columns)?);
            }
            Ok(out)
        })
    }

    /// Counts rows using the table's declared count statement.
    ///
    /// Scope and schema filters apply only when the table declares a scope
    /// column; a schema filter additionally requires the table to register
    /// a schema-filtered count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTable`] for unregistered tables, or the
    /// classified storage error.
    pub fn count(&self, table: &str, scope: Option<&str>, schema: Option<&str>) -> Result<i64> {
        let def = registry::table(table)?;
        let mut named = Row::new();
        let mut key = "count";
        if def.scope_column.is_some() {
            if let Some(scope) = scope {
                named.insert("scope".to_string(), Value::String(scope.to_string()));
            }
            if let Some(schema) = schema {
                if def.has_statement(StatementKind::Select, "count_schema") {
                    named.insert("schema".to_string(), Value::String(schema.to_string()));
                    key = "count_schema";
                } else {
                    tracing::debug!(table, "schema filter ignored, no filtered count declared");
                }
            }
        }
        let sql = def.statement(StatementKind::Select, key)?;
        let row = self.get(sql, &named, &[])?;
        Ok(row
            .and_then(|r| r.get("count").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    fn run_script(&self, sql: &str) -> Result<RunSummary> {
        tracing::debug!(sql, "run script");
        self.manager.with(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| classify("run_script", &e))?;
            Ok(RunSummary {
                changes: conn.changes() as usize,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
    }

    fn run_single(&self, sql: &str, named: Option<&Row>, positional: &[Value]) -> Result<RunSummary> {
        tracing::debug!(sql, "run");
        self.manager.with(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| classify("run", &e))?;
            bind_all(&mut stmt, named, positional)?;
            let changes = stmt.raw_execute().map_err(|e| classify("run", &e))?;
            Ok(RunSummary {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
    }

    fn run_batch(&self, sql: &str, rows: &[Row], positional: &[Value]) -> Result<RunSummary> {
        tracing::debug!(sql, rows = rows.len(), "run batch");
        self.manager.with(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| classify("run_batch", &e))?;
            let mut changes = 0;
            {
                let mut stmt = tx.prepare(sql).map_err(|e| classify("run_batch", &e))?;
                for row in rows {
                    bind_all(&mut stmt, Some(row), positional)?;
                    changes += stmt.raw_execute().map_err(|e| classify("run_batch", &e))?;
                }
            }
            tx.commit().map_err(|e| classify("run_batch", &e))?;
            Ok(RunSummary {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
    }
}

fn is_script(sql: &str) -> bool {
    sql.trim_start()
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("BEGIN"))
}

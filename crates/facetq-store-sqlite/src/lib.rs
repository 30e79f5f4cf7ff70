//! SQLite store collaborator
//!
//! Executes engine statements against a SQLite database:
//!
//! ```text
//! ┌──────────────┐  Statement   ┌─────────────────┐  :name binds  ┌──────────┐
//! │ QueryEngine  │─────────────►│  SqliteStore    │──────────────►│  SQLite  │
//! │              │◄─────────────│ (blocking pool) │◄──────────────│          │
//! └──────────────┘  Vec<Row>    └─────────────────┘   rows        └──────────┘
//! ```
//!
//! One connection behind a mutex; every call runs on tokio's blocking pool.
//! Column names are lower-cased in result rows. Schema bootstrap and fixture
//! loading live in [`ddl`].

pub mod ddl;


use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql};
use serde_json::{Number, Value};

use facetq_core::store::{Row, SqlValue, Statement, Store};
use facetq_core::StoreError;

pub use ddl::FixtureCounts;

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Unavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "sqlite database opened");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(store_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn run_query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        let statement = statement.clone();
        self.blocking(move |conn| query_rows(conn, &statement)).await
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        let statement = statement.clone();
        self.blocking(move |conn| execute_statement(conn, &statement))
            .await
    }
}

// ============================================================================
// Statement execution
// ============================================================================

pub(crate) fn query_rows(conn: &Connection, statement: &Statement) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(&statement.text).map_err(store_error)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|c| c.to_lowercase())
        .collect();
    let values = bound_values(&stmt, statement)?;
    let named: Vec<(&str, &dyn ToSql)> = values
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();

    let mut rows = stmt.query(named.as_slice()).map_err(store_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(store_error)? {
        let mut map = Row::new();
        for (i, column) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(store_error)?;
            map.insert(column.clone(), json_value(value));
        }
        out.push(map);
    }
    Ok(out)
}

pub(crate) fn execute_statement(conn: &Connection, statement: &Statement) -> Result<u64, StoreError> {
    let mut stmt = conn.prepare(&statement.text).map_err(store_error)?;
    let values = bound_values(&stmt, statement)?;
    let named: Vec<(&str, &dyn ToSql)> = values
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();
    let affected = stmt.execute(named.as_slice()).map_err(store_error)?;
    Ok(affected as u64)
}

/// `:name` keyed values for the parameters the prepared statement declares.
fn bound_values(
    stmt: &rusqlite::Statement<'_>,
    statement: &Statement,
) -> Result<Vec<(String, SqliteValue)>, StoreError> {
    let mut out = Vec::with_capacity(statement.params.len());
    for (name, value) in &statement.params {
        let key = format!(":{name}");
        if stmt.parameter_index(&key).map_err(store_error)?.is_none() {
            tracing::debug!(param = %name, "bound parameter not referenced by statement");
            continue;
        }
        out.push((key, sqlite_value(value)));
    }
    Ok(out)
}

fn sqlite_value(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(i) => SqliteValue::Integer(*i),
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::IntList(ids) => SqliteValue::Text(SqlValue::json_array(ids)),
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Map a driver error, leaving the statement text out of the message.
pub(crate) fn store_error(err: rusqlite::Error) -> StoreError {
    let message = match &err {
        rusqlite::Error::SqlInputError { msg, offset, .. } => format!("{msg} (at offset {offset})"),
        other => other.to_string(),
    };
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Constraint(message),
        Some(ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StoreError::Unavailable(message)
        }
        _ => StoreError::Statement(message),
    }
}

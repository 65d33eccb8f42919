#![forbid(unsafe_code)]
//! Core traits and types for the `unitwork` session/transaction coordinator.
//! This crate is database-agnostic and should not contain any backend-specific logic.

// Re-export for downstream trait implementations.
pub use async_trait::async_trait;

pub mod session;

pub use session::{Session, SessionFactory};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A backend-agnostic representation of a database parameter or column value.
/// This is used to pass values between callers and backend adapters without
/// making `unitwork_core` dependent on a specific database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Null,
}

/// A SQL statement plus its bound parameters, treated as opaque by the
/// coordinator and interpreted only by the backend adapter.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<ParamValue>,
}

impl Statement {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params<S: Into<String>>(sql: S, params: Vec<ParamValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// A single result row. Column names are shared across all rows of one result
/// set, so they are stored behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<ParamValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<ParamValue>) -> Self {
        Self { columns, values }
    }

    /// Value of the named column, or `None` if the result set has no such column.
    pub fn get(&self, column: &str) -> Option<&ParamValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[ParamValue] {
        &self.values
    }
}

/// The outcome of executing one [`Statement`]: result rows for queries,
/// an affected-row count for DML.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryOutcome {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            rows_affected: 0,
        }
    }

    /// First column of the first row as an integer. Convenience for
    /// `SELECT COUNT(*)`-style queries.
    pub fn scalar_i64(&self) -> Option<i64> {
        match self.rows.first().and_then(|r| r.values().first()) {
            Some(ParamValue::I64(v)) => Some(*v),
            Some(ParamValue::I32(v)) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

/// Opaque handle identifying one session, minted from a process-wide counter
/// at session creation. Usable as a map key; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Mint the next session handle. Called by backend adapters when a new
    /// session is opened.
    pub fn mint() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Failure surface of the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Opaque driver failure (query execution, constraint violation,
    /// connectivity loss), wrapped with the original error as cause.
    #[error("database error")]
    Database {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A failure raised by caller code inside a scoped block. The original
    /// error is carried unchanged as the source so callers can downcast it.
    #[error("application error")]
    Application {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A scoped operation was attempted with no resolvable unit of work.
    #[error("no scope is active for the current task")]
    NoScope,
    /// An ambient-context lookup found no installed manager.
    #[error("no database manager installed in the ambient context")]
    NoAmbientManager,
}

impl DbError {
    /// Wrap a driver error.
    pub fn database<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DbError::Database {
            source: Box::new(e),
        }
    }

    /// Wrap an application error raised inside a scoped block.
    pub fn application<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DbError::Application {
            source: Box::new(e),
        }
    }
}

/// Convenience alias for results returned by coordinator operations.
pub type DbResult<T> = Result<T, DbError>;

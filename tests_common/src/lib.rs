#![forbid(unsafe_code)]
//! Shared test backend: a recording, scriptable session factory used by the
//! coordinator's tests instead of a real database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use unitwork_core::{
    DbError, DbResult, ParamValue, QueryOutcome, Row, Session, SessionFactory, SessionId,
    Statement,
};

/// Everything a mock session does, in the order it happened across all
/// sessions of one factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SessionCreated(SessionId),
    Begin(SessionId),
    Commit(SessionId),
    Rollback(SessionId),
    Close(SessionId),
    Execute(SessionId, String),
}

#[derive(Default)]
struct Script {
    fail_sql: Vec<String>,
    responses: HashMap<String, QueryOutcome>,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    fail_close: bool,
}

/// A scriptable [`SessionFactory`] that records every session operation.
#[derive(Clone, Default)]
pub struct MockFactory {
    events: Arc<Mutex<Vec<Event>>>,
    script: Arc<Mutex<Script>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `execute` fail with a driver error for this exact SQL.
    pub fn fail_on(&self, sql: &str) {
        self.script.lock().unwrap().fail_sql.push(sql.to_string());
    }

    /// Canned outcome returned by `execute` for this exact SQL.
    pub fn respond(&self, sql: &str, outcome: QueryOutcome) {
        self.script
            .lock()
            .unwrap()
            .responses
            .insert(sql.to_string(), outcome);
    }

    pub fn fail_begin(&self) {
        self.script.lock().unwrap().fail_begin = true;
    }

    pub fn fail_commit(&self) {
        self.script.lock().unwrap().fail_commit = true;
    }

    pub fn fail_rollback(&self) {
        self.script.lock().unwrap().fail_rollback = true;
    }

    pub fn fail_close(&self) {
        self.script.lock().unwrap().fail_close = true;
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.count(|e| matches!(e, Event::SessionCreated(_)))
    }

    pub fn begin_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin(_)))
    }

    pub fn commit_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollback_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn close_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Close(_)))
    }

    /// SQL texts in execution order, across all sessions.
    pub fn executed(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Execute(_, sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(*e)).count()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn new_session(&self) -> DbResult<Arc<dyn Session>> {
        let id = SessionId::mint();
        self.record(Event::SessionCreated(id));
        Ok(Arc::new(MockSession {
            id,
            events: Arc::clone(&self.events),
            script: Arc::clone(&self.script),
            in_tx: AtomicBool::new(false),
        }))
    }
}

/// The driver-shaped error produced by scripted failures.
#[derive(Debug)]
pub struct ScriptedFailure(pub String);

impl fmt::Display for ScriptedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scripted failure: {}", self.0)
    }
}

impl std::error::Error for ScriptedFailure {}

pub struct MockSession {
    id: SessionId,
    events: Arc<Mutex<Vec<Event>>>,
    script: Arc<Mutex<Script>>,
    in_tx: AtomicBool,
}

impl MockSession {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn refuse(&self, op: &str) -> DbError {
        DbError::database(ScriptedFailure(op.to_string()))
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn begin(&self) -> DbResult<()> {
        self.record(Event::Begin(self.id));
        if self.script.lock().unwrap().fail_begin {
            return Err(self.refuse("begin"));
        }
        self.in_tx.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> DbResult<()> {
        self.record(Event::Commit(self.id));
        if self.script.lock().unwrap().fail_commit {
            return Err(self.refuse("commit"));
        }
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.record(Event::Rollback(self.id));
        if self.script.lock().unwrap().fail_rollback {
            return Err(self.refuse("rollback"));
        }
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.record(Event::Close(self.id));
        if self.script.lock().unwrap().fail_close {
            return Err(self.refuse("close"));
        }
        Ok(())
    }

    async fn execute(&self, statement: Statement) -> DbResult<QueryOutcome> {
        self.record(Event::Execute(self.id, statement.sql.clone()));
        let script = self.script.lock().unwrap();
        if script.fail_sql.iter().any(|s| s == &statement.sql) {
            return Err(DbError::database(ScriptedFailure(statement.sql)));
        }
        Ok(script
            .responses
            .get(&statement.sql)
            .cloned()
            .unwrap_or_default())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }
}

/// Outcome carrying a single integer scalar, as a COUNT query would return.
pub fn count_outcome(n: i64) -> QueryOutcome {
    let columns: Arc<[String]> = vec!["count".to_string()].into();
    QueryOutcome::from_rows(vec![Row::new(columns, vec![ParamValue::I64(n)])])
}

/// Outcome with `n` one-column rows, for list queries.
pub fn rows_outcome(n: usize) -> QueryOutcome {
    let columns: Arc<[String]> = vec!["id".to_string()].into();
    let rows = (0..n)
        .map(|i| Row::new(Arc::clone(&columns), vec![ParamValue::I64(i as i64)]))
        .collect();
    QueryOutcome::from_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_session_records_operations_in_order() {
        let factory = MockFactory::new();
        let session = factory.new_session().await.unwrap();
        session.begin().await.unwrap();
        session.execute("SELECT 1".into()).await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();

        let id = session.id();
        assert_eq!(
            factory.events(),
            vec![
                Event::SessionCreated(id),
                Event::Begin(id),
                Event::Execute(id, "SELECT 1".to_string()),
                Event::Commit(id),
                Event::Close(id),
            ]
        );
    }

    #[tokio::test]
    async fn scripted_failures_surface_as_database_errors() {
        let factory = MockFactory::new();
        factory.fail_on("SELECT boom");
        let session = factory.new_session().await.unwrap();
        let err = session.execute("SELECT boom".into()).await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
    }

    #[tokio::test]
    async fn canned_responses_are_returned() {
        let factory = MockFactory::new();
        factory.respond("SELECT COUNT(*) FROM t", count_outcome(9));
        let session = factory.new_session().await.unwrap();
        let outcome = session.execute("SELECT COUNT(*) FROM t".into()).await.unwrap();
        assert_eq!(outcome.scalar_i64(), Some(9));
    }
}

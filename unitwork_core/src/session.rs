//! Backend-facing session abstractions. Driver adapter crates implement these
//! traits; the coordinator only ever holds `Arc<dyn Session>`.

use crate::{DbResult, QueryOutcome, SessionId, Statement};
use async_trait::async_trait;
use std::sync::Arc;

/// One database session bound to a single connection and transaction context.
///
/// A session is owned by one scope (logical unit of work) at a time. Using the
/// same session from two scopes concurrently is unsupported; the coordinator
/// never does so and adapters are not required to defend against it.
#[async_trait]
pub trait Session: Send + Sync {
    /// Stable handle for this session, minted at creation.
    fn id(&self) -> SessionId;

    /// Open a transaction on the underlying connection.
    async fn begin(&self) -> DbResult<()>;

    /// Commit the open transaction.
    async fn commit(&self) -> DbResult<()>;

    /// Roll back the open transaction.
    async fn rollback(&self) -> DbResult<()>;

    /// Release the underlying connection. After `close` the session must not
    /// be used again.
    async fn close(&self) -> DbResult<()>;

    /// Execute one statement, inside the open transaction if there is one.
    async fn execute(&self, statement: Statement) -> DbResult<QueryOutcome>;

    /// Whether a transaction is currently open on this session.
    fn in_transaction(&self) -> bool;
}

/// Produces sessions on demand. Stateless beyond its configuration; pooling,
/// timeouts, and reconnection are the driver layer's concern.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn new_session(&self) -> DbResult<Arc<dyn Session>>;
}

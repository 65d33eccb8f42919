#![forbid(unsafe_code)]
//! Request-scoped database session and transaction coordination.
//!
//! One logical unit of work (an HTTP request, a background job) gets at most
//! one database session. Nested calls inside that unit of work transparently
//! join a single transaction; only the outermost block commits or rolls back
//! and closes the session. Independent sub-queries fan out onto their own
//! sessions concurrently, and [`Manager::dispose`] reaps anything left
//! dangling at teardown.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use unitwork::{context, Manager, Session, Statement};
//! # async fn demo(factory: Arc<dyn unitwork::SessionFactory>) -> unitwork::DbResult<()> {
//! let manager = Manager::new(factory);
//!
//! // Handle one unit of work with the manager discoverable from deep calls.
//! context::scope(manager.clone(), async {
//!     let manager = context::current_manager()?;
//!     manager
//!         .scoped_transaction(|session| async move {
//!             session.execute("UPDATE users SET active = TRUE".into()).await
//!         })
//!         .await?;
//!     Ok::<_, unitwork::DbError>(())
//! })
//! .await?;
//!
//! // Two independent queries, each on its own session and transaction.
//! let mut queries = HashMap::new();
//! queries.insert("rows".to_string(), Statement::new("SELECT * FROM users"));
//! queries.insert("count".to_string(), Statement::new("SELECT COUNT(*) FROM users"));
//! let results = manager.run_concurrent(queries).await?;
//! # let _ = results;
//! manager.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod manager;
pub mod paging;
pub mod scope;

pub use context::RequestContext;
pub use manager::Manager;
pub use paging::{fetch_page, Page};
pub use scope::{current_scope_id, ScopeId};

// Re-export the core types so applications only depend on this crate.
pub use unitwork_core::{
    DbError, DbResult, ParamValue, QueryOutcome, Row, Session, SessionFactory, SessionId,
    Statement,
};

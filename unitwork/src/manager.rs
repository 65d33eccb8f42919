//! The session/transaction manager: one session per scope, a reentrant
//! transaction depth per session, parallel fan-out execution, and a disposal
//! reaper for anything left dangling.

use crate::scope::{self, ScopeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::warn;
use unitwork_core::{DbError, DbResult, QueryOutcome, Session, SessionFactory, SessionId, Statement};

/// Coordinates sessions and transactions for concurrent logical units of work.
///
/// One `Manager` typically lives for one top-level unit of work (for example
/// one HTTP request) and is registered into the ambient context via
/// [`crate::context::scope`]; a standalone manager works the same way for
/// background jobs. Cloning is cheap and clones share all bookkeeping.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Arc<dyn SessionFactory>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Session registry: scope -> its single session.
    sessions: HashMap<ScopeId, Arc<dyn Session>>,
    /// Every session this manager still owns; the reaper's worklist.
    active: HashMap<SessionId, Arc<dyn Session>>,
    /// Reentrant transaction depth per session. Absent means depth 0.
    depths: HashMap<SessionId, usize>,
}

impl Manager {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Session for the current scope, created via the factory on first use and
    /// reused by later calls in the same scope.
    ///
    /// A scope is single-threaded by construction; concurrent calls for the
    /// same scope from different tasks are unsupported and may create more
    /// than one session.
    pub async fn get_session(&self) -> DbResult<Arc<dyn Session>> {
        let scope_id = scope::current_scope_id().ok_or(DbError::NoScope)?;
        self.session_for_scope(scope_id).await
    }

    /// Run `f` inside the scoped transaction of the current unit of work.
    ///
    /// The first (outermost) entry for a scope opens a real transaction on the
    /// scope's session; nested entries join it without touching the driver.
    /// Only the outermost exit commits or rolls back and closes the session,
    /// so for any nesting depth there is exactly one begin and exactly one
    /// commit-or-rollback plus close. Failures from `f` propagate unchanged;
    /// driver failures met by the manager itself are wrapped as
    /// [`DbError::Database`].
    pub async fn scoped_transaction<R, F, Fut>(&self, f: F) -> DbResult<R>
    where
        F: FnOnce(Arc<dyn Session>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send,
    {
        match scope::current_scope_id() {
            Some(id) => self.transaction_in_scope(id, f).await,
            // No resolvable unit of work: mint a scope and install it around
            // the block so nested calls inside `f` still join this one.
            None => {
                let id = ScopeId::mint();
                scope::install(id, self.transaction_in_scope(id, f)).await
            }
        }
    }

    async fn transaction_in_scope<R, F, Fut>(&self, scope_id: ScopeId, f: F) -> DbResult<R>
    where
        F: FnOnce(Arc<dyn Session>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send,
    {
        let session = self.session_for_scope(scope_id).await?;
        let session_id = session.id();

        let outermost = {
            let state = self.lock();
            state.depths.get(&session_id).copied().unwrap_or(0) == 0
        };

        if outermost {
            if let Err(e) = session.begin().await {
                // The session never carried a transaction; drop it from the
                // books and hand the connection back before failing.
                self.forget(scope_id, session_id);
                if let Err(close_err) = session.close().await {
                    warn!(session = %session_id, error = %close_err,
                        "failed to close session after begin failure");
                }
                return Err(e);
            }
        }
        {
            let mut state = self.lock();
            *state.depths.entry(session_id).or_insert(0) += 1;
        }

        let result = f(Arc::clone(&session)).await;
        self.exit_scope(scope_id, session, result).await
    }

    /// The `finally` path of a scoped block: commit/rollback at the outermost
    /// level, then release this level's stack entry and, when the stack
    /// empties, close the session and drop it from all bookkeeping at once.
    async fn exit_scope<R>(
        &self,
        scope_id: ScopeId,
        session: Arc<dyn Session>,
        result: DbResult<R>,
    ) -> DbResult<R> {
        let session_id = session.id();
        let outermost = {
            let state = self.lock();
            state.depths.get(&session_id).copied().unwrap_or(0) == 1
        };

        let mut result = result;
        if outermost {
            match &result {
                Ok(_) => {
                    if let Err(e) = session.commit().await {
                        result = Err(e);
                    }
                }
                Err(_) => {
                    // Rollback belongs to the outermost scope alone; inner
                    // failures have already propagated to us untouched.
                    if let Err(e) = session.rollback().await {
                        warn!(session = %session_id, error = %e,
                            "rollback failed; propagating the original error");
                    }
                }
            }
        }

        let emptied = {
            let mut state = self.lock();
            match state.depths.get_mut(&session_id) {
                Some(depth) if *depth > 1 => {
                    *depth -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            }
        };
        if emptied {
            self.forget(scope_id, session_id);
            if let Err(e) = session.close().await {
                // A close failure must never mask the block's own outcome.
                warn!(session = %session_id, error = %e, "failed to close session");
            }
        }
        result
    }

    /// Execute independent named queries concurrently, each on its own scope,
    /// session, and transaction. All branches run to completion so each one's
    /// teardown closes its session; if any branch failed, the whole call fails
    /// and no partial results are returned.
    pub async fn run_concurrent(
        &self,
        queries: HashMap<String, Statement>,
    ) -> DbResult<HashMap<String, QueryOutcome>> {
        let mut branches = JoinSet::new();
        for (name, statement) in queries {
            let manager = self.clone();
            branches.spawn(async move {
                // A freshly installed scope per branch keeps sibling queries
                // off each other's session.
                let outcome = scope::enter(
                    manager
                        .scoped_transaction(move |session| async move { session.execute(statement).await }),
                )
                .await;
                (name, outcome)
            });
        }

        let mut results = HashMap::new();
        let mut first_err: Option<DbError> = None;
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((name, Ok(outcome))) => {
                    results.insert(name, outcome);
                }
                Ok((_, Err(e))) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_err.is_none() {
                        first_err = Some(DbError::database(join_err));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Best-effort disposal of everything still tracked: roll back sessions
    /// caught mid-transaction, close all of them, and clear the bookkeeping.
    /// One session's cleanup failure never stops cleanup of the rest. The
    /// manager is empty and reusable afterwards.
    pub async fn dispose(&self) {
        let orphans: Vec<Arc<dyn Session>> = {
            let mut state = self.lock();
            state.sessions.clear();
            state.depths.clear();
            state.active.drain().map(|(_, s)| s).collect()
        };
        for session in orphans {
            if session.in_transaction() {
                if let Err(e) = session.rollback().await {
                    warn!(session = %session.id(), error = %e, "rollback during dispose failed");
                }
            }
            if let Err(e) = session.close().await {
                warn!(session = %session.id(), error = %e, "close during dispose failed");
            }
        }
    }

    /// Number of sessions the manager currently owns.
    pub fn active_session_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Current nesting depth of the given session's transaction stack.
    pub fn transaction_depth(&self, session: SessionId) -> usize {
        self.lock().depths.get(&session).copied().unwrap_or(0)
    }

    /// Whether the given session has at least one scoped block active.
    pub fn is_in_transaction(&self, session: SessionId) -> bool {
        self.transaction_depth(session) > 0
    }

    async fn session_for_scope(&self, scope_id: ScopeId) -> DbResult<Arc<dyn Session>> {
        if let Some(existing) = self.lock().sessions.get(&scope_id).cloned() {
            return Ok(existing);
        }
        // A scope is single-threaded by construction, so nothing races us on
        // this key between the lookup above and the insert below.
        let session = self.inner.factory.new_session().await?;
        let mut state = self.lock();
        state.active.insert(session.id(), Arc::clone(&session));
        state.sessions.insert(scope_id, Arc::clone(&session));
        Ok(session)
    }

    /// Remove one session from all bookkeeping maps together.
    fn forget(&self, scope_id: ScopeId, session_id: SessionId) {
        let mut state = self.lock();
        state.sessions.remove(&scope_id);
        state.active.remove(&session_id);
        state.depths.remove(&session_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Lock poisoning cannot leave the maps inconsistent: every critical
        // section is a plain map operation with no await inside.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Manager")
            .field("active_sessions", &state.active.len())
            .field("open_scopes", &state.sessions.len())
            .finish()
    }
}

//! Scope identifiers: a stable key for "the current logical unit of work".
//!
//! Resolution order is an explicitly installed task-local scope first (used by
//! fan-out branches and [`enter`]), then the identity of the running tokio
//! task. The manager falls back to minting and installing a fresh scope around
//! a block when neither is available, so nested calls inside that block still
//! resolve to one scope.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

tokio::task_local! {
    static CURRENT_SCOPE: ScopeId;
}

/// Identifies one logical unit of work. Stable for the lifetime of that unit
/// and distinct across concurrently running units, including the children of a
/// [`crate::Manager::run_concurrent`] fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    /// Identity of the tokio task the unit of work runs on.
    Task(tokio::task::Id),
    /// An explicitly installed scope, minted from a process-wide counter.
    Local(u64),
}

impl ScopeId {
    pub(crate) fn mint() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ScopeId::Local(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Task(id) => write!(f, "scope-task-{id}"),
            ScopeId::Local(n) => write!(f, "scope-local-{n}"),
        }
    }
}

/// Scope identifier of the currently executing unit of work, if any.
pub fn current_scope_id() -> Option<ScopeId> {
    CURRENT_SCOPE
        .try_with(|id| *id)
        .ok()
        .or_else(|| tokio::task::try_id().map(ScopeId::Task))
}

/// Run `fut` under a freshly minted scope, isolating its session and
/// transaction state from the caller's scope.
pub async fn enter<F: Future>(fut: F) -> F::Output {
    CURRENT_SCOPE.scope(ScopeId::mint(), fut).await
}

/// Run `fut` with a specific scope installed. Used by the manager when no
/// scope is resolvable at the point a scoped block starts.
pub(crate) async fn install<F: Future>(id: ScopeId, fut: F) -> F::Output {
    CURRENT_SCOPE.scope(id, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_scopes_are_distinct() {
        assert_ne!(ScopeId::mint(), ScopeId::mint());
    }

    #[tokio::test]
    async fn enter_overrides_task_identity() {
        let outer = enter(async { current_scope_id() }).await;
        let inner = enter(async { current_scope_id() }).await;
        assert!(matches!(outer, Some(ScopeId::Local(_))));
        assert_ne!(outer, inner);
    }

    #[tokio::test]
    async fn spawned_tasks_resolve_distinct_scopes() {
        let a = tokio::spawn(async { current_scope_id() });
        let b = tokio::spawn(async { current_scope_id() });
        let a = a.await.unwrap().expect("task scope resolves");
        let b = b.await.unwrap().expect("task scope resolves");
        assert!(matches!(a, ScopeId::Task(_)));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn nested_calls_share_the_installed_scope() {
        let (first, second) = enter(async { (current_scope_id(), current_scope_id()) }).await;
        assert_eq!(first, second);
    }
}

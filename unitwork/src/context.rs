//! Ambient context propagation: the context of the inbound unit of work,
//! readable from arbitrarily deep call sites without parameter threading.
//!
//! The slot is set for exactly the dynamic extent of one handler future and is
//! cleared on every exit path, so concurrent units of work only ever observe
//! their own value. This module stores a [`Manager`] handle but knows nothing
//! about its internals; the dependency points from here to the manager, never
//! back.

use crate::manager::Manager;
use crate::scope;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use unitwork_core::{DbError, DbResult};

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Context of the unit of work currently being handled.
#[derive(Clone)]
pub struct RequestContext {
    request_id: u64,
    manager: Manager,
}

impl RequestContext {
    /// Identifier of this inbound unit of work, distinct per handled request.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn manager(&self) -> Manager {
        self.manager.clone()
    }
}

/// Handle `fut` with `manager` installed as the ambient manager. A fresh scope
/// is installed as well, so the handler forms its own unit of work even when
/// driven from outside a tokio task.
pub async fn scope<F: Future>(manager: Manager, fut: F) -> F::Output {
    static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);
    let ctx = RequestContext {
        request_id: NEXT_REQUEST.fetch_add(1, Ordering::Relaxed),
        manager,
    };
    REQUEST_CONTEXT.scope(ctx, scope::enter(fut)).await
}

/// Best-effort read of the ambient context. Returns `None` outside any
/// [`scope`] block; callers that can continue without a manager use this.
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// The ambient manager, or a fail-fast [`DbError::NoAmbientManager`] when
/// called outside any [`scope`] block.
pub fn current_manager() -> DbResult<Manager> {
    current().map(|ctx| ctx.manager).ok_or(DbError::NoAmbientManager)
}

//! Ambient context propagation: each unit of work sees only its own manager,
//! and the slot is cleared on every exit path.

use std::sync::Arc;
use tests_common::MockFactory;
use unitwork::{context, DbError, Manager, Session};

fn manager_with(factory: &MockFactory) -> Manager {
    Manager::new(Arc::new(factory.clone()))
}

#[tokio::test]
async fn ambient_lookup_fails_fast_outside_a_request() {
    assert!(context::current().is_none());
    assert!(matches!(
        context::current_manager(),
        Err(DbError::NoAmbientManager)
    ));
}

#[tokio::test]
async fn concurrent_requests_see_only_their_own_manager() {
    let f1 = MockFactory::new();
    let f2 = MockFactory::new();
    let m1 = manager_with(&f1);
    let m2 = manager_with(&f2);

    async fn handle(marker: &'static str) -> unitwork::DbResult<u64> {
        // Deep call site: locate the manager without parameter threading.
        let manager = context::current_manager()?;
        manager
            .scoped_transaction(|session| async move {
                session.execute(marker.into()).await.map(|_| ())
            })
            .await?;
        Ok(context::current().expect("inside request scope").request_id())
    }

    let h1 = tokio::spawn(context::scope(m1, handle("SELECT r1")));
    let h2 = tokio::spawn(context::scope(m2, handle("SELECT r2")));
    let id1 = h1.await.unwrap().unwrap();
    let id2 = h2.await.unwrap().unwrap();

    assert_ne!(id1, id2);
    // Request 1's work never touched request 2's manager, and vice versa.
    assert_eq!(f1.executed(), vec!["SELECT r1".to_string()]);
    assert_eq!(f2.executed(), vec!["SELECT r2".to_string()]);
}

#[tokio::test]
async fn request_id_is_stable_across_nested_calls() {
    let factory = MockFactory::new();
    let manager = manager_with(&factory);

    async fn nested_lookup() -> u64 {
        context::current().expect("inside request scope").request_id()
    }

    context::scope(manager, async {
        let direct = context::current().unwrap().request_id();
        let nested = nested_lookup().await;
        assert_eq!(direct, nested);
    })
    .await;
}

#[tokio::test]
async fn context_is_cleared_after_the_scope_even_on_failure() {
    let factory = MockFactory::new();
    let manager = manager_with(&factory);

    let result: Result<(), &str> = context::scope(manager, async { Err("handler blew up") }).await;
    assert!(result.is_err());
    assert!(context::current().is_none());
}

#[tokio::test]
async fn spawned_tasks_do_not_inherit_the_context() {
    let factory = MockFactory::new();
    let manager = manager_with(&factory);

    context::scope(manager, async {
        assert!(context::current().is_some());
        let seen = tokio::spawn(async { context::current().is_some() })
            .await
            .unwrap();
        assert!(!seen);
    })
    .await;
}

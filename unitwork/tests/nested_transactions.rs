//! Reentrant scoped-transaction behavior: one begin and one
//! commit-or-rollback-plus-close per outermost block, whatever runs inside.

use std::fmt;
use std::sync::Arc;
use tests_common::{MockFactory, ScriptedFailure};
use unitwork::{DbError, Manager, Session};

#[derive(Debug, PartialEq)]
struct AppError(&'static str);

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app error: {}", self.0)
    }
}

impl std::error::Error for AppError {}

fn manager_with(factory: &MockFactory) -> Manager {
    Manager::new(Arc::new(factory.clone()))
}

#[tokio::test]
async fn nested_blocks_share_one_session_and_transaction() {
    let factory = MockFactory::new();
    let manager = manager_with(&factory);

    let mgr = manager.clone();
    let (outer_id, inner_id) = manager
        .scoped_transaction(move |outer| async move {
            let inner_id = mgr
                .scoped_transaction(|inner| async move { Ok(inner.id()) })
                .await?;
            Ok((outer.id(), inner_id))
        })
        .await
        .unwrap();

    assert_eq!(outer_id, inner_id);
    assert_eq!(factory.sessions_created(), 1);
    assert_eq!(factory.begin_count(), 1);
    assert_eq!(factory.commit_count(), 1);
    assert_eq!(factory.rollback_count(), 0);
    assert_eq!(factory.close_count(), 1);
    assert_eq!(manager.active_session_count(), 0);
}

#[tokio::test]
async fn depth_tracks_nesting_and_returns_to_zero() {
    let factory = MockFactory::new();
    let manager = manager_with(&factory);

    let mgr = manager.clone();
    let session_id = manager
        .scoped_transaction(move |outer| async move {
            let outer_id = outer.id();
            assert_eq!(mgr.transaction_depth(outer_id), 1);
            let mgr2 = mgr.clone();
            mgr.scoped_transaction(move |inner| async move {
                assert_eq!(mgr2.transaction_depth(inner.id()), 2);
                assert!(mgr2.is_in_transaction(inner.id()));
                Ok(())
            })
            .await?;
            Ok(outer_id)
        })
        .await
        .unwrap();

    assert_eq!(manager.transaction_depth(session_id), 0);
    assert!(!manager.is_in_transaction(session_id));
}

// Concrete scenario: outer scope S1, nested scope S1a succeeds and exits,
// then S1 raises an application error. Exactly one rollback, exactly one
// close, and the original error comes back unchanged.
#[tokio::test]
async fn outer_failure_after_inner_success_rolls_back_once() {
    let factory = MockFactory::new();
    let manager = manager_with(&factory);

    let mgr = manager.clone();
    let err = manager
        .scoped_transaction(move |_outer| async move {
            mgr.scoped_transaction(|session| async move {
                session.execute("SELECT 1".into()).await.map(|_| ())
            })
            .await?;
            Err::<(), _>(DbError::application(AppError("outer gave up")))
        })
        .await
        .unwrap_err();

    match err {
        DbError::Application { source } => {
            let original = source.downcast_ref::<AppError>().expect("original error type");
            assert_eq!(original, &AppError("outer gave up"));
        }
        other => panic!("expected application error, got {other:?}"),
    }
    assert_eq!(factory.begin_count(), 1);
    assert_eq!(factory.commit_count(), 0);
    assert_eq!(factory.rollback_count(), 1);
    assert_eq!(factory.close_count(), 1);
    assert_eq!(manager.active_session_count(), 0);
}

#[tokio::test]
async fn inner_failure_propagates_and_only_outermost_rolls_back() {
    let factory = MockFactory::new();
    factory.fail_on("SELECT boom");
    let manager = manager_with(&factory);

    let mgr = manager.clone();
    let observer = factory.clone();
    let err = manager
        .scoped_transaction(move |_outer| async move {
            let inner_err = mgr
                .scoped_transaction(|session| async move {
                    session.execute("SELECT boom".into()).await.map(|_| ())
                })
                .await
                .unwrap_err();
            // The nested block must not have rolled back on its own.
            assert_eq!(observer.rollback_count(), 0);
            Err::<(), _>(inner_err)
        })
        .await
        .unwrap_err();

    match err {
        DbError::Database { source } => {
            assert!(source.downcast_ref::<ScriptedFailure>().is_some());
        }
        other => panic!("expected database error, got {other:?}"),
    }
    assert_eq!(factory.rollback_count(), 1);
    assert_eq!(factory.close_count(), 1);
    assert_eq!(manager.active_session_count(), 0);
}

#[tokio::test]
async fn begin_failure_closes_and_deregisters_the_session() {
    let factory = MockFactory::new();
    factory.fail_begin();
    let manager = manager_with(&factory);

    let err = manager
        .scoped_transaction(|_session| async { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Database { .. }));
    assert_eq!(factory.begin_count(), 1);
    assert_eq!(factory.close_count(), 1);
    assert_eq!(manager.active_session_count(), 0);
}

#[tokio::test]
async fn commit_failure_surfaces_and_session_still_closes() {
    let factory = MockFactory::new();
    factory.fail_commit();
    let manager = manager_with(&factory);

    let err = manager
        .scoped_transaction(|session| async move {
            session.execute("SELECT 1".into()).await.map(|_| ())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Database { .. }));
    assert_eq!(factory.commit_count(), 1);
    assert_eq!(factory.close_count(), 1);
    assert_eq!(manager.active_session_count(), 0);
}

#[tokio::test]
async fn rollback_failure_never_masks_the_original_error() {
    let factory = MockFactory::new();
    factory.fail_rollback();
    let manager = manager_with(&factory);

    let err = manager
        .scoped_transaction(|_session| async {
            Err::<(), _>(DbError::application(AppError("the real failure")))
        })
        .await
        .unwrap_err();

    match err {
        DbError::Application { source } => {
            assert!(source.downcast_ref::<AppError>().is_some());
        }
        other => panic!("rollback failure replaced the original error: {other:?}"),
    }
    assert_eq!(factory.rollback_count(), 1);
    assert_eq!(factory.close_count(), 1);
}

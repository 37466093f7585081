//! Session behaviour tests: ordering, failure handling, and closing.
//!
//! ```bash
//! cargo test -p sessionpool-testing --test session_behavior
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use sessionpool::{BindParams, DriverError, Error, ExecuteOptions, Session, Value};
use sessionpool_testing::{MockDriver, MockEvent, MockResponse, fixtures};

const SLOW: &str = "SELECT slow FROM dual";
const FAST: &str = "SELECT fast FROM dual";
const MISSING: &str = "SELECT * FROM missing_table";

fn driver() -> MockDriver {
    MockDriver::builder()
        .with_response(SLOW, MockResponse::scalar_string("slow"))
        .with_response(FAST, MockResponse::scalar_string("fast"))
        .with_response(MISSING, MockResponse::error(942, "table or view does not exist"))
        .with_latency(SLOW, Duration::from_millis(50))
        .with_default_response(MockResponse::affected(1))
        .build()
}

async fn session(driver: &MockDriver) -> Session {
    fixtures::test_client(driver).acquire_session().await.unwrap()
}

async fn run(session: &Session, statement: &str) -> sessionpool::Result<sessionpool::ResultSet> {
    session
        .execute(statement, &BindParams::none(), &ExecuteOptions::new())
        .await
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_same_session_completes_in_issue_order() {
    let driver = driver();
    let session = session(&driver).await;

    let (slow, fast) = tokio::join!(run(&session, SLOW), run(&session, FAST));
    assert_eq!(slow.unwrap().first_value(), Some(&Value::from("slow")));
    assert_eq!(fast.unwrap().first_value(), Some(&Value::from("fast")));

    assert_eq!(driver.completed_statements(), vec![SLOW, FAST]);
}

#[tokio::test]
async fn test_shared_session_across_tasks_keeps_order() {
    let driver = driver();
    let session = Arc::new(session(&driver).await);

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { run(&session, SLOW).await.map(|_| ()) })
    };
    // Let the first task take the connection before the second is issued.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { run(&session, FAST).await.map(|_| ()) })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(driver.completed_statements(), vec![SLOW, FAST]);
}

#[tokio::test]
async fn test_different_sessions_are_not_ordered() {
    let driver = driver();
    let client = fixtures::test_client(&driver);
    let a = client.acquire_session().await.unwrap();
    let b = client.acquire_session().await.unwrap();

    let (slow, fast) = tokio::join!(run(&a, SLOW), run(&b, FAST));
    slow.unwrap();
    fast.unwrap();

    assert_eq!(driver.completed_statements(), vec![FAST, SLOW]);
}

// =============================================================================
// Failure Handling
// =============================================================================

#[tokio::test]
async fn test_failed_execute_closes_session_once() {
    fixtures::init_tracing();
    let driver = driver();
    let session = session(&driver).await;

    let err = run(&session, MISSING).await.unwrap_err();
    assert!(matches!(err, Error::StatementExecutionFailed(ref e) if e.code() == Some(942)));
    assert!(err.is_recoverable());
    assert!(session.is_closed());
    assert_eq!(driver.stats().connection_close_calls, 1);

    // Closed sessions reject further work without touching the driver.
    assert!(matches!(run(&session, FAST).await, Err(Error::SessionClosed)));
    assert!(matches!(session.close().await, Err(Error::SessionClosed)));
    assert_eq!(driver.stats().connection_close_calls, 1);
    assert_eq!(driver.stats().statements_executed, 1);
}

#[tokio::test]
async fn test_close_failure_after_execute_failure_keeps_both() {
    let driver = driver();
    let session = session(&driver).await;
    driver.fail_next_connection_close(DriverError::new("connection reset by peer"));

    let err = run(&session, MISSING).await.unwrap_err();

    assert!(matches!(err, Error::SessionCloseFailed { .. }));
    assert_eq!(err.driver_error().unwrap().message(), "connection reset by peer");
    let primary = err.primary().expect("primary error preserved");
    assert_eq!(
        primary.to_string(),
        "statement execution failed: table or view does not exist"
    );
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_empty_statement_is_rejected() {
    let driver = driver();
    let session = session(&driver).await;

    let err = run(&session, "").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!session.is_closed());
    assert_eq!(driver.stats().statements_executed, 0);
}

#[tokio::test]
async fn test_binds_and_options_reach_driver() {
    let driver = driver();
    let session = session(&driver).await;

    let rs = session
        .execute(
            "UPDATE users SET name = :name WHERE id = :id",
            &BindParams::named().bind("name", "alice").bind("id", 7),
            &ExecuteOptions::objects().auto_commit(true),
        )
        .await
        .unwrap();
    assert_eq!(rs.rows_affected, Some(1));
}

// =============================================================================
// Transactions and Close
// =============================================================================

#[tokio::test]
async fn test_commit_and_rollback_pass_through() {
    let driver = driver();
    let session = session(&driver).await;

    session.commit().await.unwrap();
    session.rollback().await.unwrap();

    let events = driver.events();
    assert!(events.contains(&MockEvent::Committed { connection: 1 }));
    assert!(events.contains(&MockEvent::RolledBack { connection: 1 }));
}

#[tokio::test]
async fn test_commit_failure_keeps_session_open() {
    let driver = driver();
    let session = session(&driver).await;
    driver.fail_next_commit(DriverError::with_code(2091, "transaction rolled back"));

    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, Error::TransactionOpFailed { operation: "commit", .. }));
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_transaction_ops_on_closed_session_fail() {
    let driver = driver();
    let session = session(&driver).await;
    session.close().await.unwrap();

    assert!(matches!(
        session.commit().await,
        Err(Error::TransactionOpFailed { operation: "commit", .. })
    ));
    assert!(matches!(
        session.rollback().await,
        Err(Error::TransactionOpFailed { operation: "rollback", .. })
    ));
}

#[tokio::test]
async fn test_second_close_fails() {
    let driver = driver();
    let session = session(&driver).await;

    session.close().await.unwrap();
    assert!(matches!(session.close().await, Err(Error::SessionClosed)));
    assert_eq!(driver.stats().connection_close_calls, 1);
}

#[tokio::test]
async fn test_dropping_open_session_warns() {
    let (logs, _guard) = fixtures::capture_logs();
    let driver = driver();
    let open = session(&driver).await;
    let closed = session(&driver).await;
    closed.close().await.unwrap();

    drop(open);
    drop(closed);

    let output = logs.contents();
    assert_eq!(output.matches("session dropped without close()").count(), 1);
    assert!(output.contains("WARN"));
    assert_eq!(driver.stats().connection_close_calls, 1);
}

#[tokio::test]
async fn test_close_failure_still_closes_session() {
    let driver = driver();
    let session = session(&driver).await;
    driver.fail_next_connection_close(DriverError::new("connection reset by peer"));

    let err = session.close().await.unwrap_err();
    assert!(matches!(err, Error::SessionCloseFailed { primary: None, .. }));
    assert!(session.is_closed());
}

//! Sessions: one borrowed connection each.
//!
//! A [`Session`] owns a single [`RawConnection`] behind an async mutex.
//! Tokio's mutex is fair, so operations issued against the same session run
//! one at a time in the order they were issued. Different sessions run
//! independently.
//!
//! ## Lifecycle
//!
//! ```text
//! Open -> Closed (via close(), or after a failed execute())
//! ```
//!
//! `Closed` is terminal: every later operation fails.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::driver::{BindParams, ExecuteOptions, RawConnection, ResultSet};
use crate::error::{Error, Result};
use crate::pool::InstanceId;

/// A logical database connection borrowed from the pool.
///
/// Sessions are `Sync`; share one behind an `Arc` and calls are still
/// serialized. Callers that need real concurrency should acquire one
/// session per task.
pub struct Session {
    id: u64,
    instance: InstanceId,
    generation: u64,
    conn: Mutex<Option<Box<dyn RawConnection>>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        instance: InstanceId,
        generation: u64,
        conn: Box<dyn RawConnection>,
    ) -> Self {
        Self {
            id,
            instance,
            generation,
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        }
    }

    /// Identifier of this session, unique within its pool manager.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Generation of the pool the connection was borrowed from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Execute a statement on this session.
    ///
    /// If the driver reports a failure the session closes itself so the
    /// connection cannot be reused, then returns
    /// [`Error::StatementExecutionFailed`]. If that close fails as well,
    /// [`Error::SessionCloseFailed`] is returned with the execution failure
    /// kept as its primary error.
    pub async fn execute(
        &self,
        statement: &str,
        binds: &BindParams,
        options: &ExecuteOptions,
    ) -> Result<ResultSet> {
        if statement.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "statement must be non-empty text".into(),
            ));
        }

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::SessionClosed)?;

        tracing::trace!(
            instance = %self.instance,
            session = self.id,
            binds = binds.len(),
            "executing statement"
        );

        match conn.execute(statement, binds, options).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::error!(
                    instance = %self.instance,
                    session = self.id,
                    error = %e,
                    "statement execution failed, closing session"
                );
                let primary = Error::StatementExecutionFailed(e);

                let Some(conn) = guard.take() else {
                    return Err(primary);
                };
                self.closed.store(true, Ordering::Release);

                match conn.close().await {
                    Ok(()) => Err(primary),
                    Err(close_err) => {
                        tracing::error!(
                            instance = %self.instance,
                            session = self.id,
                            error = %close_err,
                            primary = %primary,
                            "failed to close session after execution failure"
                        );
                        Err(Error::SessionCloseFailed {
                            source: close_err,
                            primary: Some(Box::new(primary)),
                        })
                    }
                }
            }
        }
    }

    /// Commit the current transaction.
    pub async fn commit(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| closed_transaction_error("commit"))?;

        conn.commit().await.map_err(|e| {
            tracing::error!(instance = %self.instance, session = self.id, error = %e, "commit failed");
            Error::TransactionOpFailed {
                operation: "commit",
                reason: e.to_string(),
            }
        })
    }

    /// Roll back the current transaction.
    pub async fn rollback(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| closed_transaction_error("rollback"))?;

        conn.rollback().await.map_err(|e| {
            tracing::error!(instance = %self.instance, session = self.id, error = %e, "rollback failed");
            Error::TransactionOpFailed {
                operation: "rollback",
                reason: e.to_string(),
            }
        })
    }

    /// Release the connection.
    ///
    /// Closing is not idempotent: a second call fails with
    /// [`Error::SessionClosed`]. The session counts as closed even if the
    /// driver reports a failure, since the connection handle is gone.
    pub async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take().ok_or(Error::SessionClosed)?;
        self.closed.store(true, Ordering::Release);

        conn.close().await.map_err(|e| {
            tracing::error!(instance = %self.instance, session = self.id, error = %e, "failed to close session");
            Error::SessionCloseFailed {
                source: e,
                primary: None,
            }
        })?;

        tracing::trace!(instance = %self.instance, session = self.id, "session closed");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.conn.get_mut().is_some() {
            tracing::warn!(
                instance = %self.instance,
                session = self.id,
                generation = self.generation,
                "session dropped without close(), connection released unclosed"
            );
        }
    }
}

fn closed_transaction_error(operation: &'static str) -> Error {
    Error::TransactionOpFailed {
        operation,
        reason: "session is closed".into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    use super::*;
    use crate::driver::{DriverError, Value};

    #[derive(Default)]
    struct Calls {
        log: Vec<String>,
    }

    struct ScriptedConnection {
        calls: Arc<SyncMutex<Calls>>,
        fail_execute: bool,
        fail_close: bool,
    }

    #[async_trait]
    impl RawConnection for ScriptedConnection {
        async fn execute(
            &mut self,
            statement: &str,
            _binds: &BindParams,
            _options: &ExecuteOptions,
        ) -> std::result::Result<ResultSet, DriverError> {
            self.calls.lock().log.push(format!("execute {statement}"));
            if self.fail_execute {
                return Err(DriverError::with_code(942, "table or view does not exist"));
            }
            Ok(ResultSet::rows(vec!["X".into()], vec![vec![Value::Int(1)]]))
        }

        async fn commit(&mut self) -> std::result::Result<(), DriverError> {
            self.calls.lock().log.push("commit".into());
            Ok(())
        }

        async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
            self.calls.lock().log.push("rollback".into());
            Err(DriverError::new("not connected"))
        }

        async fn close(self: Box<Self>) -> std::result::Result<(), DriverError> {
            self.calls.lock().log.push("close".into());
            if self.fail_close {
                return Err(DriverError::new("connection reset by peer"));
            }
            Ok(())
        }
    }

    fn session(fail_execute: bool, fail_close: bool) -> (Session, Arc<SyncMutex<Calls>>) {
        let calls = Arc::new(SyncMutex::new(Calls::default()));
        let conn = ScriptedConnection {
            calls: Arc::clone(&calls),
            fail_execute,
            fail_close,
        };
        (Session::new(1, InstanceId::new(0), 1, Box::new(conn)), calls)
    }

    #[tokio::test]
    async fn test_execute_returns_driver_result() {
        let (session, _) = session(false, false);
        let rs = session
            .execute("SELECT 1 FROM dual", &BindParams::none(), &ExecuteOptions::new())
            .await
            .unwrap();
        assert_eq!(rs.first_value(), Some(&Value::Int(1)));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_empty_statement_is_rejected_without_driver_call() {
        let (session, calls) = session(false, false);
        let err = session
            .execute("  ", &BindParams::none(), &ExecuteOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(calls.lock().log.is_empty());
    }

    #[tokio::test]
    async fn test_failed_execute_closes_once_and_surfaces_driver_error() {
        let (session, calls) = session(true, false);
        let err = session
            .execute("SELECT * FROM missing", &BindParams::none(), &ExecuteOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StatementExecutionFailed(ref e) if e.code() == Some(942)));
        assert!(session.is_closed());
        assert_eq!(calls.lock().log, vec!["execute SELECT * FROM missing", "close"]);
    }

    #[tokio::test]
    async fn test_failed_close_after_failed_execute_keeps_primary() {
        let (session, _) = session(true, true);
        let err = session
            .execute("SELECT * FROM missing", &BindParams::none(), &ExecuteOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionCloseFailed { .. }));
        assert_eq!(
            err.driver_error().unwrap().message(),
            "connection reset by peer"
        );
        assert!(matches!(
            err.primary(),
            Some(Error::StatementExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let (session, calls) = session(false, false);
        session.close().await.unwrap();
        assert!(matches!(session.close().await, Err(Error::SessionClosed)));
        assert_eq!(calls.lock().log, vec!["close"]);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let (session, _) = session(false, false);
        session.close().await.unwrap();

        let err = session
            .execute("SELECT 1", &BindParams::none(), &ExecuteOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionClosed));

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, Error::TransactionOpFailed { operation: "commit", .. }));

        let err = session.rollback().await.unwrap_err();
        assert!(matches!(err, Error::TransactionOpFailed { operation: "rollback", .. }));
    }

    #[tokio::test]
    async fn test_transaction_pass_through() {
        let (session, calls) = session(false, false);
        session.commit().await.unwrap();

        let err = session.rollback().await.unwrap_err();
        assert!(err.to_string().contains("rollback failed: not connected"));
        assert!(!session.is_closed());
        assert_eq!(calls.lock().log, vec!["commit", "rollback"]);
    }
}

//! Client error types.

use thiserror::Error;

use crate::driver::DriverError;

/// Errors that can occur during pool, session, and client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Required connection parameters are missing or inconsistent.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The driver failed to open a connection pool.
    #[error("failed to create pool: {0}")]
    PoolCreateFailed(#[source] DriverError),

    /// The pool could not hand out a connection.
    #[error("failed to acquire connection: {0}")]
    ConnectionAcquireFailed(#[source] DriverError),

    /// Closing a pool failed.
    #[error("failed to close pool: {0}")]
    PoolCloseFailed(#[source] DriverError),

    /// A statement failed on the server or in the driver.
    #[error("statement execution failed: {0}")]
    StatementExecutionFailed(#[source] DriverError),

    /// Commit or rollback could not be performed.
    #[error("{operation} failed: {reason}")]
    TransactionOpFailed {
        /// Either `"commit"` or `"rollback"`.
        operation: &'static str,
        /// Why the operation failed.
        reason: String,
    },

    /// The session has already been closed.
    #[error("session is closed")]
    SessionClosed,

    /// Closing a session failed.
    ///
    /// When the close was part of handling another failure, that failure is
    /// kept in `primary` so it is never lost.
    #[error("failed to close session: {source}")]
    SessionCloseFailed {
        /// The close failure reported by the driver.
        source: DriverError,
        /// The failure that was being handled when the close was attempted.
        primary: Option<Box<Error>>,
    },

    /// The pool manager has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// The client was destroyed and can no longer be used.
    #[error("client has been destroyed")]
    FacadeDestroyed,

    /// A caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Check if the system can recover from this error on a later call.
    ///
    /// Pool and acquisition failures leave a rebuilt pool behind, and a
    /// failed statement only poisons the session it ran on.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolCreateFailed(_)
                | Self::ConnectionAcquireFailed(_)
                | Self::StatementExecutionFailed(_)
        )
    }

    /// Check if this is a secondary failure raised while closing a resource.
    #[must_use]
    pub fn is_close_failure(&self) -> bool {
        matches!(
            self,
            Self::PoolCloseFailed(_) | Self::SessionCloseFailed { .. }
        )
    }

    /// Get the primary error preserved by a secondary close failure.
    #[must_use]
    pub fn primary(&self) -> Option<&Error> {
        match self {
            Self::SessionCloseFailed { primary, .. } => primary.as_deref(),
            _ => None,
        }
    }

    /// Get the underlying driver error, if this failure came from the driver.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::PoolCreateFailed(e)
            | Self::ConnectionAcquireFailed(e)
            | Self::PoolCloseFailed(e)
            | Self::StatementExecutionFailed(e)
            | Self::SessionCloseFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

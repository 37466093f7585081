//! Client facade.
//!
//! [`Client`] is the long-lived handle an application holds. It owns a
//! [`PoolManager`] and one cached "shared" session used by
//! [`Client::execute`].
//!
//! ## State Transitions
//!
//! ```text
//! Uninitialized -> PoolReady      (first pool creation)
//! PoolReady     -> SessionActive  (first execute())
//! SessionActive -> PoolReady      (close(), or the shared session failed)
//! any           -> Destroyed      (destroy())
//! ```
//!
//! `Destroyed` is terminal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::driver::{BindParams, DatabaseDriver, ExecuteOptions, ResultSet};
use crate::error::{Error, Result};
use crate::pool::{InstanceId, PoolHandle, PoolManager};
use crate::session::Session;

/// Observable state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No pool has been created yet.
    Uninitialized,
    /// A pool is live but no shared session is cached.
    PoolReady,
    /// The shared session is cached and open.
    SessionActive,
    /// The client was destroyed.
    Destroyed,
}

impl ClientState {
    /// Check if the client can still serve calls.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Destroyed)
    }
}

/// Application-facing database client.
pub struct Client {
    pool: PoolManager,
    shared: Mutex<Option<Arc<Session>>>,
    destroyed: AtomicBool,
}

impl Client {
    /// Create a client with instance id 0.
    ///
    /// Validates `config` before anything else; no pool is opened until
    /// first use.
    pub fn new(config: ClientConfig, driver: Arc<dyn DatabaseDriver>) -> Result<Self> {
        Self::with_instance(InstanceId::default(), config, driver)
    }

    /// Create a client with an explicit instance identifier.
    pub fn with_instance(
        instance: InstanceId,
        config: ClientConfig,
        driver: Arc<dyn DatabaseDriver>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pool: PoolManager::new(instance, Arc::new(config), driver),
            shared: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// The instance identifier assigned at construction.
    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.pool.instance()
    }

    /// The configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.pool.config()
    }

    /// The pool manager backing this client.
    #[must_use]
    pub fn pool(&self) -> &PoolManager {
        &self.pool
    }

    /// Current state of the client.
    pub async fn state(&self) -> ClientState {
        if self.is_destroyed() {
            return ClientState::Destroyed;
        }
        let session_open = self
            .shared
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_closed());
        if session_open {
            ClientState::SessionActive
        } else if self.pool.has_pool().await {
            ClientState::PoolReady
        } else {
            ClientState::Uninitialized
        }
    }

    /// Check if [`Client::destroy`] has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Open the pool now instead of on first use.
    pub async fn ensure(&self) -> Result<PoolHandle> {
        self.check_usable()?;
        self.pool.ensure().await
    }

    /// Borrow a new session owned by the caller.
    ///
    /// The caller is responsible for closing it.
    pub async fn acquire_session(&self) -> Result<Session> {
        self.check_usable()?;
        self.pool.acquire_session().await
    }

    /// Execute a statement on the shared session.
    ///
    /// The shared session is acquired on first call and reused afterwards.
    /// Failures behave as in [`Session::execute`]; a shared session that
    /// closed itself because of a failure is dropped, and the next call
    /// acquires a fresh one.
    pub async fn execute(
        &self,
        statement: &str,
        binds: &BindParams,
        options: &ExecuteOptions,
    ) -> Result<ResultSet> {
        self.check_usable()?;
        if statement.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "statement must be non-empty text".into(),
            ));
        }
        let session = self.shared_session().await?;

        let result = session.execute(statement, binds, options).await;
        if result.is_err() && session.is_closed() {
            self.forget_shared(&session).await;
        }
        result
    }

    /// Close the shared session, if any. The pool stays open.
    pub async fn close(&self) -> Result<()> {
        let Some(session) = self.shared.lock().await.take() else {
            return Ok(());
        };
        if session.is_closed() {
            return Ok(());
        }
        session.close().await
    }

    /// Close the shared session and the pool.
    ///
    /// The client is unusable afterwards. Calling this again is a no-op.
    /// If both closes fail, the session failure is returned and the pool
    /// failure is logged.
    pub async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            tracing::debug!(instance = %self.instance(), "client already destroyed");
            return Ok(());
        }

        let session_result = self.close().await;
        let pool_result = self.pool.close().await;
        tracing::info!(instance = %self.instance(), "client destroyed");

        match (session_result, pool_result) {
            (Err(session_err), Err(pool_err)) => {
                tracing::error!(
                    instance = %self.instance(),
                    error = %pool_err,
                    "pool close also failed during destroy"
                );
                Err(session_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::FacadeDestroyed);
        }
        Ok(())
    }

    async fn shared_session(&self) -> Result<Arc<Session>> {
        let mut shared = self.shared.lock().await;
        if let Some(session) = shared.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(self.pool.acquire_session().await?);
        tracing::debug!(
            instance = %self.instance(),
            session = session.id(),
            "shared session created"
        );
        *shared = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn forget_shared(&self, failed: &Arc<Session>) {
        let mut shared = self.shared.lock().await;
        if shared.as_ref().is_some_and(|s| Arc::ptr_eq(s, failed)) {
            *shared = None;
            tracing::debug!(
                instance = %self.instance(),
                session = failed.id(),
                "dropped failed shared session"
            );
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("instance", &self.instance())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

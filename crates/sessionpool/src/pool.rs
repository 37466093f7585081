//! Pool manager.
//!
//! The [`PoolManager`] owns the driver pool for one client. It creates the
//! pool lazily, hands out [`Session`]s, and replaces the pool when the
//! driver fails to produce a connection.
//!
//! ## Pool generations
//!
//! Every pool the manager creates gets the next generation number. A caller
//! whose acquisition fails only tears down the pool if it is still the
//! current generation, so a burst of concurrent failures against one pool
//! results in a single rebuild.
//!
//! ## Creation
//!
//! Creation runs under the slot lock. Callers that were waiting on an
//! attempt share its outcome: the pool on success, the same
//! [`Error::PoolCreateFailed`] on failure. Only callers arriving after a
//! failed attempt start a new one.
//!
//! ## Recovery
//!
//! Recovery never retries the failed call. The caller sees the acquisition
//! error; the rebuilt pool serves the next call.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::driver::{DatabaseDriver, DriverError, DriverPool};
use crate::error::{Error, Result};
use crate::session::Session;

/// Identifier of a client instance.
///
/// Assigned explicitly when a client is constructed (usually by a
/// [`ClientFactory`](crate::ClientFactory)) and carried through every log
/// event the client emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Create an instance identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live driver pool tagged with its generation.
///
/// Handles are cheap to clone; all clones refer to the same driver pool.
#[derive(Clone)]
pub struct PoolHandle {
    generation: u64,
    pool: Arc<dyn DriverPool>,
}

impl PoolHandle {
    /// Generation of this pool.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if two handles refer to the same driver pool.
    #[must_use]
    pub fn same_pool(&self, other: &PoolHandle) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool)
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PoolSlot {
    current: Option<PoolHandle>,
    last_generation: u64,
    // Failure number and error of the most recent failed creation.
    last_failure: Option<(u64, DriverError)>,
    closed: bool,
}

/// Owns the lifecycle of one driver pool.
///
/// At most one pool is live at a time. Only the manager creates or closes
/// it.
pub struct PoolManager {
    instance: InstanceId,
    config: Arc<ClientConfig>,
    driver: Arc<dyn DatabaseDriver>,
    // Held across pool creation so concurrent callers coalesce.
    slot: Mutex<PoolSlot>,
    failed_creations: AtomicU64,
    next_session_id: AtomicU64,
}

impl PoolManager {
    /// Create a manager. No pool is opened until first use.
    pub fn new(
        instance: InstanceId,
        config: Arc<ClientConfig>,
        driver: Arc<dyn DatabaseDriver>,
    ) -> Self {
        Self {
            instance,
            config,
            driver,
            slot: Mutex::new(PoolSlot::default()),
            failed_creations: AtomicU64::new(0),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// The client instance this manager belongs to.
    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The configuration pools are created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Return the current pool, creating it if there is none.
    ///
    /// Concurrent callers that find no pool wait for the first caller's
    /// creation instead of starting their own. If that creation fails, every
    /// caller that waited on it gets its error.
    pub async fn ensure(&self) -> Result<PoolHandle> {
        let failures_seen = self.failed_creations.load(Ordering::SeqCst);
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return Err(Error::PoolClosed);
        }
        if let Some(handle) = &slot.current {
            return Ok(handle.clone());
        }
        if let Some((failure, e)) = &slot.last_failure {
            if *failure > failures_seen {
                tracing::debug!(
                    instance = %self.instance,
                    error = %e,
                    "sharing failed pool creation with waiting caller"
                );
                return Err(Error::PoolCreateFailed(e.clone()));
            }
        }

        self.create_pool(&mut slot).await
    }

    /// Borrow a connection and wrap it in a [`Session`].
    ///
    /// On failure the pool that failed is closed and replaced before the
    /// error is returned, unless another caller already replaced it.
    pub async fn acquire_session(&self) -> Result<Session> {
        let handle = self.ensure().await?;

        match handle.pool.get_connection().await {
            Ok(conn) => {
                let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    instance = %self.instance,
                    generation = handle.generation,
                    session = id,
                    "session acquired"
                );
                Ok(Session::new(id, self.instance, handle.generation, conn))
            }
            Err(e) => {
                tracing::error!(
                    instance = %self.instance,
                    generation = handle.generation,
                    error = %e,
                    "failed to acquire connection"
                );
                self.recover(handle.generation).await;
                Err(Error::ConnectionAcquireFailed(e))
            }
        }
    }

    /// Close the current pool and refuse further use.
    ///
    /// Calling this more than once is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return Ok(());
        }
        slot.closed = true;

        let Some(handle) = slot.current.take() else {
            return Ok(());
        };

        handle.pool.close().await.map_err(|e| {
            tracing::error!(
                instance = %self.instance,
                generation = handle.generation,
                error = %e,
                "failed to close pool"
            );
            Error::PoolCloseFailed(e)
        })?;

        tracing::info!(
            instance = %self.instance,
            generation = handle.generation,
            "connection pool closed"
        );
        Ok(())
    }

    /// Check if a pool is currently live.
    pub async fn has_pool(&self) -> bool {
        self.slot.lock().await.current.is_some()
    }

    /// Check if the manager has been closed.
    pub async fn is_closed(&self) -> bool {
        self.slot.lock().await.closed
    }

    /// Generation of the most recently created pool, or 0 if none was created.
    pub async fn generation(&self) -> u64 {
        self.slot.lock().await.last_generation
    }

    async fn create_pool(&self, slot: &mut PoolSlot) -> Result<PoolHandle> {
        let generation = slot.last_generation + 1;
        tracing::debug!(
            instance = %self.instance,
            generation,
            connect_target = %self.config.connect_target,
            "creating connection pool"
        );

        let pool = match self.driver.create_pool(&self.config).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!(
                    instance = %self.instance,
                    generation,
                    error = %e,
                    "failed to create pool"
                );
                let failure = self.failed_creations.fetch_add(1, Ordering::SeqCst) + 1;
                slot.last_failure = Some((failure, e.clone()));
                return Err(Error::PoolCreateFailed(e));
            }
        };

        let handle = PoolHandle {
            generation,
            pool: Arc::from(pool),
        };
        slot.last_generation = generation;
        slot.last_failure = None;
        slot.current = Some(handle.clone());

        tracing::info!(
            instance = %self.instance,
            generation,
            max_connections = self.config.pool.max_connections,
            "connection pool created"
        );
        Ok(handle)
    }

    /// Replace the pool of `failed_generation` with a fresh one.
    ///
    /// Secondary failures are logged only; the caller always surfaces its
    /// original acquisition error.
    async fn recover(&self, failed_generation: u64) {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return;
        }

        let is_current = slot
            .current
            .as_ref()
            .is_some_and(|h| h.generation == failed_generation);
        if !is_current {
            tracing::debug!(
                instance = %self.instance,
                failed_generation,
                current_generation = slot.last_generation,
                "pool already replaced"
            );
            return;
        }

        if let Some(stale) = slot.current.take() {
            if let Err(e) = stale.pool.close().await {
                log_secondary(self.instance, failed_generation, &Error::PoolCloseFailed(e));
            }
        }

        // Rebuild eagerly so the next caller does not pay for creation.
        // A failed rebuild leaves the slot empty for the next ensure().
        match self.create_pool(&mut slot).await {
            Ok(handle) => tracing::info!(
                instance = %self.instance,
                failed_generation,
                generation = handle.generation,
                "pool rebuilt after acquisition failure"
            ),
            Err(e) => log_secondary(self.instance, failed_generation, &e),
        }
    }
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("instance", &self.instance)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn log_secondary(instance: InstanceId, failed_generation: u64, err: &Error) {
    tracing::warn!(
        instance = %instance,
        failed_generation,
        error = %err,
        "secondary failure during pool recovery"
    );
}

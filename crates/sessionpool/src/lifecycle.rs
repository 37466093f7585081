//! Host lifecycle integration.
//!
//! Host frameworks signal startup and shutdown through a
//! [`LifecycleBinder`]. [`ClientFactory`] builds clients and registers two
//! hooks per client on the binder:
//!
//! - a startup probe that runs the configured probe statement and logs that
//!   the instance is ready
//! - a shutdown hook that destroys the client
//!
//! [`Hooks`] is a minimal binder for hosts without their own lifecycle
//! machinery.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::driver::{BindParams, DatabaseDriver, ExecuteOptions, ResultSet};
use crate::error::Result;
use crate::pool::InstanceId;

/// Future returned by a lifecycle hook.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A lifecycle hook. Each hook runs at most once.
pub type Hook = Box<dyn FnOnce() -> HookFuture + Send + 'static>;

/// Injection points offered by a host framework.
pub trait LifecycleBinder {
    /// Register a hook to run once after construction, before the host
    /// starts serving.
    fn on_startup_probe(&mut self, hook: Hook);

    /// Register a hook to run once before the process tears down.
    fn on_shutdown(&mut self, hook: Hook);
}

/// A binder that stores hooks until the host runs them.
#[derive(Default)]
pub struct Hooks {
    startup: Vec<Hook>,
    shutdown: Vec<Hook>,
}

impl Hooks {
    /// Create an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending startup hooks.
    #[must_use]
    pub fn startup_len(&self) -> usize {
        self.startup.len()
    }

    /// Number of pending shutdown hooks.
    #[must_use]
    pub fn shutdown_len(&self) -> usize {
        self.shutdown.len()
    }

    /// Run startup hooks in registration order.
    ///
    /// Stops at the first failure; hooks after it are discarded.
    pub async fn run_startup(&mut self) -> Result<()> {
        for hook in self.startup.drain(..) {
            hook().await?;
        }
        Ok(())
    }

    /// Run shutdown hooks in reverse registration order.
    ///
    /// Every hook runs even if an earlier one fails. The first failure is
    /// returned.
    pub async fn run_shutdown(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(hook) = self.shutdown.pop() {
            if let Err(e) = hook().await {
                tracing::error!(error = %e, "shutdown hook failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl LifecycleBinder for Hooks {
    fn on_startup_probe(&mut self, hook: Hook) {
        self.startup.push(hook);
    }

    fn on_shutdown(&mut self, hook: Hook) {
        self.shutdown.push(hook);
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("startup", &self.startup.len())
            .field("shutdown", &self.shutdown.len())
            .finish()
    }
}

/// Builds clients against one driver and wires them into a host.
///
/// Instance identifiers come from a counter owned by the factory, so two
/// factories never interfere with each other.
pub struct ClientFactory {
    driver: Arc<dyn DatabaseDriver>,
    next_instance: AtomicU64,
}

impl ClientFactory {
    /// Create a factory for `driver`.
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            next_instance: AtomicU64::new(0),
        }
    }

    /// Validate `config`, build a client, and register its startup probe
    /// and shutdown hooks on `binder`.
    ///
    /// Fails with [`Error::ConfigInvalid`](crate::Error::ConfigInvalid)
    /// before any hook is registered or any driver call is made.
    pub fn create_client(
        &self,
        config: ClientConfig,
        binder: &mut dyn LifecycleBinder,
    ) -> Result<Arc<Client>> {
        config.validate()?;

        let instance = InstanceId::new(self.next_instance.fetch_add(1, Ordering::Relaxed));
        tracing::info!(instance = %instance, connect_target = %config.connect_target, "connecting");

        let client = Arc::new(Client::with_instance(
            instance,
            config,
            Arc::clone(&self.driver),
        )?);

        let probe_client = Arc::clone(&client);
        binder.on_startup_probe(Box::new(move || -> HookFuture {
            Box::pin(async move { probe(&probe_client).await.map(|_| ()) })
        }));

        let shutdown_client = Arc::clone(&client);
        binder.on_shutdown(Box::new(move || -> HookFuture {
            Box::pin(async move { shutdown_client.destroy().await })
        }));

        Ok(client)
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("next_instance", &self.next_instance.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Run the configured probe statement and log readiness.
pub async fn probe(client: &Client) -> Result<ResultSet> {
    let query = Arc::clone(&client.config().pool.probe_query);
    let result = client
        .execute(&query, &BindParams::Positional(Vec::new()), &ExecuteOptions::new())
        .await?;

    match result.first_value() {
        Some(value) => tracing::info!(
            instance = %client.instance(),
            "instance[{}] status OK, probe result: {}",
            client.instance(),
            value
        ),
        None => tracing::info!(
            instance = %client.instance(),
            "instance[{}] status OK",
            client.instance()
        ),
    }
    Ok(result)
}

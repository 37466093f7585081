//! # sessionpool
//!
//! Pooled database client with failure-aware pool recovery.
//!
//! The crate does not speak any wire protocol. A native client library is
//! plugged in through the [`DatabaseDriver`] trait; this crate supplies the
//! lifecycle around it.
//!
//! ## Features
//!
//! - Lazy pool creation, coalesced across concurrent first callers
//! - Pool replacement after acquisition failures, deduplicated by pool
//!   generation
//! - Sessions that serialize their own operations and close themselves
//!   after a failed statement
//! - A [`Client`] facade with one cached shared session
//! - Startup probe and shutdown wiring for host frameworks
//!
//! ## Example
//!
//! ```rust,ignore
//! use sessionpool::{BindParams, Client, ClientConfig, ExecuteOptions};
//!
//! let config = ClientConfig::new("scott", "tiger", "db.local:1521/ORCL");
//! let client = Client::new(config, driver)?;
//!
//! let rows = client
//!     .execute(
//!         "SELECT name FROM users WHERE id = :id",
//!         &BindParams::named().bind("id", 42),
//!         &ExecuteOptions::objects(),
//!     )
//!     .await?;
//!
//! client.destroy().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod session;

pub use client::{Client, ClientState};
pub use config::{ClientConfig, PoolConfig};
pub use driver::{
    BindParams, DatabaseDriver, DriverError, DriverPool, ExecuteOptions, OutFormat, RawConnection,
    ResultSet, Value,
};
pub use error::{Error, Result};
pub use lifecycle::{ClientFactory, Hook, HookFuture, Hooks, LifecycleBinder};
pub use pool::{InstanceId, PoolHandle, PoolManager};
pub use session::Session;

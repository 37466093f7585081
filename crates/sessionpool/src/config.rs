//! Client and pool configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default statement used by the startup probe.
pub const DEFAULT_PROBE_QUERY: &str = "SELECT 1";

/// Pool sizing and behaviour handed to the driver when a pool is created.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Minimum number of connections the driver keeps open.
    pub min_connections: u32,

    /// Maximum number of connections allowed.
    pub max_connections: u32,

    /// Number of connections opened at once when the pool grows.
    pub increment: u32,

    /// Time a connection can be idle before the driver closes it.
    pub idle_timeout: Duration,

    /// Time a caller may wait in the driver's queue for a free connection.
    ///
    /// Enforced by the driver; expiry surfaces as an acquisition failure.
    pub queue_timeout: Duration,

    /// Number of prepared statements the driver caches per connection.
    pub statement_cache_size: u32,

    /// Statement run by the startup probe to check the database is reachable.
    pub probe_query: Arc<str>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 4,
            increment: 1,
            idle_timeout: Duration::from_secs(60),
            queue_timeout: Duration::from_secs(60),
            statement_cache_size: 30,
            probe_query: Arc::from(DEFAULT_PROBE_QUERY),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the pool growth increment.
    #[must_use]
    pub fn increment(mut self, count: u32) -> Self {
        self.increment = count;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the acquisition queue timeout.
    #[must_use]
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set the per-connection statement cache size.
    #[must_use]
    pub fn statement_cache_size(mut self, size: u32) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Set the startup probe statement.
    ///
    /// The statement should be cheap and return at least one row, e.g.
    /// `SELECT 1` or `SELECT CURRENT_TIMESTAMP`.
    #[must_use]
    pub fn probe_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.probe_query = query.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::ConfigInvalid(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::ConfigInvalid(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.increment == 0 {
            return Err(Error::ConfigInvalid(
                "increment must be greater than 0".into(),
            ));
        }
        if self.probe_query.trim().is_empty() {
            return Err(Error::ConfigInvalid("probe_query cannot be empty".into()));
        }
        Ok(())
    }
}

/// Connection parameters for a client.
///
/// Supplied once at construction and never mutated afterwards; the client
/// shares it with the driver as `Arc<ClientConfig>`.
#[derive(Clone, Default)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Database user.
    pub user: String,
    /// Password for `user`.
    pub password: String,
    /// Where to connect: a host/service descriptor understood by the driver.
    pub connect_target: String,
    /// Pool settings.
    pub pool: PoolConfig,
}

impl ClientConfig {
    /// Create a configuration from the three required parameters.
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        connect_target: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            connect_target: connect_target.into(),
            pool: PoolConfig::default(),
        }
    }

    /// Parse a semicolon-separated connection string.
    ///
    /// ```text
    /// User Id=scott;Password=tiger;Connect Target=db.local:1521/ORCL;Pool Max=8
    /// ```
    ///
    /// Keys are case-insensitive. Unknown keys are ignored. The result is
    /// not validated; call [`ClientConfig::validate`] or hand it to
    /// [`Client::new`](crate::Client::new), which validates.
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::ConfigInvalid(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user id" | "uid" | "user" => config.user = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "connect target" | "connect string" | "connectstring" | "data source" => {
                    config.connect_target = value.to_string();
                }
                "pool min" => config.pool.min_connections = parse_u32(&key, value)?,
                "pool max" => config.pool.max_connections = parse_u32(&key, value)?,
                "pool increment" => config.pool.increment = parse_u32(&key, value)?,
                "pool timeout" | "idle timeout" => {
                    config.pool.idle_timeout = Duration::from_secs(parse_u64(&key, value)?);
                }
                "queue timeout" => {
                    config.pool.queue_timeout = Duration::from_secs(parse_u64(&key, value)?);
                }
                "statement cache size" | "stmt cache size" => {
                    config.pool.statement_cache_size = parse_u32(&key, value)?;
                }
                "probe query" => config.pool.probe_query = Arc::from(value),
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown connection string option");
                }
            }
        }

        Ok(config)
    }

    /// Set the pool settings.
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate the configuration.
    ///
    /// Fails with [`Error::ConfigInvalid`] if a required parameter is blank.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("user", &self.user),
            ("password", &self.password),
            ("connect_target", &self.connect_target),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "'{}' required for connect target '{}'",
                missing.join("', '"),
                self.connect_target
            )));
        }

        self.pool.validate()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("connect_target", &self.connect_target)
            .field("pool", &self.pool)
            .finish()
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::ConfigInvalid(format!("invalid {key}: {value}")))
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::ConfigInvalid(format!("invalid {key}: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.increment, 1);
        assert_eq!(&*config.probe_query, DEFAULT_PROBE_QUERY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_builder_methods() {
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(16)
            .increment(2)
            .idle_timeout(Duration::from_secs(120))
            .queue_timeout(Duration::from_secs(5))
            .statement_cache_size(50)
            .probe_query("SELECT CURRENT_TIMESTAMP");

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.increment, 2);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.queue_timeout, Duration::from_secs(5));
        assert_eq!(config.statement_cache_size, 50);
        assert_eq!(&*config.probe_query, "SELECT CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_pool_config_validation_min_greater_than_max() {
        let config = PoolConfig::new().min_connections(20).max_connections(10);

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
        assert!(
            err.to_string()
                .contains("min_connections cannot be greater than max_connections")
        );
    }

    #[test]
    fn test_pool_config_validation_zero_values() {
        let err = PoolConfig::new().max_connections(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_connections must be greater than 0"));

        let err = PoolConfig::new().increment(0).validate().unwrap_err();
        assert!(err.to_string().contains("increment must be greater than 0"));
    }

    #[test]
    fn test_client_config_requires_password() {
        let config = ClientConfig::new("scott", "", "db.local/ORCL");

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
        assert!(err.to_string().contains("'password'"));
    }

    #[test]
    fn test_client_config_reports_every_missing_key() {
        let err = ClientConfig::default().validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'user', 'password', 'connect_target'"));
    }

    #[test]
    fn test_client_config_rejects_blank_user() {
        let config = ClientConfig::new("   ", "tiger", "db.local/ORCL");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_connection_string() {
        let config = ClientConfig::from_connection_string(
            "User Id=scott; Password=tiger; Connect Target=db.local:1521/ORCL; \
             Pool Min=1; Pool Max=8; Queue Timeout=5; Application=ignored",
        )
        .unwrap();

        assert_eq!(config.user, "scott");
        assert_eq!(config.password, "tiger");
        assert_eq!(config.connect_target, "db.local:1521/ORCL");
        assert_eq!(config.pool.min_connections, 1);
        assert_eq!(config.pool.max_connections, 8);
        assert_eq!(config.pool.queue_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_connection_string_invalid_number() {
        let err = ClientConfig::from_connection_string("Pool Max=lots").unwrap_err();
        assert!(err.to_string().contains("invalid pool max: lots"));
    }

    #[test]
    fn test_from_connection_string_missing_separator() {
        let err = ClientConfig::from_connection_string("User Id").unwrap_err();
        assert!(err.to_string().contains("invalid key-value"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClientConfig::new("scott", "tiger", "db.local/ORCL");
        let debug = format!("{config:?}");
        assert!(debug.contains("scott"));
        assert!(!debug.contains("tiger"));
        assert!(debug.contains("[REDACTED]"));
    }
}

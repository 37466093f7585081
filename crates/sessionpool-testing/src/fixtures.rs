//! Test fixture utilities.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use sessionpool::{Client, ClientConfig, PoolConfig};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::mock_driver::MockDriver;

/// Connect target used by fixtures.
pub const TEST_CONNECT_TARGET: &str = "mock://localhost:1521/TEST";

/// A valid configuration pointing at [`TEST_CONNECT_TARGET`].
#[must_use]
pub fn test_config() -> ClientConfig {
    ClientConfig::new("scott", "tiger", TEST_CONNECT_TARGET)
}

/// A valid configuration with a custom pool size.
#[must_use]
pub fn test_config_with_max(max_connections: u32) -> ClientConfig {
    test_config().pool(PoolConfig::new().max_connections(max_connections))
}

/// A client over `driver` built from [`test_config`].
///
/// # Panics
///
/// Never in practice; the fixture configuration is valid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_client(driver: &MockDriver) -> Arc<Client> {
    Arc::new(Client::new(test_config(), driver.as_driver()).expect("fixture config is valid"))
}

/// Install a test-friendly tracing subscriber.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Everything logged so far, as text.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Collect log events emitted on the current thread until the guard drops.
///
/// Use with the default single-threaded `#[tokio::test]` runtime.
#[must_use]
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

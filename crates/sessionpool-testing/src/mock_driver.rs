//! In-memory mock database driver.
//!
//! [`MockDriver`] implements the `sessionpool` driver traits without a
//! server. Statements are answered from pre-configured responses, and
//! failures and latency can be injected at every driver call so pool
//! recovery paths can be exercised deterministically.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sessionpool::{
    BindParams, ClientConfig, DatabaseDriver, DriverError, DriverPool, ExecuteOptions,
    RawConnection, ResultSet, Value,
};

/// Vendor code reported when a mock pool has no connections left.
pub const POOL_EXHAUSTED_CODE: i32 = 24418;

/// Response to a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Rows with named columns.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row values.
        rows: Vec<Vec<Value>>,
    },
    /// DML result with an affected-row count.
    Affected(u64),
    /// The statement fails with this error.
    Error(DriverError),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("row_count", &rows.len())
                .finish(),
            Self::Affected(count) => f.debug_tuple("Affected").field(count).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(&e.message()).finish(),
        }
    }
}

impl MockResponse {
    /// A single integer cell.
    pub fn scalar_int(value: i64) -> Self {
        Self::rows(vec!["VALUE".into()], vec![vec![Value::Int(value)]])
    }

    /// A single text cell.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::rows(vec!["VALUE".into()], vec![vec![Value::Text(value.into())]])
    }

    /// No rows, no affected count.
    pub fn empty() -> Self {
        Self::rows(Vec::new(), Vec::new())
    }

    /// DML result.
    pub fn affected(count: u64) -> Self {
        Self::Affected(count)
    }

    /// Statement failure.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error(DriverError::with_code(code, message))
    }

    /// Arbitrary rows.
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self::Rows { columns, rows }
    }

    fn to_result(&self) -> Result<ResultSet, DriverError> {
        match self {
            Self::Rows { columns, rows } => Ok(ResultSet::rows(columns.clone(), rows.clone())),
            Self::Affected(count) => Ok(ResultSet::affected(*count)),
            Self::Error(e) => Err(e.clone()),
        }
    }
}

/// A driver call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A pool was created.
    PoolCreated {
        /// Mock pool identifier.
        pool: u64,
    },
    /// A pool was closed.
    PoolClosed {
        /// Mock pool identifier.
        pool: u64,
    },
    /// A connection was handed out.
    ConnectionAcquired {
        /// Pool the connection came from.
        pool: u64,
        /// Mock connection identifier.
        connection: u64,
    },
    /// A statement finished (successfully or not).
    StatementCompleted {
        /// Connection the statement ran on.
        connection: u64,
        /// Statement text.
        statement: String,
    },
    /// A commit finished.
    Committed {
        /// Connection identifier.
        connection: u64,
    },
    /// A rollback finished.
    RolledBack {
        /// Connection identifier.
        connection: u64,
    },
    /// A connection was closed.
    ConnectionClosed {
        /// Connection identifier.
        connection: u64,
    },
}

/// Counters of driver calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// `create_pool` calls, including failed ones.
    pub create_pool_calls: usize,
    /// Pools successfully created.
    pub pools_created: usize,
    /// `DriverPool::close` calls.
    pub pool_close_calls: usize,
    /// `get_connection` calls, including failed ones.
    pub acquire_calls: usize,
    /// Connections successfully handed out.
    pub connections_acquired: usize,
    /// `RawConnection::close` calls.
    pub connection_close_calls: usize,
    /// `execute` calls.
    pub statements_executed: usize,
}

#[derive(Default)]
struct Faults {
    create: VecDeque<DriverError>,
    acquire: VecDeque<DriverError>,
    pool_close: VecDeque<DriverError>,
    connection_close: VecDeque<DriverError>,
    commit: VecDeque<DriverError>,
    rollback: VecDeque<DriverError>,
}

#[derive(Default)]
struct Counters {
    create_pool_calls: AtomicUsize,
    pools_created: AtomicUsize,
    pool_close_calls: AtomicUsize,
    acquire_calls: AtomicUsize,
    connections_acquired: AtomicUsize,
    connection_close_calls: AtomicUsize,
    statements_executed: AtomicUsize,
}

struct Shared {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    latencies: HashMap<String, Duration>,
    create_latency: Duration,
    acquire_latency: Duration,
    enforce_max_connections: bool,
    faults: Mutex<Faults>,
    events: Mutex<Vec<MockEvent>>,
    counters: Counters,
    next_pool: AtomicU64,
    next_connection: AtomicU64,
}

impl Shared {
    fn record(&self, event: MockEvent) {
        self.events.lock().push(event);
    }

    fn take_fault(
        &self,
        pick: impl FnOnce(&mut Faults) -> &mut VecDeque<DriverError>,
    ) -> Option<DriverError> {
        let mut faults = self.faults.lock();
        pick(&mut *faults).pop_front()
    }
}

/// Builder for [`MockDriver`].
pub struct MockDriverBuilder {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    latencies: HashMap<String, Duration>,
    create_latency: Duration,
    acquire_latency: Duration,
    enforce_max_connections: bool,
}

impl MockDriverBuilder {
    /// Create a builder with an empty default response.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: MockResponse::empty(),
            latencies: HashMap::new(),
            create_latency: Duration::ZERO,
            acquire_latency: Duration::ZERO,
            enforce_max_connections: false,
        }
    }

    /// Answer `statement` with `response`.
    pub fn with_response(mut self, statement: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(statement.into(), response);
        self
    }

    /// Answer unknown statements with `response`.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Delay the completion of `statement`.
    pub fn with_latency(mut self, statement: impl Into<String>, latency: Duration) -> Self {
        self.latencies.insert(statement.into(), latency);
        self
    }

    /// Delay every `create_pool` call.
    pub fn with_create_latency(mut self, latency: Duration) -> Self {
        self.create_latency = latency;
        self
    }

    /// Delay every `get_connection` call.
    pub fn with_acquire_latency(mut self, latency: Duration) -> Self {
        self.acquire_latency = latency;
        self
    }

    /// Fail acquisitions beyond the configured `max_connections`.
    pub fn enforce_max_connections(mut self) -> Self {
        self.enforce_max_connections = true;
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver {
            shared: Arc::new(Shared {
                responses: self.responses,
                default_response: self.default_response,
                latencies: self.latencies,
                create_latency: self.create_latency,
                acquire_latency: self.acquire_latency,
                enforce_max_connections: self.enforce_max_connections,
                faults: Mutex::new(Faults::default()),
                events: Mutex::new(Vec::new()),
                counters: Counters::default(),
                next_pool: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for MockDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A scriptable in-memory driver.
///
/// Clones share state, so a test can keep one clone for assertions and hand
/// another to the client.
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    /// Create a new builder for the mock driver.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// The driver as a trait object, ready to hand to a client.
    pub fn as_driver(&self) -> Arc<dyn DatabaseDriver> {
        Arc::new(self.clone())
    }

    /// Fail the next `create_pool` call.
    pub fn fail_next_create(&self, error: DriverError) {
        self.shared.faults.lock().create.push_back(error);
    }

    /// Fail the next `get_connection` call, on any pool.
    pub fn fail_next_acquire(&self, error: DriverError) {
        self.shared.faults.lock().acquire.push_back(error);
    }

    /// Fail the next pool close.
    pub fn fail_next_pool_close(&self, error: DriverError) {
        self.shared.faults.lock().pool_close.push_back(error);
    }

    /// Fail the next connection close.
    pub fn fail_next_connection_close(&self, error: DriverError) {
        self.shared.faults.lock().connection_close.push_back(error);
    }

    /// Fail the next commit.
    pub fn fail_next_commit(&self, error: DriverError) {
        self.shared.faults.lock().commit.push_back(error);
    }

    /// Fail the next rollback.
    pub fn fail_next_rollback(&self, error: DriverError) {
        self.shared.faults.lock().rollback.push_back(error);
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MockStats {
        let c = &self.shared.counters;
        MockStats {
            create_pool_calls: c.create_pool_calls.load(Ordering::SeqCst),
            pools_created: c.pools_created.load(Ordering::SeqCst),
            pool_close_calls: c.pool_close_calls.load(Ordering::SeqCst),
            acquire_calls: c.acquire_calls.load(Ordering::SeqCst),
            connections_acquired: c.connections_acquired.load(Ordering::SeqCst),
            connection_close_calls: c.connection_close_calls.load(Ordering::SeqCst),
            statements_executed: c.statements_executed.load(Ordering::SeqCst),
        }
    }

    /// Every recorded driver call, in completion order.
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.lock().clone()
    }

    /// Statements in the order they completed.
    pub fn completed_statements(&self) -> Vec<String> {
        self.shared
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MockEvent::StatementCompleted { statement, .. } => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }

    /// Count the pool closes recorded for `pool`.
    pub fn pool_close_count(&self, pool: u64) -> usize {
        self.shared
            .events
            .lock()
            .iter()
            .filter(|e| matches!(e, MockEvent::PoolClosed { pool: p } if *p == pool))
            .count()
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    async fn create_pool(&self, config: &ClientConfig) -> Result<Box<dyn DriverPool>, DriverError> {
        let shared = &self.shared;
        shared.counters.create_pool_calls.fetch_add(1, Ordering::SeqCst);

        if !shared.create_latency.is_zero() {
            tokio::time::sleep(shared.create_latency).await;
        }
        if let Some(e) = shared.take_fault(|f| &mut f.create) {
            return Err(e);
        }

        let id = shared.next_pool.fetch_add(1, Ordering::SeqCst);
        shared.counters.pools_created.fetch_add(1, Ordering::SeqCst);
        shared.record(MockEvent::PoolCreated { pool: id });
        tracing::trace!(pool = id, connect_target = %config.connect_target, "mock pool created");

        Ok(Box::new(MockPool {
            id,
            max_connections: config.pool.max_connections,
            open: Arc::new(AtomicU32::new(0)),
            closed: AtomicBool::new(false),
            shared: Arc::clone(shared),
        }))
    }
}

struct MockPool {
    id: u64,
    max_connections: u32,
    open: Arc<AtomicU32>,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

#[async_trait]
impl DriverPool for MockPool {
    async fn get_connection(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        let shared = &self.shared;
        shared.counters.acquire_calls.fetch_add(1, Ordering::SeqCst);

        if !shared.acquire_latency.is_zero() {
            tokio::time::sleep(shared.acquire_latency).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::new("pool is closed"));
        }
        if let Some(e) = shared.take_fault(|f| &mut f.acquire) {
            return Err(e);
        }
        if shared.enforce_max_connections && self.open.load(Ordering::SeqCst) >= self.max_connections {
            return Err(DriverError::with_code(
                POOL_EXHAUSTED_CODE,
                "cannot open further sessions",
            ));
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        let id = shared.next_connection.fetch_add(1, Ordering::SeqCst);
        shared.counters.connections_acquired.fetch_add(1, Ordering::SeqCst);
        shared.record(MockEvent::ConnectionAcquired {
            pool: self.id,
            connection: id,
        });

        Ok(Box::new(MockConnection {
            id,
            open: Arc::clone(&self.open),
            shared: Arc::clone(shared),
        }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.shared.counters.pool_close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.shared.record(MockEvent::PoolClosed { pool: self.id });

        match self.shared.take_fault(|f| &mut f.pool_close) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct MockConnection {
    id: u64,
    open: Arc<AtomicU32>,
    shared: Arc<Shared>,
}

#[async_trait]
impl RawConnection for MockConnection {
    async fn execute(
        &mut self,
        statement: &str,
        _binds: &BindParams,
        _options: &ExecuteOptions,
    ) -> Result<ResultSet, DriverError> {
        let shared = &self.shared;
        shared.counters.statements_executed.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = shared.latencies.get(statement) {
            tokio::time::sleep(*latency).await;
        }

        let response = shared
            .responses
            .get(statement)
            .unwrap_or(&shared.default_response);
        let result = response.to_result();

        shared.record(MockEvent::StatementCompleted {
            connection: self.id,
            statement: statement.to_string(),
        });
        result
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        if let Some(e) = self.shared.take_fault(|f| &mut f.commit) {
            return Err(e);
        }
        self.shared.record(MockEvent::Committed { connection: self.id });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        if let Some(e) = self.shared.take_fault(|f| &mut f.rollback) {
            return Err(e);
        }
        self.shared.record(MockEvent::RolledBack { connection: self.id });
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.shared
            .counters
            .connection_close_calls
            .fetch_add(1, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.shared.record(MockEvent::ConnectionClosed { connection: self.id });

        match self.shared.take_fault(|f| &mut f.connection_close) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Database driver seam.
//!
//! The pool manager never talks to a server itself. Everything below the
//! session boundary (pool creation, connection hand-out, statement execution,
//! transaction control) goes through the traits in this module, so a native
//! client library or a test double can be plugged in without touching the
//! pooling logic.
//!
//! All traits use `#[async_trait]` so they can be used as trait objects.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::ClientConfig;

/// An error reported by the database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    code: Option<i32>,
    message: String,
}

impl DriverError {
    /// Create a driver error without a vendor code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create a driver error carrying a vendor error code.
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Vendor error code, if the driver reported one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A driver-neutral SQL value used for binds and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Bytes),
    /// Timestamp without time zone.
    #[cfg(feature = "chrono")]
    Timestamp(chrono::NaiveDateTime),
}

impl Value {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an i64, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            #[cfg(feature = "chrono")]
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

#[cfg(feature = "chrono")]
impl From<chrono::NaiveDateTime> for Value {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Bind parameters for a statement.
///
/// Binds are either keyed by name or given by position. There is no way to
/// pass a bare scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum BindParams {
    /// Named binds (`:name` placeholders).
    Named(Vec<(String, Value)>),
    /// Positional binds (`:1`, `:2`, ... placeholders).
    Positional(Vec<Value>),
}

impl Default for BindParams {
    fn default() -> Self {
        Self::Named(Vec::new())
    }
}

impl BindParams {
    /// No binds.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Start a set of named binds.
    #[must_use]
    pub fn named() -> Self {
        Self::Named(Vec::new())
    }

    /// Positional binds from a list of values.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Add a bind.
    ///
    /// Named binds take `name` as the key. Positional binds ignore the name
    /// and append the value.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self {
            Self::Named(binds) => binds.push((name.into(), value.into())),
            Self::Positional(values) => values.push(value.into()),
        }
        self
    }

    /// Number of bound values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Named(binds) => binds.len(),
            Self::Positional(values) => values.len(),
        }
    }

    /// Check if there are no binds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for BindParams {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<Vec<(String, Value)>> for BindParams {
    fn from(binds: Vec<(String, Value)>) -> Self {
        Self::Named(binds)
    }
}

/// Shape of rows returned by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutFormat {
    /// Rows as positional arrays.
    Array,
    /// Rows keyed by column name.
    Object,
}

/// Per-statement execution options.
///
/// Unset fields fall back to the driver's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ExecuteOptions {
    /// Row shape requested from the driver.
    pub out_format: Option<OutFormat>,
    /// Commit automatically after a successful DML statement.
    pub auto_commit: Option<bool>,
    /// Upper bound on rows fetched by a query.
    pub max_rows: Option<u32>,
}

impl ExecuteOptions {
    /// Options that leave every setting to the driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options requesting rows keyed by column name.
    #[must_use]
    pub fn objects() -> Self {
        Self::default().out_format(OutFormat::Object)
    }

    /// Set the row shape.
    #[must_use]
    pub fn out_format(mut self, format: OutFormat) -> Self {
        self.out_format = Some(format);
        self
    }

    /// Enable or disable auto-commit.
    #[must_use]
    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = Some(enabled);
        self
    }

    /// Limit the number of fetched rows.
    #[must_use]
    pub fn max_rows(mut self, rows: u32) -> Self {
        self.max_rows = Some(rows);
        self
    }
}

/// Outcome of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names, in select-list order.
    pub columns: Vec<String>,
    /// Fetched rows. Each row has one value per column.
    pub rows: Vec<Vec<Value>>,
    /// Rows affected by a DML statement.
    pub rows_affected: Option<u64>,
    /// Values of OUT and IN OUT binds.
    pub out_binds: Vec<(String, Value)>,
}

impl ResultSet {
    /// Result of a statement that produced no rows.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self {
            rows_affected: Some(count),
            ..Self::default()
        }
    }

    /// Result of a query.
    #[must_use]
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    /// The first cell of the first row.
    #[must_use]
    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// A row paired with its column names.
    #[must_use]
    pub fn row_map(&self, index: usize) -> Option<Vec<(&str, &Value)>> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.iter())
                .collect(),
        )
    }
}

/// A native database client library able to open connection pools.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Open a connection pool for the given configuration.
    async fn create_pool(&self, config: &ClientConfig) -> Result<Box<dyn DriverPool>, DriverError>;
}

/// A driver-managed set of ready connections.
#[async_trait]
pub trait DriverPool: Send + Sync {
    /// Borrow a connection from the pool.
    ///
    /// Fails when the pool is exhausted, the server is unreachable, or the
    /// pool has gone stale.
    async fn get_connection(&self) -> Result<Box<dyn RawConnection>, DriverError>;

    /// Close the pool and every idle connection in it.
    async fn close(&self) -> Result<(), DriverError>;
}

/// A single physical connection borrowed from a [`DriverPool`].
#[async_trait]
pub trait RawConnection: Send {
    /// Execute a statement.
    async fn execute(
        &mut self,
        statement: &str,
        binds: &BindParams,
        options: &ExecuteOptions,
    ) -> Result<ResultSet, DriverError>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), DriverError>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Release the connection back to (or out of) its pool.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_default_binds_are_empty_named() {
        let binds = BindParams::default();
        assert_eq!(binds, BindParams::Named(Vec::new()));
        assert!(binds.is_empty());
    }

    #[test]
    fn test_bind_builder() {
        let named = BindParams::named().bind("id", 7).bind("name", "alice");
        assert_eq!(named.len(), 2);
        match named {
            BindParams::Named(binds) => {
                assert_eq!(binds[0], ("id".to_string(), Value::Int(7)));
                assert_eq!(binds[1].1.as_str(), Some("alice"));
            }
            BindParams::Positional(_) => panic!("expected named binds"),
        }

        let positional = BindParams::positional([1, 2]).bind("ignored", Option::<i64>::None);
        assert_eq!(
            positional,
            BindParams::Positional(vec![Value::Int(1), Value::Int(2), Value::Null])
        );
    }

    #[test]
    fn test_execute_options_presets() {
        assert_eq!(ExecuteOptions::new().out_format, None);
        assert_eq!(ExecuteOptions::objects().out_format, Some(OutFormat::Object));

        let opts = ExecuteOptions::new().auto_commit(true).max_rows(10);
        assert_eq!(opts.auto_commit, Some(true));
        assert_eq!(opts.max_rows, Some(10));
    }

    #[test]
    fn test_result_set_accessors() {
        let rs = ResultSet::rows(
            vec!["ID".into(), "NAME".into()],
            vec![vec![Value::Int(1), Value::from("a")]],
        );

        assert_eq!(rs.first_value(), Some(&Value::Int(1)));
        let row = rs.row_map(0).unwrap();
        assert_eq!(row[1], ("NAME", &Value::Text("a".into())));
        assert!(rs.row_map(1).is_none());

        assert_eq!(ResultSet::affected(3).first_value(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::Bytes(Bytes::from_static(b"abc")).to_string(), "<3 bytes>");
    }

    #[test]
    fn test_driver_error_code() {
        let err = DriverError::with_code(24418, "cannot open further sessions");
        assert_eq!(err.code(), Some(24418));
        assert_eq!(err.to_string(), "cannot open further sessions");
        assert_eq!(DriverError::new("x").code(), None);
    }
}

//! # sessionpool-testing
//!
//! Test infrastructure for `sessionpool`.
//!
//! This crate provides a scriptable in-memory driver so pool, session, and
//! client behaviour can be tested without a database server, plus fixtures
//! shared by the integration tests.
//!
//! ## Mock Driver Example
//!
//! ```rust,ignore
//! use sessionpool::{BindParams, Client, ExecuteOptions};
//! use sessionpool_testing::{MockDriver, MockResponse, fixtures};
//!
//! #[tokio::test]
//! async fn test_with_mock_driver() {
//!     let driver = MockDriver::builder()
//!         .with_response("SELECT 1", MockResponse::scalar_int(1))
//!         .build();
//!
//!     let client = Client::new(fixtures::test_config(), driver.as_driver()).unwrap();
//!     let rows = client
//!         .execute("SELECT 1", &BindParams::none(), &ExecuteOptions::new())
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(driver.stats().pools_created, 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_driver;

pub use mock_driver::{
    MockDriver, MockDriverBuilder, MockEvent, MockResponse, MockStats, POOL_EXHAUSTED_CODE,
};

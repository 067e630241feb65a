//! # wirepool-testing
//!
//! Test infrastructure for wirepool.
//!
//! This crate provides an in-process mock backend so the pool can be
//! exercised without a database, plus the fixtures shared by the pool's
//! integration suites under `tests/`.
//!
//! ## Features
//!
//! - Mock connection factory with open/close/live accounting
//! - Scripted connect failures and latency
//! - Validity toggling for validation and eviction tests
//! - Overlap detection for exclusive-lease checks
//! - Test fixture utilities
//!
//! ## Example
//!
//! ```rust,ignore
//! use wirepool_testing::{MockFactory, fixtures};
//!
//! #[tokio::test]
//! async fn test_with_mock_backend() {
//!     let factory = MockFactory::new();
//!     let pool = fixtures::mock_pool(&factory, fixtures::test_config(4))
//!         .await
//!         .unwrap();
//!
//!     let mut conn = pool.get().await.unwrap();
//!     conn.execute("SELECT 1").await.unwrap();
//!     drop(conn);
//!
//!     assert_eq!(factory.stats().opened, 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use mock::{
    FactoryStats, FailureMode, MockConnection, MockError, MockFactory, MockFactoryBuilder,
    MockResult,
};

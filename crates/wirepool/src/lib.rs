//! # wirepool
//!
//! Bounded, thread-safe connection pool for database wire-protocol clients.
//!
//! The pool is protocol-agnostic: a client crate implements
//! [`ConnectionFactory`] and [`Connection`] for its connection type, and the
//! pool takes care of reuse, limits and lifecycle.
//!
//! ## Features
//!
//! - Hard upper bound on open connections, with FIFO queuing of borrowers
//! - Acquisition deadlines that cover both waiting and connecting
//! - Validation on borrow, on return, or periodically in the background
//! - Idle timeout and maximum lifetime eviction
//! - Minimum idle connections, replenished in the background
//! - Graceful shutdown with optional draining of leased connections
//! - Status snapshots and cumulative metrics (OpenTelemetry with `otel`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wirepool::{Credentials, Pool};
//!
//! let pool = Pool::builder()
//!     .factory(MyFactory::new())
//!     .credentials(Credentials::from_connection_string(
//!         "Server=localhost,3306;Database=app;User Id=app;Password=secret",
//!     )?)
//!     .min_connections(5)
//!     .max_connections(20)
//!     .idle_timeout(Duration::from_secs(300))
//!     .build()
//!     .await?;
//!
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pool;

mod reaper;
mod waiter;

pub use config::{PoolConfig, ValidationMode};
pub use connection::{Connection, ConnectionFactory};
pub use credentials::Credentials;
pub use error::{ConnectError, PoolError};
pub use lifecycle::{ConnectionMetadata, ConnectionState, LeaseId};
pub use metrics::{PoolMetrics, PoolStatus};
pub use pool::{Pool, PoolBuilder, PooledConnection};

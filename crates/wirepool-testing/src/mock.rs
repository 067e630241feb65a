//! In-process mock backend for pool tests.
//!
//! This module provides a [`ConnectionFactory`] whose connections never touch
//! the network, so pool behaviour can be tested without a database instance.
//!
//! ## Features
//!
//! - Counts opened, closed and live connections, and the peak live count
//! - Scripted connect failures, including connects that never complete
//! - Configurable connect and command latency
//! - Validity toggling for every connection or a single one
//! - Overlap detection for commands running concurrently on one connection
//!
//! ## Example
//!
//! ```rust,ignore
//! use wirepool_testing::mock::{MockFactory, MockResult};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let factory = MockFactory::builder()
//!         .with_response("SELECT 1", MockResult::scalar(1))
//!         .build();
//!
//!     let pool = wirepool::Pool::builder().factory(factory.clone()).build().await.unwrap();
//!     let mut conn = pool.get().await.unwrap();
//!     assert_eq!(conn.execute("SELECT 1").await.unwrap(), MockResult::scalar(1));
//! }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use wirepool::{ConnectError, Connection, ConnectionFactory, Credentials};

/// Error returned by [`MockConnection::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    /// The connection was closed.
    #[error("connection is closed")]
    Closed,

    /// The connection was killed and behaves as if the peer went away.
    #[error("connection lost")]
    Disconnected,

    /// A scripted server-side error.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
    },
}

/// Result type for mock commands.
pub type Result<T> = std::result::Result<T, MockError>;

/// Scripted response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResult {
    /// A single integer value.
    Scalar(i64),
    /// Rows affected by a write.
    RowsAffected(u64),
    /// A server-side error.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
    },
}

impl MockResult {
    /// Create a scalar response.
    #[must_use]
    pub fn scalar(value: i64) -> Self {
        Self::Scalar(value)
    }

    /// Create a rows affected response.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an empty result response.
    #[must_use]
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create an error response.
    #[must_use]
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
        }
    }
}

/// How a scripted connect attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail with [`ConnectError::Refused`] (transient).
    Refused,
    /// Fail with [`ConnectError::Authentication`] (permanent).
    Authentication,
    /// Fail with [`ConnectError::Timeout`] (transient).
    Timeout,
    /// Never complete; only the caller's deadline ends the attempt.
    Hang,
}

/// Counters kept by a [`MockFactory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactoryStats {
    /// Connections successfully opened.
    pub opened: u64,
    /// Connections closed through [`Connection::close`].
    pub closed: u64,
    /// Connections opened and not yet closed or dropped.
    pub live: u64,
    /// Highest value `live` has reached.
    pub peak_live: u64,
    /// Connect attempts that failed.
    pub failed_connects: u64,
    /// Validation probes answered.
    pub validations: u64,
    /// Resets performed.
    pub resets: u64,
    /// Commands executed.
    pub commands: u64,
    /// Commands that started while another was running on the same connection.
    pub overlaps: u64,
}

struct MockConfig {
    responses: HashMap<String, MockResult>,
    default_response: MockResult,
    connect_latency: Duration,
    command_latency: Duration,
}

struct Shared {
    config: MockConfig,
    stats: Mutex<FactoryStats>,
    failures: Mutex<VecDeque<FailureMode>>,
    valid: AtomicBool,
    reset_ok: AtomicBool,
    next_id: AtomicU64,
    executing: Mutex<HashSet<u64>>,
}

/// Builder for [`MockFactory`].
pub struct MockFactoryBuilder {
    config: MockConfig,
}

impl MockFactoryBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MockConfig {
                responses: HashMap::new(),
                default_response: MockResult::empty(),
                connect_latency: Duration::ZERO,
                command_latency: Duration::ZERO,
            },
        }
    }

    /// Add a response for a specific command.
    #[must_use]
    pub fn with_response(mut self, command: impl Into<String>, response: MockResult) -> Self {
        self.config.responses.insert(command.into(), response);
        self
    }

    /// Set the response for commands without a scripted response.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResult) -> Self {
        self.config.default_response = response;
        self
    }

    /// Delay every successful connect by `latency`.
    #[must_use]
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.config.connect_latency = latency;
        self
    }

    /// Delay every command by `latency`.
    #[must_use]
    pub fn with_command_latency(mut self, latency: Duration) -> Self {
        self.config.command_latency = latency;
        self
    }

    /// Build the factory.
    #[must_use]
    pub fn build(self) -> MockFactory {
        MockFactory {
            shared: Arc::new(Shared {
                config: self.config,
                stats: Mutex::new(FactoryStats::default()),
                failures: Mutex::new(VecDeque::new()),
                valid: AtomicBool::new(true),
                reset_ok: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                executing: Mutex::new(HashSet::new()),
            }),
        }
    }
}

impl Default for MockFactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`ConnectionFactory`] producing [`MockConnection`]s.
///
/// Clones share counters and scripted behaviour, so a test keeps one clone
/// and hands another to the pool.
#[derive(Clone)]
pub struct MockFactory {
    shared: Arc<Shared>,
}

impl MockFactory {
    /// Create a new builder for the mock factory.
    #[must_use]
    pub fn builder() -> MockFactoryBuilder {
        MockFactoryBuilder::new()
    }

    /// Create a factory with default settings.
    #[must_use]
    pub fn new() -> Self {
        MockFactoryBuilder::new().build()
    }

    /// Make the next `count` connect attempts fail with `mode`.
    pub fn fail_next(&self, count: usize, mode: FailureMode) {
        let mut failures = self.shared.failures.lock();
        failures.extend(std::iter::repeat_n(mode, count));
    }

    /// Mark every connection, current and future, valid or invalid.
    pub fn set_valid(&self, valid: bool) {
        self.shared.valid.store(valid, Ordering::SeqCst);
    }

    /// Make [`Connection::reset`] succeed or fail.
    pub fn set_reset_ok(&self, ok: bool) {
        self.shared.reset_ok.store(ok, Ordering::SeqCst);
    }

    /// Snapshot of the factory counters.
    #[must_use]
    pub fn stats(&self) -> FactoryStats {
        *self.shared.stats.lock()
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFactory")
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn open(&self, credentials: &Credentials) -> std::result::Result<MockConnection, ConnectError> {
        let failure = self.shared.failures.lock().pop_front();
        if let Some(mode) = failure {
            self.shared.stats.lock().failed_connects += 1;
            tracing::debug!(endpoint = %credentials.endpoint(), ?mode, "mock connect failing");
            return Err(match mode {
                FailureMode::Refused => ConnectError::Refused("mock refused".into()),
                FailureMode::Authentication => {
                    ConnectError::Authentication("mock login failed".into())
                }
                FailureMode::Timeout => ConnectError::Timeout,
                FailureMode::Hang => std::future::pending().await,
            });
        }

        if !self.shared.config.connect_latency.is_zero() {
            tokio::time::sleep(self.shared.config.connect_latency).await;
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = self.shared.stats.lock();
            stats.opened += 1;
            stats.live += 1;
            stats.peak_live = stats.peak_live.max(stats.live);
        }
        tracing::trace!(mock_id = id, "mock connection opened");

        Ok(MockConnection {
            id,
            shared: Arc::clone(&self.shared),
            killed: false,
            closed: false,
        })
    }
}

/// A fake connection produced by [`MockFactory`].
pub struct MockConnection {
    id: u64,
    shared: Arc<Shared>,
    killed: bool,
    closed: bool,
}

impl MockConnection {
    /// Factory-unique identifier of this physical connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Make this connection fail its probes and commands from now on.
    pub fn kill(&mut self) {
        self.killed = true;
    }

    /// Execute a command, returning its scripted response.
    pub async fn execute(&mut self, command: &str) -> Result<MockResult> {
        if self.closed {
            return Err(MockError::Closed);
        }
        if self.killed {
            return Err(MockError::Disconnected);
        }

        let overlapped = !self.shared.executing.lock().insert(self.id);
        {
            let mut stats = self.shared.stats.lock();
            stats.commands += 1;
            if overlapped {
                stats.overlaps += 1;
            }
        }
        if overlapped {
            tracing::error!(mock_id = self.id, "concurrent commands on one connection");
        }

        if !self.shared.config.command_latency.is_zero() {
            tokio::time::sleep(self.shared.config.command_latency).await;
        }
        if !overlapped {
            self.shared.executing.lock().remove(&self.id);
        }

        let response = self
            .shared
            .config
            .responses
            .get(command)
            .unwrap_or(&self.shared.config.default_response)
            .clone();
        match response {
            MockResult::Error { number, message } => Err(MockError::Server { number, message }),
            other => Ok(other),
        }
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("killed", &self.killed)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn is_valid(&mut self, _timeout: Duration) -> bool {
        self.shared.stats.lock().validations += 1;
        !self.closed && !self.killed && self.shared.valid.load(Ordering::SeqCst)
    }

    async fn reset(&mut self) -> std::result::Result<(), ConnectError> {
        self.shared.stats.lock().resets += 1;
        if self.killed || !self.shared.reset_ok.load(Ordering::SeqCst) {
            return Err(ConnectError::Other("mock reset failed".into()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut stats = self.shared.stats.lock();
        stats.closed += 1;
        stats.live -= 1;
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.stats.lock().live -= 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("localhost").with_port(3306)
    }

    #[tokio::test]
    async fn test_open_and_close_counts() {
        let factory = MockFactory::new();
        let mut conn = factory.open(&credentials()).await.unwrap();
        assert_eq!(factory.stats().live, 1);

        conn.close().await;
        conn.close().await;
        let stats = factory.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.live, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_not_live() {
        let factory = MockFactory::new();
        let a = factory.open(&credentials()).await.unwrap();
        let b = factory.open(&credentials()).await.unwrap();
        assert_ne!(a.id(), b.id());
        drop(a);

        let stats = factory.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.peak_live, 2);
        assert_eq!(stats.closed, 0);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let factory = MockFactory::new();
        factory.fail_next(2, FailureMode::Refused);

        for _ in 0..2 {
            let err = factory.open(&credentials()).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(factory.open(&credentials()).await.is_ok());
        assert_eq!(factory.stats().failed_connects, 2);
    }

    #[tokio::test]
    async fn test_execute_responses() {
        let factory = MockFactory::builder()
            .with_response("SELECT 1", MockResult::scalar(1))
            .with_response("BOOM", MockResult::error(50000, "boom"))
            .build();
        let mut conn = factory.open(&credentials()).await.unwrap();

        assert_eq!(conn.execute("SELECT 1").await.unwrap(), MockResult::Scalar(1));
        assert_eq!(conn.execute("UPDATE t").await.unwrap(), MockResult::empty());
        assert!(matches!(
            conn.execute("BOOM").await,
            Err(MockError::Server { number: 50000, .. })
        ));

        conn.kill();
        assert_eq!(conn.execute("SELECT 1").await, Err(MockError::Disconnected));
        assert!(!conn.is_valid(Duration::from_secs(1)).await);

        conn.close().await;
        assert_eq!(conn.execute("SELECT 1").await, Err(MockError::Closed));
        assert_eq!(factory.stats().overlaps, 0);
    }

    #[tokio::test]
    async fn test_validity_toggle() {
        let factory = MockFactory::new();
        let mut conn = factory.open(&credentials()).await.unwrap();
        assert!(conn.is_valid(Duration::from_secs(1)).await);

        factory.set_valid(false);
        assert!(!conn.is_valid(Duration::from_secs(1)).await);
        assert_eq!(factory.stats().validations, 2);
    }
}

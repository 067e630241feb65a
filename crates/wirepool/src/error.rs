//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while opening or resetting a physical connection.
///
/// Returned by [`ConnectionFactory::open`](crate::ConnectionFactory::open) and
/// [`Connection::reset`](crate::Connection::reset).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The server refused or dropped the connection attempt.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The server rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The connection attempt did not complete in time.
    #[error("connect timed out")]
    Timeout,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend-specific failure.
    #[error("{0}")]
    Other(String),
}

impl ConnectError {
    /// Check if this error is transient and a new attempt may succeed.
    ///
    /// Authentication failures and backend-specific errors are treated as
    /// permanent; the pool never retries them.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Refused(_) | Self::Timeout | Self::Io(_))
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Connection creation failed.
    #[error("failed to create connection: {0}")]
    Connect(#[from] ConnectError),

    /// A connection was handed back to a pool that does not hold its lease.
    #[error("invalid pool state: {0}")]
    InvalidState(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error is an acquisition timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout(_))
    }

    /// Check if retrying the operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AcquisitionTimeout(_) => true,
            Self::Connect(e) => e.is_transient(),
            Self::PoolClosed | Self::InvalidState(_) | Self::Configuration(_) => false,
        }
    }
}

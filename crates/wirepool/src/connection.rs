//! Collaborator traits implemented by the protocol client.
//!
//! The pool only needs three things from a backend: a way to open a
//! connection, a cheap liveness probe, and a way to close it. Everything a
//! connection does for its borrower (executing commands, transactions) stays
//! on the concrete connection type and is reached through
//! [`PooledConnection`](crate::PooledConnection)'s `Deref`.
//!
//! Both traits use `#[async_trait]` so the futures they return are `Send`
//! and the pool can drive them from background tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::ConnectError;

/// A physical protocol connection managed by the pool.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Cheap, side-effect-free liveness probe.
    ///
    /// Implementations should finish within `timeout`; the pool also bounds
    /// the call externally and treats an overrun as a failed probe.
    async fn is_valid(&mut self, timeout: Duration) -> bool;

    /// Reset session state before the connection is reused by another borrower.
    ///
    /// Only called when [`PoolConfig::reset_on_return`](crate::PoolConfig::reset_on_return)
    /// is enabled. The default does nothing.
    async fn reset(&mut self) -> Result<(), ConnectError> {
        Ok(())
    }

    /// Close the connection and release its transport resources.
    ///
    /// Must be idempotent.
    async fn close(&mut self);
}

/// Opens new physical connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory.
    type Connection: Connection;

    /// Open a new connection.
    ///
    /// May take arbitrarily long; the pool cancels the returned future when
    /// the caller's acquisition deadline elapses.
    async fn open(&self, credentials: &Credentials) -> Result<Self::Connection, ConnectError>;
}

#[async_trait]
impl<F: ConnectionFactory> ConnectionFactory for Arc<F> {
    type Connection = F::Connection;

    async fn open(&self, credentials: &Credentials) -> Result<Self::Connection, ConnectError> {
        (**self).open(credentials).await
    }
}

//! Connection lifecycle management.
//!
//! This module defines the per-connection state machine and metadata the
//! pool keeps for every physical connection it owns. A connection moves
//! `Idle -> Leased -> {Idle, Closed}`, with `Validating` as a transient
//! state while a probe runs.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Connection state tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is idle and available for use.
    Idle,
    /// Connection is leased to exactly one borrower.
    Leased,
    /// Connection is being health-checked.
    Validating,
    /// Connection is closed and should be removed.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the connection is currently busy.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Leased | Self::Validating)
    }
}

/// Identity of one lease of one connection.
///
/// Every checkout mints a fresh id, so a stale handle can never be mistaken
/// for the current borrower of a reused connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub(crate) u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection within its pool.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// When the connection last passed a health check.
    pub last_checked_at: Option<Instant>,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
    /// Current leaseholder, if leased.
    pub lease: Option<LeaseId>,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            last_checked_at: None,
            checkout_count: 0,
            state: ConnectionState::Idle,
            lease: None,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if the connection has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout
    }

    /// Check if a health check is due.
    #[must_use]
    pub fn needs_health_check(&self, check_interval: Duration) -> bool {
        match self.last_checked_at {
            Some(last) => last.elapsed() > check_interval,
            None => true,
        }
    }

    /// Mark the connection as checked out under `lease`.
    pub fn mark_checkout(&mut self, lease: LeaseId) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::Leased;
        self.lease = Some(lease);
    }

    /// Mark the connection as returned to idle by its borrower.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.mark_idle();
    }

    /// Mark the connection as idle without counting it as used.
    ///
    /// Background probes park connections through this, so they keep their
    /// place on the idle-timeout clock.
    pub fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.lease = None;
    }

    /// Mark the connection as being probed.
    pub fn mark_validating(&mut self) {
        self.state = ConnectionState::Validating;
    }

    /// Mark the connection as health-checked.
    pub fn mark_health_check(&mut self) {
        self.last_checked_at = Some(Instant::now());
    }

    /// Mark the connection as closed.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.lease = None;
    }
}

/// One physical connection together with its pool metadata.
///
/// The slot is the unit of ownership transfer: it sits in the idle set,
/// moves into a borrower's `PooledConnection`, or is destroyed. It is never
/// in two places at once.
pub(crate) struct Slot<C> {
    pub(crate) conn: C,
    pub(crate) meta: ConnectionMetadata,
}

impl<C> Slot<C> {
    pub(crate) fn new(id: u64, conn: C) -> Self {
        Self {
            conn,
            meta: ConnectionMetadata::new(id),
        }
    }
}

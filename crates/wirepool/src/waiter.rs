//! Waiter queue entries and capacity reservations.
//!
//! A borrower that finds the pool exhausted parks on a oneshot receiver.
//! Whoever frees a slot or a unit of capacity pops the head of the queue
//! under the pool lock and sends it a [`Grant`]. Both the waiter side and
//! the reservation side are RAII guards so a cancelled or timed-out borrower
//! hands back whatever it was granted instead of leaking it.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::connection::ConnectionFactory;
use crate::lifecycle::Slot;
use crate::pool::{ConnOf, PoolInner, PoolState};

/// What a parked borrower receives.
pub(crate) enum Grant<C> {
    /// A leased, ready-to-use connection.
    Slot(Slot<C>),
    /// One unit of capacity, already counted as pending; the borrower opens
    /// the connection itself.
    Capacity,
}

impl<C> Grant<C> {
    pub(crate) fn into_slot(self) -> Option<Slot<C>> {
        match self {
            Self::Slot(slot) => Some(slot),
            Self::Capacity => None,
        }
    }
}

/// Queue entry for one parked borrower.
pub(crate) struct Waiter<C> {
    pub(crate) id: u64,
    pub(crate) tx: oneshot::Sender<Grant<C>>,
}

/// How a parked borrower was woken.
pub(crate) enum Wake<F: ConnectionFactory> {
    Slot(Slot<ConnOf<F>>),
    Capacity(Reservation<F>),
    Closed,
    TimedOut,
}

/// The borrower's half of a queued waiter.
///
/// Dropping the guard before it has been woken removes the waiter from the
/// queue, or, if a grant raced the removal, returns the grant to the pool.
pub(crate) struct WaiterGuard<F: ConnectionFactory> {
    pool: Arc<PoolInner<F>>,
    id: u64,
    rx: oneshot::Receiver<Grant<ConnOf<F>>>,
    done: bool,
}

impl<F: ConnectionFactory> WaiterGuard<F> {
    pub(crate) fn new(
        pool: Arc<PoolInner<F>>,
        id: u64,
        rx: oneshot::Receiver<Grant<ConnOf<F>>>,
    ) -> Self {
        Self {
            pool,
            id,
            rx,
            done: false,
        }
    }

    /// Park until granted, closed, or `deadline`.
    pub(crate) async fn wait(mut self, deadline: Instant) -> Wake<F> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(Grant::Slot(slot))) => {
                self.done = true;
                Wake::Slot(slot)
            }
            Ok(Ok(Grant::Capacity)) => {
                self.done = true;
                Wake::Capacity(Reservation::new(Arc::clone(&self.pool), false))
            }
            Ok(Err(_)) => {
                self.done = true;
                Wake::Closed
            }
            Err(_) => Wake::TimedOut,
        }
    }
}

impl<F: ConnectionFactory> Drop for WaiterGuard<F> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let doomed = {
            let mut state = self.pool.state.lock();
            if state.remove_waiter(self.id) {
                return;
            }

            // Already dequeued by a granter; the grant is sitting in the channel.
            match self.rx.try_recv() {
                Ok(Grant::Slot(slot)) => {
                    tracing::trace!(
                        pool = %self.pool.config.name,
                        conn_id = slot.meta.id,
                        "connection granted after deadline, handing it on"
                    );
                    state.leased.remove(&slot.meta.id);
                    self.pool.checkin_locked(&mut state, slot, true)
                }
                Ok(Grant::Capacity) => {
                    state.pending -= 1;
                    self.pool.release_capacity_locked(&mut state);
                    None
                }
                Err(_) => None,
            }
        };

        if let Some(slot) = doomed {
            self.pool.retire(slot);
        }
    }
}

/// One unit of capacity counted in `pending` but not yet backed by a connection.
///
/// Dropping an unfulfilled reservation gives the capacity back, offering it to
/// the next waiter.
pub(crate) struct Reservation<F: ConnectionFactory> {
    pool: Arc<PoolInner<F>>,
    replenish: bool,
    armed: bool,
}

impl<F: ConnectionFactory> Reservation<F> {
    /// The caller must already have counted this reservation in `pending`
    /// (and in `replenishing` when `replenish` is set).
    pub(crate) fn new(pool: Arc<PoolInner<F>>, replenish: bool) -> Self {
        Self {
            pool,
            replenish,
            armed: true,
        }
    }

    /// Convert the reservation into a live connection's accounting.
    ///
    /// The caller immediately books the connection as leased, idle or closing.
    pub(crate) fn fulfil(mut self, state: &mut PoolState<ConnOf<F>>) {
        self.uncount(state);
        self.armed = false;
    }

    fn uncount(&self, state: &mut PoolState<ConnOf<F>>) {
        state.pending -= 1;
        if self.replenish {
            state.replenishing -= 1;
        }
    }
}

impl<F: ConnectionFactory> Drop for Reservation<F> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.pool.state.lock();
        self.uncount(&mut state);
        self.pool.release_capacity_locked(&mut state);
    }
}

//! Connection pool implementation.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{PoolConfig, ValidationMode};
use crate::connection::{Connection, ConnectionFactory};
use crate::credentials::Credentials;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionMetadata, LeaseId, Slot};
use crate::metrics::{CheckoutOutcome, MetricsRecorder, PoolMetrics, PoolStatus};
use crate::reaper;
use crate::waiter::{Grant, Reservation, Waiter, WaiterGuard, Wake};

/// Connection type produced by the factory `F`.
pub type ConnOf<F> = <F as ConnectionFactory>::Connection;

/// A connection pool.
///
/// The pool manages a bounded set of physical connections, providing
/// connection reuse, validation, idle eviction and FIFO queuing of
/// borrowers when every connection is in use.
///
/// The pool is usually shared as `Arc<Pool<F>>` between tasks.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

/// Everything guarded by the pool lock.
///
/// Every connection the pool is responsible for is counted in exactly one of
/// `idle`, `leased`, `pending` (being opened), `validating` (probed by the
/// reaper) or `closing`, and their sum never exceeds `max_connections`.
pub(crate) struct PoolState<C> {
    pub(crate) closed: bool,
    pub(crate) idle: VecDeque<Slot<C>>,
    pub(crate) leased: HashMap<u64, LeaseId>,
    pub(crate) pending: u32,
    /// Subset of `pending` opened by replenishment rather than a borrower.
    pub(crate) replenishing: u32,
    pub(crate) validating: u32,
    pub(crate) closing: u32,
    pub(crate) waiters: VecDeque<Waiter<C>>,
    next_waiter_id: u64,
}

impl<C> PoolState<C> {
    fn new(max: u32) -> Self {
        let capacity = usize::try_from(max).unwrap_or(usize::MAX);
        Self {
            closed: false,
            idle: VecDeque::with_capacity(capacity),
            leased: HashMap::with_capacity(capacity),
            pending: 0,
            replenishing: 0,
            validating: 0,
            closing: 0,
            waiters: VecDeque::new(),
            next_waiter_id: 0,
        }
    }

    pub(crate) fn total(&self) -> u32 {
        self.idle.len() as u32 + self.outstanding()
    }

    /// Connections that must come back (or finish closing) before the pool is drained.
    pub(crate) fn outstanding(&self) -> u32 {
        self.leased.len() as u32 + self.pending + self.validating + self.closing
    }

    fn enqueue_waiter(&mut self) -> (u64, oneshot::Receiver<Grant<C>>) {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, tx });
        (id, rx)
    }

    pub(crate) fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct PoolInner<F: ConnectionFactory> {
    pub(crate) config: PoolConfig,
    credentials: Credentials,
    factory: F,
    pub(crate) state: Mutex<PoolState<ConnOf<F>>>,
    metrics: MetricsRecorder,
    next_slot_id: AtomicU64,
    next_lease_id: AtomicU64,
    drained: Notify,
    shutdown: watch::Sender<bool>,
}

/// Next move for an acquiring borrower, decided under the lock.
enum Step<F: ConnectionFactory> {
    Idle(Slot<ConnOf<F>>),
    Create(Reservation<F>),
    Wait(WaiterGuard<F>),
}

/// Keeps a slot counted in `closing` until its connection is closed.
struct Closing<F: ConnectionFactory> {
    pool: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Drop for Closing<F> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.closing -= 1;
        self.pool.release_capacity_locked(&mut state);
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn new(
        factory: F,
        credentials: Credentials,
        config: PoolConfig,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            metrics: MetricsRecorder::new(&config.name),
            state: Mutex::new(PoolState::new(config.max_connections)),
            config,
            credentials,
            factory,
            next_slot_id: AtomicU64::new(1),
            next_lease_id: AtomicU64::new(1),
            drained: Notify::new(),
            shutdown,
        }
    }

    fn new_slot(&self, conn: ConnOf<F>) -> Slot<ConnOf<F>> {
        self.metrics.connection_created();
        Slot::new(self.next_slot_id.fetch_add(1, Ordering::Relaxed), conn)
    }

    fn is_stale(&self, meta: &ConnectionMetadata) -> bool {
        meta.is_expired(self.config.max_lifetime) || meta.is_idle_expired(self.config.idle_timeout)
    }

    fn lease_locked(&self, state: &mut PoolState<ConnOf<F>>, slot: &mut Slot<ConnOf<F>>) {
        let lease = LeaseId(self.next_lease_id.fetch_add(1, Ordering::Relaxed));
        slot.meta.mark_checkout(lease);
        state.leased.insert(slot.meta.id, lease);
    }

    /// Pop the most recently used idle slot and lease it.
    ///
    /// Stale slots met on the way are moved to `closing` and pushed to `stale`.
    fn take_idle_locked(
        &self,
        state: &mut PoolState<ConnOf<F>>,
        stale: &mut Vec<Slot<ConnOf<F>>>,
    ) -> Option<Slot<ConnOf<F>>> {
        while let Some(mut slot) = state.idle.pop_back() {
            debug_assert!(slot.meta.state.is_available());
            if self.is_stale(&slot.meta) {
                state.closing += 1;
                stale.push(slot);
                continue;
            }
            self.lease_locked(state, &mut slot);
            return Some(slot);
        }
        None
    }

    /// Hand a healthy, unaccounted slot to the first waiter, or park it idle.
    ///
    /// `used` is false for slots coming back from a background probe or a
    /// fresh open: they keep their idle-timeout clock and are parked in
    /// last-use order rather than as most recently used.
    ///
    /// Returns the slot when the pool is closed; it has then been counted in
    /// `closing` and the caller must destroy it.
    pub(crate) fn checkin_locked(
        &self,
        state: &mut PoolState<ConnOf<F>>,
        mut slot: Slot<ConnOf<F>>,
        used: bool,
    ) -> Option<Slot<ConnOf<F>>> {
        if state.closed {
            state.closing += 1;
            return Some(slot);
        }

        while let Some(waiter) = state.waiters.pop_front() {
            self.lease_locked(state, &mut slot);
            let id = slot.meta.id;
            match waiter.tx.send(Grant::Slot(slot)) {
                Ok(()) => {
                    tracing::trace!(pool = %self.config.name, conn_id = id, "connection handed to waiter");
                    return None;
                }
                Err(grant) => {
                    state.leased.remove(&id);
                    slot = grant.into_slot()?;
                }
            }
        }

        if used {
            slot.meta.mark_checkin();
            state.idle.push_back(slot);
        } else {
            slot.meta.mark_idle();
            let last_used = slot.meta.last_used_at;
            let at = state.idle.partition_point(|s| s.meta.last_used_at <= last_used);
            state.idle.insert(at, slot);
        }
        None
    }

    /// One unit of capacity was freed: offer it to the head waiter.
    pub(crate) fn release_capacity_locked(&self, state: &mut PoolState<ConnOf<F>>) {
        if state.closed {
            if state.outstanding() == 0 {
                self.drained.notify_waiters();
            }
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(Grant::Capacity).is_ok() {
                state.pending += 1;
                tracing::trace!(pool = %self.config.name, "capacity handed to waiter");
                return;
            }
        }
    }

    /// Close a slot already counted in `closing`, inline.
    async fn destroy(self: &Arc<Self>, slot: Slot<ConnOf<F>>) {
        let closing = Closing {
            pool: Arc::clone(self),
        };
        self.close_slot(slot, closing).await;
    }

    async fn close_slot(&self, mut slot: Slot<ConnOf<F>>, _closing: Closing<F>) {
        let id = slot.meta.id;
        slot.meta.mark_closed();
        slot.conn.close().await;
        self.metrics.connection_closed();
        tracing::debug!(pool = %self.config.name, conn_id = id, "connection closed");
    }

    /// Close a slot already counted in `closing` on a background task.
    ///
    /// Without a runtime the connection is simply dropped.
    fn spawn_destroy(self: &Arc<Self>, slot: Slot<ConnOf<F>>) -> Option<JoinHandle<()>> {
        let closing = Closing {
            pool: Arc::clone(self),
        };
        match Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(self);
                Some(handle.spawn(async move { pool.close_slot(slot, closing).await }))
            }
            Err(_) => {
                drop(slot);
                self.metrics.connection_closed();
                drop(closing);
                None
            }
        }
    }

    pub(crate) fn retire(self: &Arc<Self>, slot: Slot<ConnOf<F>>) {
        let _ = self.spawn_destroy(slot);
    }

    /// Probe a connection, bounded by the validation timeout and `deadline`.
    async fn validate(&self, slot: &mut Slot<ConnOf<F>>, deadline: Option<Instant>) -> bool {
        let mut timeout = self.config.validation_timeout;
        if let Some(deadline) = deadline {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }

        let prior = slot.meta.state;
        slot.meta.mark_validating();
        let passed = tokio::time::timeout(timeout, slot.conn.is_valid(timeout))
            .await
            .unwrap_or(false);
        slot.meta.state = prior;

        self.metrics.health_check(passed);
        if passed {
            slot.meta.mark_health_check();
        } else {
            tracing::debug!(pool = %self.config.name, conn_id = slot.meta.id, "connection failed validation");
        }
        passed
    }

    async fn reset(&self, slot: &mut Slot<ConnOf<F>>) -> bool {
        let passed =
            match tokio::time::timeout(self.config.validation_timeout, slot.conn.reset()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::debug!(pool = %self.config.name, conn_id = slot.meta.id, error = %e, "connection reset failed");
                    false
                }
                Err(_) => {
                    tracing::debug!(pool = %self.config.name, conn_id = slot.meta.id, "connection reset timed out");
                    false
                }
            };
        self.metrics.reset(passed);
        passed
    }

    /// Open a physical connection, retrying transient failures within `deadline`.
    async fn open(&self, started: Instant, deadline: Instant) -> Result<ConnOf<F>, PoolError> {
        let mut retries = 0;
        loop {
            match tokio::time::timeout_at(deadline, self.factory.open(&self.credentials)).await {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(err)) => {
                    self.metrics.connect_failed();
                    let retry_at = Instant::now() + self.config.connect_retry_backoff;
                    if err.is_transient()
                        && retries < self.config.connect_retries
                        && retry_at < deadline
                    {
                        retries += 1;
                        tracing::debug!(
                            pool = %self.config.name,
                            attempt = retries,
                            error = %err,
                            "retrying connection attempt"
                        );
                        tokio::time::sleep_until(retry_at).await;
                        continue;
                    }
                    return Err(PoolError::Connect(err));
                }
                Err(_) => {
                    self.metrics.connect_failed();
                    return Err(PoolError::AcquisitionTimeout(
                        deadline.saturating_duration_since(started),
                    ));
                }
            }
        }
    }

    fn next_step(
        self: &Arc<Self>,
        stale: &mut Vec<Slot<ConnOf<F>>>,
    ) -> Result<Step<F>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        if let Some(slot) = self.take_idle_locked(&mut state, stale) {
            return Ok(Step::Idle(slot));
        }

        if state.total() < self.config.max_connections {
            state.pending += 1;
            return Ok(Step::Create(Reservation::new(Arc::clone(self), false)));
        }

        let (id, rx) = state.enqueue_waiter();
        tracing::trace!(
            pool = %self.config.name,
            waiters = state.waiters.len(),
            "pool exhausted, waiting for a connection"
        );
        Ok(Step::Wait(WaiterGuard::new(Arc::clone(self), id, rx)))
    }

    async fn acquire(
        self: &Arc<Self>,
        started: Instant,
        deadline: Instant,
    ) -> Result<PooledConnection<F>, PoolError> {
        let timed_out = || PoolError::AcquisitionTimeout(deadline.saturating_duration_since(started));
        let mut stale = Vec::new();
        let mut first = true;

        loop {
            if !first && Instant::now() >= deadline {
                return Err(timed_out());
            }
            first = false;

            let step = self.next_step(&mut stale);
            for slot in stale.drain(..) {
                self.retire(slot);
            }

            match step? {
                Step::Idle(slot) => {
                    let mut conn = PooledConnection::new(Arc::clone(self), slot);
                    if self.config.validation != ValidationMode::OnBorrow {
                        return Ok(conn);
                    }
                    // Poisoned while probing so a cancelled probe discards the connection.
                    conn.broken = true;
                    if self.validate(conn.slot_mut(), Some(deadline)).await {
                        conn.broken = false;
                        return Ok(conn);
                    }
                    tracing::debug!(
                        pool = %self.config.name,
                        conn_id = conn.id(),
                        "discarding connection that failed validation on borrow"
                    );
                    drop(conn);
                }
                Step::Create(reservation) => return self.create(reservation, started, deadline).await,
                Step::Wait(waiter) => match waiter.wait(deadline).await {
                    Wake::Slot(slot) => return Ok(PooledConnection::new(Arc::clone(self), slot)),
                    Wake::Capacity(reservation) => {
                        return self.create(reservation, started, deadline).await;
                    }
                    Wake::Closed => return Err(PoolError::PoolClosed),
                    Wake::TimedOut => return Err(timed_out()),
                },
            }
        }
    }

    async fn create(
        self: &Arc<Self>,
        reservation: Reservation<F>,
        started: Instant,
        deadline: Instant,
    ) -> Result<PooledConnection<F>, PoolError> {
        let conn = self.open(started, deadline).await?;
        let mut slot = self.new_slot(conn);

        let mut state = self.state.lock();
        reservation.fulfil(&mut state);
        if state.closed {
            state.closing += 1;
            drop(state);
            self.retire(slot);
            return Err(PoolError::PoolClosed);
        }
        self.lease_locked(&mut state, &mut slot);
        drop(state);

        tracing::debug!(pool = %self.config.name, conn_id = slot.meta.id, "opened new connection");
        Ok(PooledConnection::new(Arc::clone(self), slot))
    }

    /// Settle a returned lease under the lock.
    ///
    /// Returns the slot if it must be destroyed; it has then been counted in
    /// `closing`.
    fn finish(
        &self,
        slot: Slot<ConnOf<F>>,
        lease: LeaseId,
        broken: bool,
    ) -> Result<Option<Slot<ConnOf<F>>>, PoolError> {
        let id = slot.meta.id;
        let mut state = self.state.lock();
        if state.leased.get(&id) != Some(&lease) {
            return Err(PoolError::InvalidState(format!(
                "connection {id} is not leased under {lease}"
            )));
        }
        state.leased.remove(&id);
        debug_assert!(slot.meta.state.is_busy());

        if broken || slot.meta.is_expired(self.config.max_lifetime) {
            state.closing += 1;
            return Ok(Some(slot));
        }
        Ok(self.checkin_locked(&mut state, slot, true))
    }

    async fn checkin(
        self: &Arc<Self>,
        mut conn: PooledConnection<F>,
        healthy: bool,
    ) -> Result<(), PoolError> {
        if !healthy {
            conn.broken = true;
        }
        let open = !self.state.lock().closed;

        if open && !conn.broken && self.config.validation == ValidationMode::OnReturn {
            conn.broken = true;
            let passed = self.validate(conn.slot_mut(), None).await;
            conn.broken = !passed;
        }
        if open && !conn.broken && self.config.reset_on_return {
            conn.broken = true;
            let passed = self.reset(conn.slot_mut()).await;
            conn.broken = !passed;
        }

        let broken = conn.broken;
        let lease = conn.lease;
        let Some(slot) = conn.slot.take() else {
            return Err(PoolError::InvalidState(format!(
                "{lease} was already returned"
            )));
        };
        drop(conn);

        tracing::trace!(pool = %self.config.name, conn_id = slot.meta.id, broken, "returning connection to pool");
        if let Some(slot) = self.finish(slot, lease, broken)? {
            self.destroy(slot).await;
            if broken {
                self.schedule_replenish();
            }
        }
        Ok(())
    }

    fn checkin_on_drop(
        self: &Arc<Self>,
        slot: Slot<ConnOf<F>>,
        lease: LeaseId,
        broken: bool,
        io_allowed: bool,
    ) {
        if io_allowed && !broken && self.config.checkin_needs_io() {
            if let Ok(handle) = Handle::try_current() {
                let conn = PooledConnection {
                    pool: Arc::clone(self),
                    slot: Some(slot),
                    lease,
                    broken,
                    io_on_drop: false,
                };
                let pool = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = pool.checkin(conn, true).await {
                        tracing::error!(pool = %pool.config.name, error = %e, "failed to return connection");
                    }
                });
                return;
            }
        }

        tracing::trace!(pool = %self.config.name, conn_id = slot.meta.id, broken, "returning connection to pool");
        match self.finish(slot, lease, broken) {
            Ok(Some(slot)) => {
                self.retire(slot);
                if broken {
                    self.schedule_replenish();
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(pool = %self.config.name, error = %e, "failed to return connection");
            }
        }
    }

    fn schedule_replenish(self: &Arc<Self>) {
        if self.config.min_connections == 0 {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let pool = Arc::clone(self);
            handle.spawn(async move { pool.replenish().await });
        }
    }

    /// Top the idle set up to `min_connections`.
    async fn replenish(self: &Arc<Self>) {
        let reservations: Vec<Reservation<F>> = {
            let mut state = self.state.lock();
            if state.closed || !state.waiters.is_empty() {
                return;
            }
            let have = state.idle.len() as u32 + state.validating + state.replenishing;
            let headroom = self.config.max_connections.saturating_sub(state.total());
            let wanted = self.config.min_connections.saturating_sub(have).min(headroom);
            state.pending += wanted;
            state.replenishing += wanted;
            (0..wanted)
                .map(|_| Reservation::new(Arc::clone(self), true))
                .collect()
        };

        if reservations.is_empty() {
            return;
        }
        tracing::debug!(pool = %self.config.name, count = reservations.len(), "replenishing idle connections");

        for reservation in reservations {
            let started = Instant::now();
            let deadline = deadline_after(started, self.config.connection_timeout);
            match self.open(started, deadline).await {
                Ok(conn) => {
                    let slot = self.new_slot(conn);
                    let doomed = {
                        let mut state = self.state.lock();
                        reservation.fulfil(&mut state);
                        self.checkin_locked(&mut state, slot, false)
                    };
                    if let Some(slot) = doomed {
                        self.destroy(slot).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(pool = %self.config.name, error = %e, "failed to replenish idle connections");
                    break;
                }
            }
        }
    }

    /// One reaper pass: evict stale idle slots, probe under `Periodic`, replenish.
    ///
    /// Always runs on its own task.
    pub(crate) async fn maintain(self: &Arc<Self>) {
        let (stale, to_check) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            let periodic = self.config.validation == ValidationMode::Periodic;
            let mut stale = Vec::new();
            let mut to_check = Vec::new();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            while let Some(mut slot) = state.idle.pop_front() {
                if self.is_stale(&slot.meta) {
                    stale.push(slot);
                } else if periodic && slot.meta.needs_health_check(self.config.health_check_interval)
                {
                    slot.meta.mark_validating();
                    to_check.push(slot);
                } else {
                    kept.push_back(slot);
                }
            }
            state.idle = kept;
            state.closing += stale.len() as u32;
            state.validating += to_check.len() as u32;
            (stale, to_check)
        };

        if !stale.is_empty() {
            tracing::debug!(pool = %self.config.name, count = stale.len(), "evicting expired idle connections");
        }
        for slot in stale {
            self.destroy(slot).await;
        }

        for mut slot in to_check {
            let passed = self.validate(&mut slot, None).await;
            let doomed = {
                let mut state = self.state.lock();
                state.validating -= 1;
                if passed {
                    self.checkin_locked(&mut state, slot, false)
                } else {
                    state.closing += 1;
                    Some(slot)
                }
            };
            if let Some(slot) = doomed {
                self.destroy(slot).await;
            }
        }

        self.replenish().await;
    }

    fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            available: state.idle.len() as u32,
            in_use: state.leased.len() as u32,
            pending: state.pending + state.validating + state.closing,
            waiting: state.waiters.len() as u32,
            total: state.total(),
            max: self.config.max_connections,
        }
    }
}

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    // Far enough to never fire, close enough not to overflow.
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a builder for a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder<F> {
        PoolBuilder::new()
    }

    /// Create a pool and start its background reaper.
    ///
    /// The reaper's first pass runs immediately and opens connections up to
    /// `min_connections` in the background; this call does not wait for them.
    pub async fn new(
        factory: F,
        credentials: Credentials,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(PoolInner::new(factory, credentials, config, shutdown_tx));

        if !reaper::spawn(&inner, shutdown_rx) {
            tracing::warn!(pool = %inner.config.name, "no tokio runtime, background maintenance disabled");
        }

        tracing::info!(
            pool = %inner.config.name,
            min = inner.config.min_connections,
            max = inner.config.max_connections,
            "connection pool created"
        );
        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// This will either return an existing idle connection or create a new one
    /// if the pool is not at capacity. If all connections are in use and the
    /// pool is at capacity, this will wait until a connection becomes available
    /// or the configured `connection_timeout` is reached.
    pub async fn get(&self) -> Result<PooledConnection<F>, PoolError> {
        self.get_timeout(self.inner.config.connection_timeout).await
    }

    /// Get a connection, waiting at most `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<F>, PoolError> {
        self.get_deadline(deadline_after(Instant::now(), timeout))
            .await
    }

    /// Get a connection, waiting until `deadline` at the latest.
    ///
    /// Waiting borrowers are served in arrival order. Dropping the returned
    /// future while it waits gives up the place in the queue; anything granted
    /// in the meantime goes back to the pool.
    pub async fn get_deadline(&self, deadline: Instant) -> Result<PooledConnection<F>, PoolError> {
        let started = Instant::now();
        tracing::trace!(pool = %self.inner.config.name, "acquiring connection from pool");

        let result = self.inner.acquire(started, deadline).await;
        let outcome = match &result {
            Ok(_) => CheckoutOutcome::Success,
            Err(PoolError::AcquisitionTimeout(_)) => CheckoutOutcome::Timeout,
            Err(_) => CheckoutOutcome::Failed,
        };
        self.inner.metrics.checkout(outcome, started.elapsed());
        result
    }

    /// Try to get an idle connection without waiting.
    ///
    /// Returns `Ok(None)` if no idle connection is available. Never opens a
    /// connection and skips validation on borrow.
    pub fn try_get(&self) -> Result<Option<PooledConnection<F>>, PoolError> {
        let mut stale = Vec::new();
        let slot = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            self.inner.take_idle_locked(&mut state, &mut stale)
        };
        for slot in stale {
            self.inner.retire(slot);
        }

        let conn = slot.map(|slot| PooledConnection::new(Arc::clone(&self.inner), slot));
        if conn.is_some() {
            self.inner
                .metrics
                .checkout(CheckoutOutcome::Success, Duration::ZERO);
        }
        Ok(conn)
    }

    /// Return a connection to the pool.
    ///
    /// With `healthy == false` the connection is closed instead of reused
    /// and, if the pool is below `min_connections`, a replacement is opened
    /// in the background. Returning a connection leased from another pool
    /// yields [`PoolError::InvalidState`]; that connection then goes back
    /// to its own pool.
    pub async fn release(&self, conn: PooledConnection<F>, healthy: bool) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&conn.pool, &self.inner) {
            return Err(PoolError::InvalidState(format!(
                "connection {} was leased from a different pool",
                conn.id()
            )));
        }
        self.inner.checkin(conn, healthy).await
    }

    /// Run one maintenance pass now instead of waiting for the reaper.
    pub async fn run_maintenance(&self) {
        let pool = Arc::clone(&self.inner);
        if let Err(e) = tokio::spawn(async move { pool.maintain().await }).await {
            tracing::error!(pool = %self.inner.config.name, error = %e, "maintenance task failed");
        }
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Get cumulative pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Close the pool.
    ///
    /// New acquisitions fail with [`PoolError::PoolClosed`], queued waiters
    /// are woken with the same error, and idle connections are closed before
    /// this returns. Leased connections are closed as they are returned.
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        let (idle, waiters, was_open) = {
            let mut state = self.inner.state.lock();
            let was_open = !state.closed;
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.closing += idle.len() as u32;
            let waiters = std::mem::take(&mut state.waiters);
            if state.outstanding() == 0 {
                self.inner.drained.notify_waiters();
            }
            (idle, waiters, was_open)
        };

        self.inner.shutdown.send_replace(true);
        drop(waiters);

        if was_open {
            tracing::info!(pool = %self.inner.config.name, idle = idle.len(), "closing connection pool");
        }

        let closers: Vec<_> = idle
            .into_iter()
            .filter_map(|slot| self.inner.spawn_destroy(slot))
            .collect();
        for closer in closers {
            if let Err(e) = closer.await {
                tracing::error!(pool = %self.inner.config.name, error = %e, "connection close task failed");
            }
        }
    }

    /// Close the pool and wait for leased connections to come back.
    ///
    /// Returns `true` once every connection has been returned and closed, or
    /// `false` if `timeout` elapses first.
    pub async fn close_and_drain(&self, timeout: Duration) -> bool {
        self.close().await;

        let deadline = deadline_after(Instant::now(), timeout);
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.state.lock().outstanding() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inner.state.lock().outstanding() == 0;
            }
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the credentials used to open connections.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<F: ConnectionFactory> {
    factory: Option<F>,
    credentials: Credentials,
    config: PoolConfig,
}

impl<F: ConnectionFactory> Default for PoolBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ConnectionFactory> PoolBuilder<F> {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factory: None,
            credentials: Credentials::default(),
            config: PoolConfig::default(),
        }
    }

    /// Set the connection factory.
    #[must_use]
    pub fn factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the credentials passed to the factory.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the whole pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.config = self.config.name(name);
        self
    }

    /// Set the minimum number of idle connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.config = self.config.min_connections(count);
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config = self.config.max_connections(count);
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connection_timeout(timeout);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.idle_timeout(timeout);
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config = self.config.max_lifetime(lifetime);
        self
    }

    /// Set the validation mode.
    #[must_use]
    pub fn validation(mut self, mode: ValidationMode) -> Self {
        self.config = self.config.validation(mode);
        self
    }

    /// Set the reaper interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.health_check_interval(interval);
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool<F>, PoolError> {
        let factory = self.factory.ok_or_else(|| {
            PoolError::Configuration("a connection factory is required".into())
        })?;
        Pool::new(factory, self.credentials, self.config).await
    }
}

/// A connection retrieved from the pool.
///
/// Dereferences to the factory's connection type. When dropped, the
/// connection is automatically returned to the pool as healthy unless
/// [`mark_broken`](Self::mark_broken) was called.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Arc<PoolInner<F>>,
    slot: Option<Slot<ConnOf<F>>>,
    lease: LeaseId,
    broken: bool,
    io_on_drop: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(pool: Arc<PoolInner<F>>, slot: Slot<ConnOf<F>>) -> Self {
        let lease = slot.meta.lease.unwrap_or(LeaseId(0));
        Self {
            pool,
            slot: Some(slot),
            lease,
            broken: false,
            io_on_drop: true,
        }
    }

    #[allow(clippy::expect_used)]
    fn slot(&self) -> &Slot<ConnOf<F>> {
        self.slot
            .as_ref()
            .expect("slot is only taken by consuming methods")
    }

    #[allow(clippy::expect_used)]
    fn slot_mut(&mut self) -> &mut Slot<ConnOf<F>> {
        self.slot
            .as_mut()
            .expect("slot is only taken by consuming methods")
    }

    /// Pool-unique identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot().meta.id
    }

    /// Identity of this lease.
    #[must_use]
    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    /// Lifecycle metadata of the underlying connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.slot().meta
    }

    /// Mark the connection as unusable; it is closed instead of reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether the connection has been marked broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Return the connection to the pool, awaiting validation or reset.
    pub async fn release(self) -> Result<(), PoolError> {
        let pool = Arc::clone(&self.pool);
        pool.checkin(self, true).await
    }

    /// Detach the connection from the pool.
    ///
    /// The pool stops tracking it and frees its capacity; the caller becomes
    /// responsible for closing it.
    #[must_use]
    pub fn detach(mut self) -> Option<ConnOf<F>> {
        let slot = self.slot.take()?;
        let mut state = self.pool.state.lock();
        state.leased.remove(&slot.meta.id);
        self.pool.release_capacity_locked(&mut state);
        drop(state);

        tracing::debug!(pool = %self.pool.config.name, conn_id = slot.meta.id, "connection detached from pool");
        Some(slot.conn)
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = ConnOf<F>;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot_mut().conn
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.config.name)
            .field("id", &self.slot.as_ref().map(|s| s.meta.id))
            .field("lease", &self.lease)
            .field("broken", &self.broken)
            .finish()
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool
                .checkin_on_drop(slot, self.lease, self.broken, self.io_on_drop);
        }
    }
}

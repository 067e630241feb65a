//! Pool status and cumulative metrics.
//!
//! Counters are plain atomics updated off the pool lock. With the `otel`
//! feature enabled the same events are also recorded on OpenTelemetry
//! instruments obtained from the global meter provider.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently leased.
    pub in_use: u32,
    /// Connections being opened, probed by the reaper, or closed.
    pub pending: u32,
    /// Borrowers parked waiting for a connection.
    pub waiting: u32,
    /// Total number of connections counted against the limit.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Percentage of the connection limit currently leased.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// Cumulative pool counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolMetrics {
    /// Physical connections opened.
    pub connections_created: u64,
    /// Physical connections closed.
    pub connections_closed: u64,
    /// Acquisitions that returned a connection.
    pub checkouts_successful: u64,
    /// Acquisitions that failed for any reason.
    pub checkouts_failed: u64,
    /// Acquisitions that failed because the deadline elapsed.
    pub acquire_timeouts: u64,
    /// Factory calls that returned an error or timed out.
    pub connect_failures: u64,
    /// Validation probes run.
    pub health_checks_performed: u64,
    /// Validation probes that failed.
    pub health_checks_failed: u64,
    /// Connection resets run on return.
    pub resets_performed: u64,
    /// Connection resets that failed.
    pub resets_failed: u64,
    /// Total time callers spent inside acquisition.
    pub total_wait_time: Duration,
}

impl PoolMetrics {
    /// Fraction of acquisitions that succeeded, `1.0` if none were attempted.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Mean time spent per acquisition.
    #[must_use]
    pub fn average_wait_time(&self) -> Duration {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return Duration::ZERO;
        }
        let micros = self.total_wait_time.as_micros() / u128::from(total);
        Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    /// Physical connections currently open according to the counters.
    #[must_use]
    pub fn connections_open(&self) -> u64 {
        self.connections_created
            .saturating_sub(self.connections_closed)
    }
}

/// Outcome of one acquisition, for metric recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckoutOutcome {
    Success,
    Timeout,
    Failed,
}

pub(crate) struct MetricsRecorder {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    acquire_timeouts: AtomicU64,
    connect_failures: AtomicU64,
    health_checks_performed: AtomicU64,
    health_checks_failed: AtomicU64,
    resets_performed: AtomicU64,
    resets_failed: AtomicU64,
    total_wait_micros: AtomicU64,
    #[cfg(feature = "otel")]
    otel: otel::Instruments,
}

impl MetricsRecorder {
    #[cfg_attr(not(feature = "otel"), allow(unused_variables))]
    pub(crate) fn new(pool_name: &str) -> Self {
        Self {
            connections_created: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            checkouts_successful: AtomicU64::new(0),
            checkouts_failed: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            health_checks_performed: AtomicU64::new(0),
            health_checks_failed: AtomicU64::new(0),
            resets_performed: AtomicU64::new(0),
            resets_failed: AtomicU64::new(0),
            total_wait_micros: AtomicU64::new(0),
            #[cfg(feature = "otel")]
            otel: otel::Instruments::new(pool_name),
        }
    }

    pub(crate) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        self.otel.connection_created();
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        self.otel.connection_closed();
    }

    pub(crate) fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn health_check(&self, passed: bool) {
        self.health_checks_performed.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.health_checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reset(&self, passed: bool) {
        self.resets_performed.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.resets_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn checkout(&self, outcome: CheckoutOutcome, waited: Duration) {
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.total_wait_micros.fetch_add(micros, Ordering::Relaxed);
        match outcome {
            CheckoutOutcome::Success => {
                self.checkouts_successful.fetch_add(1, Ordering::Relaxed);
            }
            CheckoutOutcome::Timeout => {
                self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            CheckoutOutcome::Failed => {
                self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        #[cfg(feature = "otel")]
        self.otel.checkout(outcome, waited);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: self.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            health_checks_performed: self.health_checks_performed.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            resets_performed: self.resets_performed.load(Ordering::Relaxed),
            resets_failed: self.resets_failed.load(Ordering::Relaxed),
            total_wait_time: Duration::from_micros(self.total_wait_micros.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(feature = "otel")]
mod otel {
    use std::time::Duration;

    use opentelemetry::metrics::{Counter, Histogram};
    use opentelemetry::{KeyValue, global};

    use super::CheckoutOutcome;

    /// Attribute key carrying the pool name.
    const POOL_NAME: &str = "db.client.connection.pool.name";

    pub(super) struct Instruments {
        created: Counter<u64>,
        closed: Counter<u64>,
        timeouts: Counter<u64>,
        wait_time: Histogram<f64>,
        attributes: [KeyValue; 1],
    }

    impl Instruments {
        pub(super) fn new(pool_name: &str) -> Self {
            let meter = global::meter("wirepool");
            Self {
                created: meter
                    .u64_counter("db.client.connection.created")
                    .with_description("Physical connections opened by the pool")
                    .build(),
                closed: meter
                    .u64_counter("db.client.connection.closed")
                    .with_description("Physical connections closed by the pool")
                    .build(),
                timeouts: meter
                    .u64_counter("db.client.connection.timeouts")
                    .with_description("Acquisitions that hit their deadline")
                    .build(),
                wait_time: meter
                    .f64_histogram("db.client.connection.wait_time")
                    .with_description("Time spent acquiring a connection")
                    .with_unit("s")
                    .build(),
                attributes: [KeyValue::new(POOL_NAME, pool_name.to_string())],
            }
        }

        pub(super) fn connection_created(&self) {
            self.created.add(1, &self.attributes);
        }

        pub(super) fn connection_closed(&self) {
            self.closed.add(1, &self.attributes);
        }

        pub(super) fn checkout(&self, outcome: CheckoutOutcome, waited: Duration) {
            if outcome == CheckoutOutcome::Timeout {
                self.timeouts.add(1, &self.attributes);
            }
            self.wait_time.record(waited.as_secs_f64(), &self.attributes);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_utilization() {
        let status = PoolStatus {
            available: 2,
            in_use: 5,
            pending: 0,
            waiting: 0,
            total: 7,
            max: 10,
        };
        assert!((status.utilization() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_without_checkouts() {
        let metrics = PoolMetrics::default();
        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.average_wait_time(), Duration::ZERO);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = MetricsRecorder::new("test");
        recorder.connection_created();
        recorder.connection_created();
        recorder.connection_closed();
        recorder.health_check(true);
        recorder.health_check(false);
        recorder.reset(false);
        recorder.checkout(CheckoutOutcome::Success, Duration::from_millis(10));
        recorder.checkout(CheckoutOutcome::Timeout, Duration::from_millis(30));
        recorder.checkout(CheckoutOutcome::Failed, Duration::from_millis(20));

        let metrics = recorder.snapshot();
        assert_eq!(metrics.connections_created, 2);
        assert_eq!(metrics.connections_open(), 1);
        assert_eq!(metrics.health_checks_performed, 2);
        assert_eq!(metrics.health_checks_failed, 1);
        assert_eq!(metrics.resets_failed, 1);
        assert_eq!(metrics.checkouts_successful, 1);
        assert_eq!(metrics.checkouts_failed, 2);
        assert_eq!(metrics.acquire_timeouts, 1);
        assert_eq!(metrics.total_wait_time, Duration::from_millis(60));
        assert_eq!(metrics.average_wait_time(), Duration::from_millis(20));
        assert!((metrics.checkout_success_rate() - 1.0 / 3.0).abs() < 1e-9);
    }
}

//! Pool configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;

/// Default pool name used in log fields and metric attributes.
pub const DEFAULT_POOL_NAME: &str = "wirepool";

/// When the pool probes connections with [`Connection::is_valid`](crate::Connection::is_valid).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationMode {
    /// Never probe; rely on callers reporting broken connections.
    None,
    /// Probe an idle connection before handing it to a borrower.
    #[default]
    OnBorrow,
    /// Probe a connection when it is released, before it re-enters the idle set.
    OnReturn,
    /// Probe idle connections from the background reaper.
    Periodic,
}

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Pool name, attached to log events and metrics.
    pub name: Arc<str>,

    /// Minimum number of idle connections to maintain.
    pub min_connections: u32,

    /// Maximum number of connections allowed.
    pub max_connections: u32,

    /// Time to wait for a connection before timing out.
    pub connection_timeout: Duration,

    /// Time a connection can be idle before being closed.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,

    /// When connections are validated.
    pub validation: ValidationMode,

    /// Upper bound for a single validation probe.
    pub validation_timeout: Duration,

    /// Interval between reaper runs.
    ///
    /// With [`ValidationMode::Periodic`] this is also the minimum time
    /// between two probes of the same idle connection.
    pub health_check_interval: Duration,

    /// Whether to reset connection state before a connection re-enters the idle set.
    pub reset_on_return: bool,

    /// Extra attempts after a transient connect failure.
    pub connect_retries: u32,

    /// Delay before each connect retry.
    pub connect_retry_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: Arc::from(DEFAULT_POOL_NAME),
            min_connections: 1,
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            validation: ValidationMode::OnBorrow,
            validation_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            reset_on_return: false,
            connect_retries: 1,
            connect_retry_backoff: Duration::from_millis(50),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the minimum number of idle connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the validation mode.
    #[must_use]
    pub fn validation(mut self, mode: ValidationMode) -> Self {
        self.validation = mode;
        self
    }

    /// Set the timeout for a single validation probe.
    #[must_use]
    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Set the reaper interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Enable or disable connection reset on return.
    #[must_use]
    pub fn reset_on_return(mut self, enabled: bool) -> Self {
        self.reset_on_return = enabled;
        self
    }

    /// Set the number of retries after a transient connect failure.
    #[must_use]
    pub fn connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Set the delay before each connect retry.
    #[must_use]
    pub fn connect_retry_backoff(mut self, backoff: Duration) -> Self {
        self.connect_retry_backoff = backoff;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(PoolError::Configuration(
                "health_check_interval must be greater than 0".into(),
            ));
        }
        if self.validation_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "validation_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Whether returning a connection requires async work (probe or reset).
    pub(crate) fn checkin_needs_io(&self) -> bool {
        self.reset_on_return || self.validation == ValidationMode::OnReturn
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(&*config.name, DEFAULT_POOL_NAME);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.validation, ValidationMode::OnBorrow);
        assert!(!config.reset_on_return);
        assert_eq!(config.connect_retries, 1);
        assert!(!config.checkin_needs_io());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .name("orders")
            .min_connections(5)
            .max_connections(50)
            .connection_timeout(Duration::from_secs(60))
            .idle_timeout(Duration::from_secs(120))
            .max_lifetime(Duration::from_secs(3600))
            .validation(ValidationMode::Periodic)
            .validation_timeout(Duration::from_millis(250))
            .health_check_interval(Duration::from_secs(5))
            .reset_on_return(true)
            .connect_retries(3)
            .connect_retry_backoff(Duration::from_millis(10));

        assert_eq!(&*config.name, "orders");
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.connection_timeout, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.validation, ValidationMode::Periodic);
        assert_eq!(config.validation_timeout, Duration::from_millis(250));
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert!(config.reset_on_return);
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.connect_retry_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_checkin_needs_io() {
        assert!(
            PoolConfig::new()
                .validation(ValidationMode::OnReturn)
                .checkin_needs_io()
        );
        assert!(PoolConfig::new().reset_on_return(true).checkin_needs_io());
        assert!(
            !PoolConfig::new()
                .validation(ValidationMode::Periodic)
                .checkin_needs_io()
        );
    }

    #[test]
    fn test_config_validation_success() {
        let config = PoolConfig::new().min_connections(1).max_connections(10);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = PoolConfig::new().min_connections(20).max_connections(10);

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_connections cannot be greater than max_connections")
        );
    }

    #[test]
    fn test_config_validation_zero_max() {
        let config = PoolConfig::new().min_connections(0).max_connections(0);

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_connections must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let config = PoolConfig::new().health_check_interval(Duration::ZERO);

        assert!(matches!(
            config.validate(),
            Err(PoolError::Configuration(msg)) if msg.contains("health_check_interval")
        ));
    }

    #[test]
    fn test_config_equal_min_max() {
        let config = PoolConfig::new().min_connections(5).max_connections(5);

        assert!(config.validate().is_ok());
    }
}

//! Test fixture utilities.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wirepool::{Credentials, Pool, PoolConfig, PoolError};

use crate::mock::MockFactory;

/// Credentials pointing at a non-existent local server.
///
/// The mock factory never dials them; they only show up in log output.
#[must_use]
pub fn test_credentials() -> Credentials {
    Credentials::new("localhost")
        .with_port(3306)
        .with_user("test")
        .with_password("test")
        .with_database("testdb")
}

/// Pool configuration suited to tests.
///
/// No idle floor and short timeouts. The reaper interval is long enough that,
/// after its initial pass, it only runs when a test advances the clock.
#[must_use]
pub fn test_config(max: u32) -> PoolConfig {
    PoolConfig::new()
        .name("test")
        .min_connections(0)
        .max_connections(max)
        .connection_timeout(Duration::from_secs(5))
        .validation_timeout(Duration::from_secs(1))
        .health_check_interval(Duration::from_secs(60))
        .connect_retry_backoff(Duration::from_millis(10))
}

/// Build a pool over `factory` with [`test_credentials`].
pub async fn mock_pool(
    factory: &MockFactory,
    config: PoolConfig,
) -> Result<Pool<MockFactory>, PoolError> {
    Pool::new(factory.clone(), test_credentials(), config).await
}

/// Install a `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

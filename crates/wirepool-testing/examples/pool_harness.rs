//! Connection pool load harness.
//!
//! Drives a pool backed by the mock factory the way a service would: a
//! burst of short queries, a batch of inserts that hold their connection for
//! a while, and a comparison against a single dedicated connection.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=wirepool=debug cargo run -p wirepool-testing --example pool_harness
//! ```
//!
//! The load is read from the environment (`cargo xtask harness` sets these):
//!
//! - `HARNESS_TASKS`: concurrent `SELECT 1` tasks (default 100)
//! - `HARNESS_INSERTS`: insert tasks holding a connection (default 50)
//! - `HARNESS_MAX_CONNECTIONS`: pool size (default 20)

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use wirepool::{ConnectionFactory, Credentials, Pool, PoolConfig, PoolError};
use wirepool_testing::{MockFactory, MockResult};

type MockPool = Pool<MockFactory>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let credentials = Credentials::from_connection_string(
        "Server=localhost,3306;Database=testj;User Id=root;Password=secret",
    )?;

    let factory = MockFactory::builder()
        .with_response("SELECT 1", MockResult::scalar(1))
        .with_connect_latency(Duration::from_millis(20))
        .with_command_latency(Duration::from_millis(5))
        .build();

    println!("=== Connection Pool Harness ===\n");

    let tasks = env_or("HARNESS_TASKS", 100);
    let inserts = env_or("HARNESS_INSERTS", 50);
    let max_connections = env_or("HARNESS_MAX_CONNECTIONS", 20);

    let pool_config = PoolConfig::new()
        .name("harness")
        .min_connections(2.min(max_connections))
        .max_connections(max_connections)
        .connection_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300));

    println!("Pool configuration:");
    println!("  Min connections: {}", pool_config.min_connections);
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Idle timeout: {:?}", pool_config.idle_timeout);
    println!();

    let pool: Arc<MockPool> =
        Arc::new(Pool::new(factory.clone(), credentials.clone(), pool_config).await?);

    println!("Pool created, waiting for minimum connections...\n");
    tokio::time::sleep(Duration::from_millis(200)).await;
    print_pool_status(&pool);

    // 1. Many short queries
    println!("\n1. {tasks} concurrent `SELECT 1` tasks:");
    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..tasks {
        let p = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let mut conn = p.get().await?;
            let result = conn.execute("SELECT 1").await;
            Ok::<_, PoolError>(result.is_ok())
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if matches!(handle.await?, Ok(true)) {
            completed += 1;
        }
    }
    println!("  Completed {} queries in {:?}", completed, start.elapsed());
    print_pool_metrics(&pool);

    // 2. Inserts holding their connection
    println!("\n2. {inserts} insert tasks holding connections:");
    let pool_for_load = Arc::clone(&pool);
    let load_test = tokio::spawn(async move {
        let mut handles = vec![];
        for i in 0..inserts {
            let p = Arc::clone(&pool_for_load);
            handles.push(tokio::spawn(async move {
                let mut conn = p.get().await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = conn.execute(&format!("INSERT INTO t VALUES ({i})")).await;
                Ok::<_, PoolError>(())
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    });

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        print_pool_status(&pool);
    }
    load_test.await?;

    // 3. Pool against a single dedicated connection
    println!("\n3. Single connection vs pool (100 sequential queries each):");
    let start = Instant::now();
    let mut single = factory.open(&credentials).await?;
    for _ in 0..100 {
        single.execute("SELECT 1").await?;
    }
    println!("  Single connection: {:?}", start.elapsed());

    let start = Instant::now();
    for _ in 0..100 {
        let mut conn = pool.get().await?;
        conn.execute("SELECT 1").await?;
    }
    println!("  Pool: {:?}", start.elapsed());

    println!("\n4. Final pool metrics:");
    print_pool_metrics(&pool);
    print_pool_status(&pool);

    println!("\n5. Graceful shutdown:");
    let drained = pool.close_and_drain(Duration::from_secs(5)).await;
    println!("  Pool closed (drained: {drained}).");
    println!("  Mock backend: {:?}", factory.stats());

    Ok(())
}

fn env_or(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn print_pool_status(pool: &MockPool) {
    let status = pool.status();
    println!(
        "  Status: {}/{} connections, {} waiting ({:.1}% utilization)",
        status.in_use,
        status.total,
        status.waiting,
        status.utilization()
    );
}

fn print_pool_metrics(pool: &MockPool) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Connections created: {}", metrics.connections_created);
    println!("    Connections closed: {}", metrics.connections_closed);
    println!(
        "    Checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
    println!("    Average wait: {:?}", metrics.average_wait_time());
    println!(
        "    Health checks: {} performed, {} failed",
        metrics.health_checks_performed, metrics.health_checks_failed
    );
}

//! Basic pool behaviour against the mock backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use wirepool::{ConnectionState, Credentials, Pool, PoolError};
use wirepool_testing::fixtures::{init_tracing, mock_pool, test_config};
use wirepool_testing::{MockFactory, MockResult};

// =============================================================================
// Basic Pool Tests
// =============================================================================

#[tokio::test]
async fn test_pool_create_and_close() {
    init_tracing();
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(5))
        .await
        .expect("Failed to create pool");

    assert!(!pool.is_closed());

    let status = pool.status();
    assert_eq!(status.max, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, 0);

    pool.close().await;
    assert!(pool.is_closed());
}

#[tokio::test]
async fn test_pool_get_connection() {
    let factory = MockFactory::builder()
        .with_response("SELECT 42 AS answer", MockResult::scalar(42))
        .build();
    let pool = mock_pool(&factory, test_config(5)).await.unwrap();

    let mut conn = pool.get().await.expect("Failed to get connection");
    let result = conn.execute("SELECT 42 AS answer").await.expect("Query failed");
    assert_eq!(result, MockResult::Scalar(42));

    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.total, 1);
    assert_eq!(conn.metadata().state, ConnectionState::Leased);
}

#[tokio::test]
async fn test_pool_connection_reuse() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(5)).await.unwrap();

    let first_id = {
        let conn = pool.get().await.unwrap();
        conn.id()
    };

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.id(), first_id, "idle connection should be reused");
    assert_eq!(conn.metadata().checkout_count, 2);
    assert_eq!(factory.stats().opened, 1);
}

#[tokio::test]
async fn test_pool_reuses_most_recently_returned() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(5)).await.unwrap();

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let b_id = b.id();
    drop(a);
    drop(b);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.id(), b_id);
}

#[tokio::test]
async fn test_pool_try_get_with_idle_connection() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    drop(pool.get().await.unwrap());

    let mut conn = pool
        .try_get()
        .expect("try_get should succeed")
        .expect("Should get an idle connection");
    assert!(conn.execute("SELECT 1").await.is_ok());
}

#[tokio::test]
async fn test_pool_try_get_no_idle_connections() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(1)).await.unwrap();

    assert!(pool.try_get().unwrap().is_none());
    assert_eq!(factory.stats().opened, 0, "try_get must not open connections");

    let _conn = pool.get().await.unwrap();
    let result = pool.try_get().expect("try_get should not error");
    assert!(result.is_none(), "Should return None when no idle connections");
}

#[tokio::test]
async fn test_pool_passes_credentials_to_factory() {
    let credentials = Credentials::from_connection_string(
        "Server=db.internal,3307;Database=testj;User Id=app;Password=pw",
    )
    .unwrap();
    let factory = MockFactory::new();
    let pool = Pool::builder()
        .factory(factory.clone())
        .credentials(credentials.clone())
        .min_connections(0)
        .build()
        .await
        .unwrap();

    assert_eq!(pool.credentials(), &credentials);
    assert_eq!(pool.credentials().endpoint(), "db.internal:3307");
    assert!(!format!("{:?}", pool.credentials()).contains("pw\""));
}

// =============================================================================
// Release Tests
// =============================================================================

#[tokio::test]
async fn test_release_healthy_returns_to_idle() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    pool.release(conn, true).await.unwrap();

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);
    assert_eq!(factory.stats().closed, 0);
}

#[tokio::test]
async fn test_release_unhealthy_destroys() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    pool.release(conn, false).await.unwrap();

    let status = pool.status();
    assert_eq!(status.available, 0);
    assert_eq!(status.total, 0);
    assert_eq!(factory.stats().closed, 1);
    assert_eq!(factory.stats().live, 0);
}

#[tokio::test]
async fn test_mark_broken_destroys_on_release() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    let mut conn = pool.get().await.unwrap();
    conn.kill();
    assert!(conn.execute("SELECT 1").await.is_err());
    conn.mark_broken();
    assert!(conn.is_broken());
    conn.release().await.unwrap();

    assert_eq!(factory.stats().closed, 1);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_release_to_other_pool_is_invalid() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();
    let other = mock_pool(&factory, test_config(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    let err = other.release(conn, true).await.unwrap_err();
    assert!(matches!(err, PoolError::InvalidState(_)));

    assert_eq!(pool.status().available, 1);
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(other.status().total, 0);
}

// =============================================================================
// Pool Metrics Tests
// =============================================================================

#[tokio::test]
async fn test_pool_metrics() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(5)).await.unwrap();

    for _ in 0..3 {
        let mut conn = pool.get().await.unwrap();
        conn.execute("SELECT 1").await.unwrap();
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, 1);
    assert_eq!(metrics.connections_closed, 0);
    assert_eq!(metrics.checkouts_successful, 3);
    assert_eq!(metrics.checkouts_failed, 0);
    assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_pool_status_tracking() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(5)).await.unwrap();

    let conn1 = pool.get().await.unwrap();
    let conn2 = pool.get().await.unwrap();

    let status = pool.status();
    assert_eq!(status.in_use, 2);
    assert_eq!(status.available, 0);
    assert_eq!(status.total, 2);
    assert!((status.utilization() - 40.0).abs() < f64::EPSILON);

    drop(conn1);
    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.available, 1);

    drop(conn2);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 2);
    assert_eq!(status.waiting, 0);
}

// =============================================================================
// Connection Detach Tests
// =============================================================================

#[tokio::test]
async fn test_pool_detach_connection() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(1)).await.unwrap();

    let conn = pool.get().await.unwrap();
    let mut raw = conn.detach().expect("detach should yield the connection");

    assert_eq!(pool.status().total, 0);
    assert!(!raw.is_closed());
    assert!(raw.execute("SELECT 1").await.is_ok());

    // The freed capacity is usable while the detached connection lives on.
    let _conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
        .await
        .expect("capacity should be free")
        .unwrap();
    assert_eq!(factory.stats().live, 2);
}

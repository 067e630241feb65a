//! Pool close and drain tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use wirepool::PoolError;
use wirepool_testing::MockFactory;
use wirepool_testing::fixtures::{mock_pool, test_config};

#[tokio::test]
async fn test_pool_closed_error() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    pool.close().await;

    let result = pool.get().await;
    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert!(matches!(pool.try_get(), Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_close_closes_idle_connections() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(5)).await.unwrap();

    let conns = vec![
        pool.get().await.unwrap(),
        pool.get().await.unwrap(),
        pool.get().await.unwrap(),
    ];
    drop(conns);
    assert_eq!(pool.status().available, 3);

    pool.close().await;

    let stats = factory.stats();
    assert_eq!(stats.closed, 3);
    assert_eq!(stats.live, 0);
    assert_eq!(pool.status().total, 0);
    assert_eq!(pool.metrics().connections_closed, 3);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();
    drop(pool.get().await.unwrap());

    pool.close().await;
    pool.close().await;

    assert!(pool.is_closed());
    assert_eq!(factory.stats().closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_waiters() {
    let factory = MockFactory::new();
    let pool = Arc::new(mock_pool(&factory, test_config(1)).await.unwrap());
    let held = pool.get().await.unwrap();

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let pool = Arc::clone(&pool);
        waiters.push(tokio::spawn(async move { pool.get().await.map(drop) }));
    }
    tokio::task::yield_now().await;
    assert_eq!(pool.status().waiting, 3);

    pool.close().await;
    for waiter in waiters {
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    }
    assert_eq!(pool.status().waiting, 0);
    drop(held);
}

#[tokio::test(start_paused = true)]
async fn test_leased_connection_closed_on_return() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    pool.close().await;
    assert_eq!(factory.stats().closed, 0);

    pool.release(conn, true).await.unwrap();
    assert_eq!(factory.stats().closed, 1);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_and_drain_waits_for_leases() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(3)).await.unwrap();

    for delay in [10, 50, 90] {
        let conn = pool.get().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            drop(conn);
        });
    }

    assert!(pool.close_and_drain(Duration::from_secs(1)).await);
    let stats = factory.stats();
    assert_eq!(stats.closed, 3);
    assert_eq!(stats.live, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_and_drain_times_out() {
    let factory = MockFactory::new();
    let pool = mock_pool(&factory, test_config(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    assert!(!pool.close_and_drain(Duration::from_millis(100)).await);
    assert_eq!(pool.status().in_use, 1);

    drop(conn);
    assert!(pool.close_and_drain(Duration::from_millis(100)).await);
}

#[tokio::test(start_paused = true)]
async fn test_closed_pool_stops_maintenance() {
    let factory = MockFactory::new();
    let config = test_config(4)
        .min_connections(2)
        .health_check_interval(Duration::from_secs(1));
    let pool = mock_pool(&factory, config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(factory.stats().opened, 2);

    pool.close().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let stats = factory.stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.live, 0);
}

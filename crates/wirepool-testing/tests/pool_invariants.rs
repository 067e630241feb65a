//! Property tests for pool accounting invariants.
//!
//! Random sequences of borrow/return operations are replayed against a pool
//! on a paused single-threaded runtime; the bookkeeping is checked after
//! every step.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;
use wirepool::{PoolError, PooledConnection, ValidationMode};
use wirepool_testing::MockFactory;
use wirepool_testing::fixtures::{mock_pool, test_config};

#[derive(Debug, Clone)]
enum Op {
    Get,
    TryGet,
    Release { index: usize, healthy: bool },
    Drop { index: usize },
    Detach { index: usize },
    SetValid(bool),
    Advance(u64),
    Maintain,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Get),
        1 => Just(Op::TryGet),
        3 => (any::<usize>(), any::<bool>())
            .prop_map(|(index, healthy)| Op::Release { index, healthy }),
        2 => any::<usize>().prop_map(|index| Op::Drop { index }),
        1 => any::<usize>().prop_map(|index| Op::Detach { index }),
        1 => any::<bool>().prop_map(Op::SetValid),
        1 => (1u64..20_000).prop_map(Op::Advance),
        1 => Just(Op::Maintain),
    ]
}

fn mode_strategy() -> impl Strategy<Value = ValidationMode> {
    prop_oneof![
        Just(ValidationMode::None),
        Just(ValidationMode::OnBorrow),
        Just(ValidationMode::OnReturn),
        Just(ValidationMode::Periodic),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

async fn run_ops(max: u32, min: u32, mode: ValidationMode, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let factory = MockFactory::new();
    let config = test_config(max)
        .min_connections(min)
        .validation(mode)
        .idle_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(90))
        .health_check_interval(Duration::from_secs(5));
    let pool = mock_pool(&factory, config).await.unwrap();
    let mut held: Vec<PooledConnection<MockFactory>> = Vec::new();

    for op in ops {
        match op {
            Op::Get => {
                let result = pool.get_timeout(Duration::from_millis(50)).await;
                match result {
                    Ok(conn) => held.push(conn),
                    Err(PoolError::AcquisitionTimeout(_)) => {
                        prop_assert_eq!(held.len(), max as usize, "timed out with free capacity");
                    }
                    Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {e}"))),
                }
            }
            Op::TryGet => {
                if let Some(conn) = pool.try_get().unwrap() {
                    held.push(conn);
                }
            }
            Op::Release { index, healthy } if !held.is_empty() => {
                let conn = held.swap_remove(index % held.len());
                pool.release(conn, healthy).await.unwrap();
            }
            Op::Drop { index } if !held.is_empty() => {
                drop(held.swap_remove(index % held.len()));
            }
            Op::Detach { index } if !held.is_empty() => {
                let conn = held.swap_remove(index % held.len());
                prop_assert!(conn.detach().is_some());
            }
            Op::SetValid(valid) => factory.set_valid(valid),
            Op::Advance(millis) => tokio::time::sleep(Duration::from_millis(millis)).await,
            Op::Maintain => pool.run_maintenance().await,
            _ => {}
        }

        // Let spawned closers and returns settle.
        tokio::time::sleep(Duration::from_millis(1)).await;

        let status = pool.status();
        prop_assert!(status.available + status.in_use <= max, "{:?}", status);
        prop_assert!(status.total <= max, "{:?}", status);
        prop_assert_eq!(status.in_use as usize, held.len());
        prop_assert_eq!(status.waiting, 0);

        let ids: HashSet<u64> = held.iter().map(|c| c.id()).collect();
        prop_assert_eq!(ids.len(), held.len(), "a connection is leased twice");

        let stats = factory.stats();
        prop_assert!(stats.live <= u64::from(max), "{:?}", stats);
        prop_assert_eq!(stats.overlaps, 0);
    }

    drop(held);
    prop_assert!(pool.close_and_drain(Duration::from_secs(1)).await);
    let stats = factory.stats();
    prop_assert_eq!(stats.live, 0);
    Ok(())
}

/// 64 cases unless `PROPTEST_CASES` asks for a different count.
fn proptest_config() -> ProptestConfig {
    let mut config = ProptestConfig::default();
    if std::env::var_os("PROPTEST_CASES").is_none() {
        config.cases = 64;
    }
    config
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn prop_pool_accounting_holds(
        max in 1u32..5,
        min in 0u32..3,
        mode in mode_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let min = min.min(max);
        runtime().block_on(run_ops(max, min, mode, ops))?;
    }
}

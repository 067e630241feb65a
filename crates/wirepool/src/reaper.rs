//! Background maintenance task.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::connection::ConnectionFactory;
use crate::pool::PoolInner;

/// Spawn the reaper for `pool` on the current runtime.
///
/// The task holds only a weak reference, so it never keeps the pool alive,
/// and stops at the next tick after the pool is dropped or when `shutdown`
/// flips. It is signalled rather than aborted so a pass in progress always
/// runs to completion.
///
/// Returns `false` if there is no runtime to spawn on.
pub(crate) fn spawn<F: ConnectionFactory>(
    pool: &Arc<PoolInner<F>>,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    let Ok(handle) = Handle::try_current() else {
        return false;
    };

    let weak: Weak<PoolInner<F>> = Arc::downgrade(pool);
    let name = Arc::clone(&pool.config.name);
    let period = pool.config.health_check_interval;

    handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let Some(pool) = weak.upgrade() else {
                break;
            };
            tracing::trace!(pool = %name, "running pool maintenance");
            pool.maintain().await;
        }

        tracing::debug!(pool = %name, "reaper stopped");
    });
    true
}

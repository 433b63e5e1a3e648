//! Liveness sweeper.
//!
//! Periodically evicts sessions whose activity predicate is false. The first
//! sweep happens one interval after start; the loop runs until the adapter's
//! lifetime token is cancelled.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::adapter::Shared;

/// Evict every inactive session once. Returns the number evicted.
pub(crate) fn sweep(shared: &Shared) -> usize {
    let mut evicted = 0;
    for session in shared.registry.snapshot() {
        if session.is_active() {
            continue;
        }
        tracing::debug!(
            "Evicting inactive session, deviceId: {}, conn_id: {}",
            session.device_id(),
            session.conn_id()
        );
        shared.evict(&session);
        evicted += 1;
    }
    evicted
}

/// Spawn the sweep loop unless it already runs for this adapter.
pub(crate) fn ensure_started(shared: &Arc<Shared>) {
    if shared.sweeper_started.swap(true, Ordering::AcqRel) {
        return;
    }
    tokio::spawn(run(Arc::clone(shared), shared.lifetime.clone()));
}

async fn run(shared: Arc<Shared>, token: CancellationToken) {
    let period = shared.config.sweep_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!("Liveness sweeper started, interval: {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = sweep(&shared);
                if evicted > 0 {
                    tracing::info!(
                        "Liveness sweep evicted {} sessions, {} remaining",
                        evicted,
                        shared.registry.len()
                    );
                }
            }
            _ = token.cancelled() => {
                break;
            }
        }
    }
    tracing::debug!("Liveness sweeper stopped");
}

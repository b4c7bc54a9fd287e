//! Periodic eviction of stale sessions.
//!
//! Finished sessions are dropped `ttl` after they finished; sessions that
//! never finish are dropped once idle for `idle_ttl`. Evicted sessions
//! lose their engine connection as well.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::engine::BridgeManager;
use crate::sessions::SessionStore;

/// Eviction policy.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    pub ttl: Duration,
    pub idle_ttl: Duration,
    pub interval: Duration,
}

impl EvictionPolicy {
    pub fn from_secs(ttl: u64, idle_ttl: u64, interval: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl),
            idle_ttl: Duration::from_secs(idle_ttl),
            // A zero period would make `tokio::time::interval` panic.
            interval: Duration::from_secs(interval.max(1)),
        }
    }
}

/// Run the eviction loop until `cancel` is triggered.
pub async fn run(
    sessions: Arc<SessionStore>,
    bridges: Arc<BridgeManager>,
    policy: EvictionPolicy,
    cancel: CancellationToken,
) {
    tracing::info!(
        ttl_secs = policy.ttl.as_secs(),
        idle_ttl_secs = policy.idle_ttl.as_secs(),
        interval_secs = policy.interval.as_secs(),
        "Session eviction job started"
    );

    let mut interval = tokio::time::interval(policy.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session eviction job stopping");
                break;
            }
            _ = interval.tick() => {
                sweep(&sessions, &bridges, policy).await;
            }
        }
    }
}

/// One eviction pass. Returns how many sessions were removed.
pub async fn sweep(sessions: &SessionStore, bridges: &BridgeManager, policy: EvictionPolicy) -> usize {
    let ttl = chrono::Duration::from_std(policy.ttl).unwrap_or(chrono::Duration::MAX);
    let idle_ttl = chrono::Duration::from_std(policy.idle_ttl).unwrap_or(chrono::Duration::MAX);

    let evicted = sessions.evict(Utc::now(), ttl, idle_ttl).await;
    for id in &evicted {
        bridges.close(*id).await;
    }

    if evicted.is_empty() {
        tracing::debug!("Session eviction: nothing to evict");
    } else {
        tracing::info!(evicted = evicted.len(), "Session eviction: removed stale sessions");
    }
    evicted.len()
}

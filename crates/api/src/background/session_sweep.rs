//! Periodic eviction of idle verification sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::sessions::SessionManager;

/// Upper bound on how often the sweep runs.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep interval for a given TTL: a quarter of it, at most once a minute,
/// at least once a second.
pub fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL)
}

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(sessions: Arc<SessionManager>, cancel: CancellationToken) {
    let period = sweep_interval(sessions.ttl());
    tracing::info!(
        ttl_secs = sessions.ttl().as_secs(),
        interval_secs = period.as_secs(),
        "Session sweep started"
    );

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let removed = sessions.sweep_expired(Utc::now()).await;
                if removed > 0 {
                    tracing::info!(removed, "Session sweep: closed idle verifications");
                } else {
                    tracing::debug!("Session sweep: nothing to close");
                }
            }
        }
    }
}

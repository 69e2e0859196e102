//! The lease keeper.
//!
//! A cooperative liveness signal, not a mutex. While the dispatcher drives a
//! job, a background task refreshes `leased_at` every
//! [`LEASE_REFRESH_INTERVAL`] on its own store session, so lease writes never
//! serialize against the dispatcher's stage writes. The field is advisory:
//! operators use it to spot stuck jobs, and a future multi-dispatcher variant
//! could fence a holder stale past [`LEASE_STALE_AFTER`]. Selection never
//! consults it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::repositories::JobRepository;
use crate::database::time::ms_to_datetime;

/// How often the lease timestamp is refreshed while a job is held.
pub const LEASE_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// A lease older than this marks its holder as presumed dead.
pub const LEASE_STALE_AFTER: Duration = Duration::from_secs(600);

/// Whether a lease timestamp (epoch ms, 0 = never leased) is stale at `now`.
pub fn lease_is_stale(leased_at_ms: i64, now: DateTime<Utc>) -> bool {
    if leased_at_ms == 0 {
        return false;
    }
    now.signed_duration_since(ms_to_datetime(leased_at_ms))
        > chrono::Duration::from_std(LEASE_STALE_AFTER).unwrap_or(chrono::Duration::zero())
}

/// Background task refreshing the lease on one job row.
pub struct LeaseKeeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Start refreshing the lease for `vod_id`. Refreshes immediately, then
    /// every `interval`, until stopped or the parent token is cancelled. On
    /// exit the holder field is cleared best-effort.
    pub fn start(
        jobs: Arc<dyn JobRepository>,
        vod_id: impl Into<String>,
        holder: impl Into<String>,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let vod_id = vod_id.into();
        let holder = holder.into();
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            debug!(vod_id = %vod_id, holder = %holder, "Lease keeper started");
            loop {
                if let Err(e) = jobs.refresh_lease(&vod_id, &holder).await {
                    warn!(vod_id = %vod_id, error = %e, "Failed to refresh lease");
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            if let Err(e) = jobs.release_lease(&vod_id).await {
                warn!(vod_id = %vod_id, error = %e, "Failed to release lease");
            }
            debug!(vod_id = %vod_id, "Lease keeper stopped");
        });

        Self { token, handle }
    }

    /// Stop refreshing and wait for the final release.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

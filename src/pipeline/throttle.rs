//! Progress persistence throttling.
//!
//! Worker status strings can arrive many times per second (ffmpeg-style
//! progress). Persisting each one would saturate the job store, so the
//! dispatcher asks the throttle before each write: a new description is
//! persisted only if at least [`PROGRESS_PERSIST_INTERVAL`] has elapsed since
//! the last persisted update for the job. The first status of a run always
//! persists.

use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between persisted description updates per job.
pub const PROGRESS_PERSIST_INTERVAL: Duration = Duration::from_secs(2);

/// Rate limiter for streaming status updates. One instance per driven job.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_persisted: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::with_interval(PROGRESS_PERSIST_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_persisted: None,
        }
    }

    /// Whether a status arriving now should be persisted. Admitting counts
    /// as a persist for subsequent spacing.
    pub fn admit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_persisted {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_persisted = Some(now);
                true
            }
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_status_is_admitted() {
        let mut throttle = ProgressThrottle::new();
        assert!(throttle.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_window_persists_once() {
        // 100 statuses over one second: the 2s window admits only the first.
        let mut throttle = ProgressThrottle::new();
        let mut persisted = 0;
        for _ in 0..100 {
            if throttle.admit() {
                persisted += 1;
            }
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(persisted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_again_after_interval() {
        let mut throttle = ProgressThrottle::new();
        assert!(throttle.admit());
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(!throttle.admit());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(throttle.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_count_bounded_by_elapsed_time() {
        // N statuses over T seconds persist at most ceil(T / interval) + 1.
        let mut throttle = ProgressThrottle::new();
        let mut persisted = 0;
        let total = Duration::from_secs(9);
        let step = Duration::from_millis(30);
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            if throttle.admit() {
                persisted += 1;
            }
            tokio::time::advance(step).await;
            elapsed += step;
        }
        let bound = total.as_secs().div_ceil(2) + 1;
        assert!(persisted as u64 <= bound, "{persisted} > {bound}");
    }
}

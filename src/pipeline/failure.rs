//! The failure policy.
//!
//! A worker error during a stage increments the job's failure counter and
//! produces a diagnostic description. The job becomes permanently failed
//! when the error is permanent or the counter reaches
//! [`MAX_RETRYABLE_FAILURES`]. The stage is not advanced: a still-eligible
//! job re-runs the stage from its checkpoint on the next dispatcher pick.
//!
//! Cancellation is not a failure and must never reach this module.

use tracing::error;

use crate::Error;
use crate::database::models::ArchiveJob;
use crate::database::repositories::JobRepository;
use crate::pipeline::stage::Stage;

/// Retryable failures tolerated before a job is marked permanently failed.
pub const MAX_RETRYABLE_FAILURES: i64 = 3;

/// Outcome of applying the failure policy to one worker error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureVerdict {
    pub description: String,
    pub fail_count: i64,
    pub failed: bool,
}

/// Evaluate the policy for an error raised while `job` ran stage `stage`.
pub fn evaluate(job: &ArchiveJob, stage: Stage, err: &Error) -> FailureVerdict {
    debug_assert!(!err.is_cancelled(), "cancellation is not a failure");
    let fail_count = job.fail_count + 1;
    FailureVerdict {
        description: format!("Failed at stage '{}': {}", stage.as_str(), err),
        fail_count,
        failed: err.is_permanent() || fail_count >= MAX_RETRYABLE_FAILURES,
    }
}

/// Apply the policy and persist the verdict.
///
/// The save is issued on its own store session and is not tied to any
/// cancellation scope: a shutdown in progress must not lose failure state.
/// If even this save fails, the error is logged and swallowed; the job will
/// simply be retried with a stale counter.
pub async fn record(jobs: &dyn JobRepository, job: &ArchiveJob, stage: Stage, err: &Error) {
    let verdict = evaluate(job, stage, err);
    if verdict.failed {
        error!(
            vod_id = %job.vod_id,
            fail_count = verdict.fail_count,
            "Job permanently failed: {}",
            verdict.description
        );
    } else {
        error!(
            vod_id = %job.vod_id,
            fail_count = verdict.fail_count,
            "Job failed, will retry: {}",
            verdict.description
        );
    }

    if let Err(save_err) = jobs
        .record_failure(
            &job.vod_id,
            &verdict.description,
            verdict.fail_count,
            verdict.failed,
        )
        .await
    {
        error!(vod_id = %job.vod_id, error = %save_err, "Failed to persist failure state");
    }
}

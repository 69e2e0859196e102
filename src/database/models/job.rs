//! Archive job database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;
use crate::pipeline::stage::Stage;

/// One row per VOD, keyed by the externally-supplied `vod_id`.
///
/// The row is created by the ingestor in `Pending` and mutated exclusively by
/// the dispatcher and the lease keeper until it reaches `Uploaded`, or
/// `failed = true`. Rows are never deleted by the pipeline.
///
/// Operator surface: to retry a permanently failed job, clear `failed` (and
/// optionally `fail_count`); to restart from an earlier point, set `stage` to
/// any `Pending*` value. See [`JobRepository::clear_failure`].
///
/// [`JobRepository::clear_failure`]: crate::database::repositories::JobRepository::clear_failure
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArchiveJob {
    pub vod_id: String,
    /// Current pipeline stage (see [`Stage`]).
    pub stage: String,
    /// Last human-readable status from the active worker.
    pub description: String,
    /// Set when the video download completes.
    pub vod_file_path: String,
    /// Set when the chat download completes.
    pub chat_text_file_path: String,
    /// Set when the chat render completes.
    pub chat_video_file_path: String,
    /// Set when compositing completes.
    pub final_video_file_path: String,
    /// Remote id recorded by the uploader.
    pub uploaded_video_id: String,
    /// Advisory: id of the component holding the lease, or empty.
    pub leased_by: String,
    /// Advisory: last lease refresh as epoch ms, 0 when not leased.
    pub leased_at: i64,
    /// Permanently failed; never selected for work again.
    pub failed: bool,
    pub fail_reason: String,
    /// Consecutive retryable failures. Monotone: a successful stage
    /// transition does not reset it.
    pub fail_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ArchiveJob {
    pub fn new(vod_id: impl Into<String>) -> Self {
        let now = time::now_ms();
        Self {
            vod_id: vod_id.into(),
            stage: Stage::Pending.as_str().to_string(),
            description: String::new(),
            vod_file_path: String::new(),
            chat_text_file_path: String::new(),
            chat_video_file_path: String::new(),
            final_video_file_path: String::new(),
            uploaded_video_id: String::new(),
            leased_by: String::new(),
            leased_at: 0,
            failed: false,
            fail_reason: String::new(),
            fail_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the stage as an enum. `None` for an unrecognized stage string.
    pub fn get_stage(&self) -> Option<Stage> {
        Stage::parse(&self.stage)
    }

    /// Where the dispatcher must roll this row back to before driving it,
    /// if a required upstream artifact path is empty.
    ///
    /// This detects corrupt state after a crash: a stage implies all upstream
    /// artifacts are recorded, so a missing one means the row must return to
    /// the stage that produces it.
    pub fn rollback_stage(&self) -> Option<Stage> {
        match self.get_stage()? {
            Stage::PendingRenderingChat | Stage::RenderingChat => {
                if self.vod_file_path.is_empty() {
                    Some(Stage::Pending)
                } else if self.chat_text_file_path.is_empty() {
                    Some(Stage::PendingDownloadChat)
                } else {
                    None
                }
            }
            Stage::PendingCombining | Stage::Combining => {
                if self.vod_file_path.is_empty() {
                    Some(Stage::Pending)
                } else if self.chat_video_file_path.is_empty() {
                    Some(Stage::PendingRenderingChat)
                } else {
                    None
                }
            }
            Stage::PendingUpload | Stage::Uploading => {
                if self.final_video_file_path.is_empty() {
                    Some(Stage::PendingCombining)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = ArchiveJob::new("v123");
        assert_eq!(job.vod_id, "v123");
        assert_eq!(job.get_stage(), Some(Stage::Pending));
        assert!(!job.failed);
        assert_eq!(job.fail_count, 0);
        assert_eq!(job.leased_at, 0);
        assert!(job.vod_file_path.is_empty());
        assert!(job.uploaded_video_id.is_empty());
    }

    fn job_at(stage: Stage) -> ArchiveJob {
        let mut job = ArchiveJob::new("v1");
        job.stage = stage.as_str().to_string();
        job
    }

    #[test]
    fn test_rollback_render_stage_missing_vod() {
        for stage in [Stage::PendingRenderingChat, Stage::RenderingChat] {
            let mut job = job_at(stage);
            job.chat_text_file_path = "/chat.json".into();
            assert_eq!(job.rollback_stage(), Some(Stage::Pending));
        }
    }

    #[test]
    fn test_rollback_render_stage_missing_chat() {
        for stage in [Stage::PendingRenderingChat, Stage::RenderingChat] {
            let mut job = job_at(stage);
            job.vod_file_path = "/vod.mp4".into();
            assert_eq!(job.rollback_stage(), Some(Stage::PendingDownloadChat));
        }
    }

    #[test]
    fn test_rollback_combine_stage() {
        for stage in [Stage::PendingCombining, Stage::Combining] {
            let mut job = job_at(stage);
            job.chat_video_file_path = "/chat.mp4".into();
            assert_eq!(job.rollback_stage(), Some(Stage::Pending));

            job.vod_file_path = "/vod.mp4".into();
            job.chat_video_file_path = String::new();
            assert_eq!(job.rollback_stage(), Some(Stage::PendingRenderingChat));
        }
    }

    #[test]
    fn test_rollback_upload_stage() {
        for stage in [Stage::PendingUpload, Stage::Uploading] {
            let mut job = job_at(stage);
            job.vod_file_path = "/vod.mp4".into();
            job.chat_video_file_path = "/chat.mp4".into();
            assert_eq!(job.rollback_stage(), Some(Stage::PendingCombining));

            job.final_video_file_path = "/final.mp4".into();
            assert_eq!(job.rollback_stage(), None);
        }
    }

    #[test]
    fn test_no_rollback_when_artifacts_present() {
        let mut job = job_at(Stage::PendingCombining);
        job.vod_file_path = "/vod.mp4".into();
        job.chat_text_file_path = "/chat.json".into();
        job.chat_video_file_path = "/chat.mp4".into();
        assert_eq!(job.rollback_stage(), None);
    }

    #[test]
    fn test_early_stages_never_roll_back() {
        for stage in [
            Stage::Pending,
            Stage::DownloadingVod,
            Stage::PendingDownloadChat,
            Stage::DownloadingChat,
            Stage::Uploaded,
        ] {
            assert_eq!(job_at(stage).rollback_stage(), None, "{stage}");
        }
    }
}

//! Job repository.

use std::fmt::Write as _;
use std::sync::LazyLock;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::ArchiveJob;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time;
use crate::pipeline::stage::Stage;
use crate::{Error, Result};

/// Which artifact column a completed stage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactField {
    VodFile,
    ChatText,
    ChatVideo,
    FinalVideo,
}

impl ArtifactField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::VodFile => "vod_file_path",
            Self::ChatText => "chat_text_file_path",
            Self::ChatVideo => "chat_video_file_path",
            Self::FinalVideo => "final_video_file_path",
        }
    }

    /// The artifact column written when `stage` completes. `Uploading` has
    /// none: the uploader records the remote id itself.
    pub fn for_stage(stage: Stage) -> Option<Self> {
        match stage {
            Stage::DownloadingVod => Some(Self::VodFile),
            Stage::DownloadingChat => Some(Self::ChatText),
            Stage::RenderingChat => Some(Self::ChatVideo),
            Stage::Combining => Some(Self::FinalVideo),
            _ => None,
        }
    }
}

/// Stage names don't sort lexically in pipeline order, so selection orders by
/// a generated CASE expression over [`Stage::priority`].
static STAGE_PRIORITY_CASE: LazyLock<String> = LazyLock::new(|| {
    let mut case = String::from("CASE stage ");
    for stage in Stage::ALL {
        let _ = write!(case, "WHEN '{}' THEN {} ", stage.as_str(), stage.priority());
    }
    case.push_str("ELSE -1 END");
    case
});

/// Job repository trait.
///
/// This is also the operator surface: a permanently failed job is retried by
/// [`clear_failure`](Self::clear_failure), and a job can be rewound by
/// setting its stage to any `Pending*` value with
/// [`update_stage`](Self::update_stage).
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get_job(&self, vod_id: &str) -> Result<ArchiveJob>;
    async fn find_job(&self, vod_id: &str) -> Result<Option<ArchiveJob>>;
    async fn create_job(&self, job: &ArchiveJob) -> Result<()>;
    /// The highest-priority eligible job: not failed, not terminal, furthest
    /// along the pipeline; ties broken by ascending `vod_id`.
    async fn next_eligible_job(&self) -> Result<Option<ArchiveJob>>;
    async fn update_stage(&self, vod_id: &str, stage: Stage) -> Result<()>;
    /// Persist the last human-readable worker status.
    async fn update_description(&self, vod_id: &str, description: &str) -> Result<()>;
    /// Record a completed stage: the artifact path (if the stage produces
    /// one) and the transition to the next checkpoint, in a single row
    /// update so a reader never observes the checkpoint without the
    /// artifact.
    async fn complete_stage(
        &self,
        vod_id: &str,
        artifact: Option<(ArtifactField, &str)>,
        next: Stage,
    ) -> Result<()>;
    /// Record the remote video id produced by the uploader.
    async fn record_uploaded_video_id(&self, vod_id: &str, video_id: &str) -> Result<()>;
    /// Refresh the advisory lease timestamp for `vod_id`.
    async fn refresh_lease(&self, vod_id: &str, holder: &str) -> Result<()>;
    /// Clear the advisory lease holder (the timestamp is left as history).
    async fn release_lease(&self, vod_id: &str) -> Result<()>;
    /// Record a failure verdict computed by the failure policy. When
    /// `failed` is set, `fail_reason` is set to `description`.
    async fn record_failure(
        &self,
        vod_id: &str,
        description: &str,
        fail_count: i64,
        failed: bool,
    ) -> Result<()>;
    /// Operator action: make a permanently failed job eligible again.
    async fn clear_failure(&self, vod_id: &str, reset_fail_count: bool) -> Result<()>;
    /// All jobs, newest first. Diagnostics only.
    async fn list_jobs(&self) -> Result<Vec<ArchiveJob>>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn get_job(&self, vod_id: &str) -> Result<ArchiveJob> {
        self.find_job(vod_id)
            .await?
            .ok_or_else(|| Error::not_found("ArchiveJob", vod_id))
    }

    async fn find_job(&self, vod_id: &str) -> Result<Option<ArchiveJob>> {
        let job = sqlx::query_as::<_, ArchiveJob>("SELECT * FROM job WHERE vod_id = ?")
            .bind(vod_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn create_job(&self, job: &ArchiveJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job (
                vod_id, stage, description,
                vod_file_path, chat_text_file_path, chat_video_file_path,
                final_video_file_path, uploaded_video_id,
                leased_by, leased_at, failed, fail_reason, fail_count,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.vod_id)
        .bind(&job.stage)
        .bind(&job.description)
        .bind(&job.vod_file_path)
        .bind(&job.chat_text_file_path)
        .bind(&job.chat_video_file_path)
        .bind(&job.final_video_file_path)
        .bind(&job.uploaded_video_id)
        .bind(&job.leased_by)
        .bind(job.leased_at)
        .bind(job.failed)
        .bind(&job.fail_reason)
        .bind(job.fail_count)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn next_eligible_job(&self) -> Result<Option<ArchiveJob>> {
        let query = format!(
            "SELECT * FROM job WHERE failed = 0 AND stage != '{}' \
             ORDER BY {} DESC, vod_id ASC LIMIT 1",
            Stage::Uploaded.as_str(),
            &*STAGE_PRIORITY_CASE,
        );
        let job = sqlx::query_as::<_, ArchiveJob>(&query)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn update_stage(&self, vod_id: &str, stage: Stage) -> Result<()> {
        sqlx::query("UPDATE job SET stage = ?, updated_at = ? WHERE vod_id = ?")
            .bind(stage.as_str())
            .bind(time::now_ms())
            .bind(vod_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_description(&self, vod_id: &str, description: &str) -> Result<()> {
        sqlx::query("UPDATE job SET description = ?, updated_at = ? WHERE vod_id = ?")
            .bind(description)
            .bind(time::now_ms())
            .bind(vod_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_stage(
        &self,
        vod_id: &str,
        artifact: Option<(ArtifactField, &str)>,
        next: Stage,
    ) -> Result<()> {
        match artifact {
            Some((field, path)) => {
                let query = format!(
                    "UPDATE job SET {} = ?, stage = ?, updated_at = ? WHERE vod_id = ?",
                    field.column()
                );
                sqlx::query(&query)
                    .bind(path)
                    .bind(next.as_str())
                    .bind(time::now_ms())
                    .bind(vod_id)
                    .execute(&self.pool)
                    .await?;
            }
            None => self.update_stage(vod_id, next).await?,
        }
        Ok(())
    }

    async fn record_uploaded_video_id(&self, vod_id: &str, video_id: &str) -> Result<()> {
        sqlx::query("UPDATE job SET uploaded_video_id = ?, updated_at = ? WHERE vod_id = ?")
            .bind(video_id)
            .bind(time::now_ms())
            .bind(vod_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn refresh_lease(&self, vod_id: &str, holder: &str) -> Result<()> {
        retry_on_sqlite_busy("refresh_lease", || async {
            sqlx::query("UPDATE job SET leased_by = ?, leased_at = ? WHERE vod_id = ?")
                .bind(holder)
                .bind(time::now_ms())
                .bind(vod_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn release_lease(&self, vod_id: &str) -> Result<()> {
        retry_on_sqlite_busy("release_lease", || async {
            sqlx::query("UPDATE job SET leased_by = '' WHERE vod_id = ?")
                .bind(vod_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn record_failure(
        &self,
        vod_id: &str,
        description: &str,
        fail_count: i64,
        failed: bool,
    ) -> Result<()> {
        retry_on_sqlite_busy("record_failure", || async {
            sqlx::query(
                "UPDATE job SET description = ?1, fail_count = ?2, failed = ?3, \
                 fail_reason = CASE WHEN ?3 THEN ?1 ELSE fail_reason END, \
                 updated_at = ?4 WHERE vod_id = ?5",
            )
            .bind(description)
            .bind(fail_count)
            .bind(failed)
            .bind(time::now_ms())
            .bind(vod_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn clear_failure(&self, vod_id: &str, reset_fail_count: bool) -> Result<()> {
        sqlx::query(
            "UPDATE job SET failed = 0, fail_reason = '', \
             fail_count = CASE WHEN ? THEN 0 ELSE fail_count END, \
             updated_at = ? WHERE vod_id = ?",
        )
        .bind(reset_fail_count)
        .bind(time::now_ms())
        .bind(vod_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<ArchiveJob>> {
        let jobs = sqlx::query_as::<_, ArchiveJob>("SELECT * FROM job ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }
}

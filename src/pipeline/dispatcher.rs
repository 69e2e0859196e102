//! The dispatcher.
//!
//! One long-lived loop drives every job through every stage. Each iteration
//! picks the highest-priority eligible job (furthest along the pipeline,
//! ties broken by ascending vod id) and advances it stage by stage to
//! `Uploaded` or failure. A late-stage job ties up the most disk state, so
//! finishing it first bounds peak storage; freshly ingested jobs wait.
//!
//! At most one job is active at a time. Within a job, the lease keeper runs
//! concurrently with the active worker on its own store sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::models::ArchiveJob;
use crate::database::repositories::{ArtifactField, JobRepository};
use crate::pipeline::failure;
use crate::pipeline::lease::{LEASE_REFRESH_INTERVAL, LeaseKeeper};
use crate::pipeline::stage::Stage;
use crate::pipeline::throttle::{PROGRESS_PERSIST_INTERVAL, ProgressThrottle};
use crate::pipeline::workers::StageWorker;
use crate::{Error, Result};

/// Idle wait between polls when no job is eligible.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub lease_interval: Duration,
    pub progress_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: IDLE_POLL_INTERVAL,
            lease_interval: LEASE_REFRESH_INTERVAL,
            progress_interval: PROGRESS_PERSIST_INTERVAL,
        }
    }
}

pub struct Dispatcher {
    jobs: Arc<dyn JobRepository>,
    workers: HashMap<Stage, Arc<dyn StageWorker>>,
    config: DispatcherConfig,
    /// Advisory lease holder id for this dispatcher instance.
    holder_id: String,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        workers: Vec<Arc<dyn StageWorker>>,
        config: DispatcherConfig,
    ) -> Self {
        let workers = workers.into_iter().map(|w| (w.stage(), w)).collect();
        Self {
            jobs,
            workers,
            config,
            holder_id: format!("dispatcher-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Run until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(holder = %self.holder_id, "Dispatcher started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.tick(&cancel).await {
                // Worked a job to completion or failure; look again at once.
                Ok(true) => continue,
                Ok(false) => {
                    debug!("No eligible job, sleeping");
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    error!(error = %e, "Dispatcher iteration failed, backing off");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("Dispatcher stopped");
    }

    /// One iteration: select and drive at most one job.
    /// Returns `Ok(true)` if a job was picked.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<bool> {
        let Some(job) = self.jobs.next_eligible_job().await? else {
            return Ok(false);
        };
        self.process_job(job, cancel).await?;
        Ok(true)
    }

    /// Drive one job forward until it is uploaded, fails, rolls back, or
    /// shutdown interrupts it.
    async fn process_job(&self, mut job: ArchiveJob, cancel: &CancellationToken) -> Result<()> {
        info!(vod_id = %job.vod_id, stage = %job.stage, "Processing job");

        loop {
            let Some(stage) = job.get_stage() else {
                let err = Error::permanent(format!("Unrecognized stage '{}'", job.stage));
                failure::record(&*self.jobs, &job, Stage::Pending, &err).await;
                return Ok(());
            };

            if stage.is_terminal() {
                info!(vod_id = %job.vod_id, "Job complete");
                return Ok(());
            }

            // Startup corruption: a recorded stage implies its upstream
            // artifacts exist. If one is missing, the first and only action
            // is the rollback; the job is re-picked on the next iteration.
            if let Some(rollback) = job.rollback_stage() {
                warn!(
                    vod_id = %job.vod_id,
                    from = %job.stage,
                    to = %rollback,
                    "Upstream artifact missing, rolling back"
                );
                self.jobs.update_stage(&job.vod_id, rollback).await?;
                return Ok(());
            }

            // A row found in an active stage crashed mid-stage; re-run the
            // worker from the paired checkpoint (workers are idempotent).
            let checkpoint = match stage.resume_checkpoint() {
                Some(checkpoint) => checkpoint,
                None => return Ok(()),
            };
            let Some(active) = checkpoint.active_form() else {
                return Ok(());
            };
            let Some(worker) = self.workers.get(&active).cloned() else {
                let err = Error::permanent(format!("No worker registered for stage '{active}'"));
                failure::record(&*self.jobs, &job, active, &err).await;
                return Ok(());
            };

            self.jobs.update_stage(&job.vod_id, active).await?;
            job.stage = active.as_str().to_string();

            let keeper = LeaseKeeper::start(
                self.jobs.clone(),
                &job.vod_id,
                &self.holder_id,
                self.config.lease_interval,
                cancel,
            );
            let outcome = self.drive_stage(worker.as_ref(), &job, cancel).await;
            keeper.stop().await;

            match outcome {
                Ok(()) => {
                    self.finish_stage(&job, active, worker.as_ref()).await?;
                    info!(vod_id = %job.vod_id, stage = %active, "Stage complete");
                    job = self.jobs.get_job(&job.vod_id).await?;
                }
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    // Failure recording uses its own non-cancellable save;
                    // the job stays at this stage for the next pick.
                    failure::record(&*self.jobs, &job, active, &e).await;
                    return Ok(());
                }
            }
        }
    }

    /// Record the artifact path and the transition to the next checkpoint.
    async fn finish_stage(
        &self,
        job: &ArchiveJob,
        active: Stage,
        worker: &dyn StageWorker,
    ) -> Result<()> {
        let Some(next) = active.next_checkpoint() else {
            return Err(Error::Other(format!(
                "Active stage '{active}' has no successor"
            )));
        };
        match ArtifactField::for_stage(active) {
            Some(field) => {
                let Some(path) = worker.output_path(&job.vod_id) else {
                    return Err(Error::Other(format!(
                        "Worker for '{active}' produced no artifact path"
                    )));
                };
                let path = path.to_string_lossy();
                self.jobs
                    .complete_stage(&job.vod_id, Some((field, path.as_ref())), next)
                    .await
            }
            None => self.jobs.complete_stage(&job.vod_id, None, next).await,
        }
    }

    /// Consume a worker's status sequence, persisting throttled progress.
    async fn drive_stage(
        &self,
        worker: &dyn StageWorker,
        job: &ArchiveJob,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut throttle = ProgressThrottle::with_interval(self.config.progress_interval);
        let mut stream = worker.start(job, cancel.child_token());

        while let Some(item) = stream.next().await {
            let status = item?;
            debug!(vod_id = %job.vod_id, "{status}");
            if throttle.admit() {
                // Progress display is soft state; a failed persist is not a
                // stage failure.
                if let Err(e) = self.jobs.update_description(&job.vod_id, &status).await {
                    warn!(vod_id = %job.vod_id, error = %e, "Failed to persist progress");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

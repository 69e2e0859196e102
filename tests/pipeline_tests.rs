//! Integration tests for the job pipeline: selection, rollback, failure
//! policy, lease keeping, and end-to-end stage driving with scripted
//! workers.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use vodvault::Error;
use vodvault::database::models::ArchiveJob;
use vodvault::database::repositories::{JobRepository, SqlxJobRepository};
use vodvault::database::{self, DbPool};
use vodvault::pipeline::lease::LeaseKeeper;
use vodvault::pipeline::workers::{StageWorker, StatusStream};
use vodvault::pipeline::{Dispatcher, DispatcherConfig, Stage};

struct TestDb {
    _dir: tempfile::TempDir,
    pool: DbPool,
}

async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let pool = database::init_pool(&url).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    TestDb { _dir: dir, pool }
}

async fn insert_job(jobs: &dyn JobRepository, vod_id: &str, stage: Stage) -> ArchiveJob {
    let mut job = ArchiveJob::new(vod_id);
    job.stage = stage.as_str().to_string();
    jobs.create_job(&job).await.unwrap();
    job
}

#[derive(Clone)]
enum Script {
    Succeed(Vec<&'static str>),
    FailRetryable(&'static str),
    FailPermanent(&'static str),
    HangUntilCancelled,
}

/// A stage worker with scripted behavior for driving the dispatcher.
struct ScriptedWorker {
    stage: Stage,
    script: Script,
    runs: Arc<AtomicUsize>,
}

impl ScriptedWorker {
    fn new(stage: Stage, script: Script) -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                stage,
                script,
                runs: runs.clone(),
            }),
            runs,
        )
    }
}

impl StageWorker for ScriptedWorker {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn output_path(&self, vod_id: &str) -> Option<PathBuf> {
        match self.stage {
            Stage::Uploading => None,
            stage => Some(PathBuf::from(format!(
                "/artifacts/{vod_id}_{}.bin",
                stage.as_str()
            ))),
        }
    }

    fn start(&self, _job: &ArchiveJob, cancel: CancellationToken) -> StatusStream {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            match script {
                Script::Succeed(statuses) => {
                    for status in statuses {
                        let _ = tx.send(Ok(status.to_string())).await;
                    }
                }
                Script::FailRetryable(msg) => {
                    let _ = tx.send(Ok("working".to_string())).await;
                    let _ = tx.send(Err(Error::worker(msg))).await;
                }
                Script::FailPermanent(msg) => {
                    let _ = tx.send(Err(Error::missing_input(msg))).await;
                }
                Script::HangUntilCancelled => {
                    cancel.cancelled().await;
                    let _ = tx.send(Err(Error::Cancelled)).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

fn all_succeeding_workers() -> Vec<Arc<dyn StageWorker>> {
    [
        Stage::DownloadingVod,
        Stage::DownloadingChat,
        Stage::RenderingChat,
        Stage::Combining,
        Stage::Uploading,
    ]
    .into_iter()
    .map(|stage| {
        let (worker, _) = ScriptedWorker::new(stage, Script::Succeed(vec!["step one", "step two"]));
        worker as Arc<dyn StageWorker>
    })
    .collect()
}

fn dispatcher_with(jobs: Arc<dyn JobRepository>, workers: Vec<Arc<dyn StageWorker>>) -> Dispatcher {
    Dispatcher::new(jobs, workers, DispatcherConfig::default())
}

#[tokio::test]
async fn selector_prefers_furthest_along_job() {
    let db = test_db().await;
    let jobs = SqlxJobRepository::new(db.pool.clone());

    insert_job(&jobs, "a", Stage::Pending).await;
    insert_job(&jobs, "b", Stage::PendingRenderingChat).await;
    insert_job(&jobs, "c", Stage::Uploading).await;

    let picked = jobs.next_eligible_job().await.unwrap().unwrap();
    assert_eq!(picked.vod_id, "c");
}

#[tokio::test]
async fn selector_breaks_ties_by_ascending_vod_id() {
    let db = test_db().await;
    let jobs = SqlxJobRepository::new(db.pool.clone());

    insert_job(&jobs, "b", Stage::Pending).await;
    insert_job(&jobs, "a", Stage::Pending).await;

    let picked = jobs.next_eligible_job().await.unwrap().unwrap();
    assert_eq!(picked.vod_id, "a");
}

#[tokio::test]
async fn selector_never_returns_failed_or_terminal_jobs() {
    let db = test_db().await;
    let jobs = SqlxJobRepository::new(db.pool.clone());

    let mut broken = ArchiveJob::new("broken");
    broken.failed = true;
    jobs.create_job(&broken).await.unwrap();
    insert_job(&jobs, "done", Stage::Uploaded).await;
    insert_job(&jobs, "go", Stage::Pending).await;

    let picked = jobs.next_eligible_job().await.unwrap().unwrap();
    assert_eq!(picked.vod_id, "go");

    jobs.record_failure("go", "Failed at stage 'DownloadingVod': x", 3, true)
        .await
        .unwrap();
    assert!(jobs.next_eligible_job().await.unwrap().is_none());
}

#[tokio::test]
async fn rollback_is_the_first_and_only_action() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    let mut job = ArchiveJob::new("v1");
    job.stage = Stage::PendingRenderingChat.as_str().to_string();
    job.chat_text_file_path = "/chat.json".to_string();
    jobs.create_job(&job).await.unwrap();

    let (vod_worker, vod_runs) = ScriptedWorker::new(
        Stage::DownloadingVod,
        Script::Succeed(vec!["should not run this tick"]),
    );
    let (render_worker, render_runs) =
        ScriptedWorker::new(Stage::RenderingChat, Script::Succeed(vec!["nor this"]));
    let dispatcher = dispatcher_with(jobs.clone(), vec![vod_worker as Arc<dyn StageWorker>, render_worker]);

    let worked = dispatcher.tick(&CancellationToken::new()).await.unwrap();
    assert!(worked);

    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.get_stage(), Some(Stage::Pending));
    // The rollback happened with no stage transitions or worker runs between.
    assert_eq!(vod_runs.load(Ordering::SeqCst), 0);
    assert_eq!(render_runs.load(Ordering::SeqCst), 0);
    assert!(!job.failed);
    assert_eq!(job.fail_count, 0);
}

#[tokio::test]
async fn rollback_targets_the_stage_producing_the_missing_artifact() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    let mut job = ArchiveJob::new("v1");
    job.stage = Stage::Combining.as_str().to_string();
    job.vod_file_path = "/vod.mp4".to_string();
    job.chat_text_file_path = "/chat.json".to_string();
    jobs.create_job(&job).await.unwrap();

    let dispatcher = dispatcher_with(jobs.clone(), vec![]);
    dispatcher.tick(&CancellationToken::new()).await.unwrap();

    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.get_stage(), Some(Stage::PendingRenderingChat));
}

#[tokio::test]
async fn three_retryable_failures_mark_the_job_permanently_failed() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::Pending).await;

    let (worker, runs) =
        ScriptedWorker::new(Stage::DownloadingVod, Script::FailRetryable("network reset"));
    let dispatcher = dispatcher_with(jobs.clone(), vec![worker as Arc<dyn StageWorker>]);
    let cancel = CancellationToken::new();

    for expected_count in 1..=3i64 {
        let worked = dispatcher.tick(&cancel).await.unwrap();
        assert!(worked);
        let job = jobs.get_job("v1").await.unwrap();
        assert_eq!(job.fail_count, expected_count);
        assert_eq!(job.failed, expected_count >= 3);
        // The stage is not advanced by a failure.
        assert_eq!(job.get_stage(), Some(Stage::DownloadingVod));
    }

    let job = jobs.get_job("v1").await.unwrap();
    assert!(job.failed);
    assert_eq!(job.fail_count, 3);
    assert!(job.fail_reason.contains("DownloadingVod"));
    assert!(job.fail_reason.contains("network reset"));
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // No resurrection: a fourth tick finds nothing to do.
    assert!(!dispatcher.tick(&cancel).await.unwrap());
}

#[tokio::test]
async fn permanent_failure_needs_no_retries() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::Pending).await;

    let (worker, _) = ScriptedWorker::new(
        Stage::DownloadingVod,
        Script::FailPermanent("downloader binary not found"),
    );
    let dispatcher = dispatcher_with(jobs.clone(), vec![worker as Arc<dyn StageWorker>]);

    dispatcher.tick(&CancellationToken::new()).await.unwrap();

    let job = jobs.get_job("v1").await.unwrap();
    assert!(job.failed);
    assert_eq!(job.fail_count, 1);
    assert!(job.fail_reason.contains("downloader binary not found"));
}

#[tokio::test]
async fn job_drives_through_every_stage_to_uploaded() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::Pending).await;

    let dispatcher = dispatcher_with(jobs.clone(), all_succeeding_workers());
    let worked = dispatcher.tick(&CancellationToken::new()).await.unwrap();
    assert!(worked);

    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.get_stage(), Some(Stage::Uploaded));
    // Artifact-before-transition: every upstream path is recorded.
    assert!(!job.vod_file_path.is_empty());
    assert!(!job.chat_text_file_path.is_empty());
    assert!(!job.chat_video_file_path.is_empty());
    assert!(!job.final_video_file_path.is_empty());
    assert!(!job.failed);

    // Progress was persisted at least once along the way.
    assert!(!job.description.is_empty());

    // Terminal jobs are no longer eligible.
    assert!(jobs.next_eligible_job().await.unwrap().is_none());
}

#[tokio::test]
async fn fail_count_is_monotone_across_a_later_success() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::Pending).await;

    let (flaky, _) =
        ScriptedWorker::new(Stage::DownloadingVod, Script::FailRetryable("flaky network"));
    let dispatcher = dispatcher_with(jobs.clone(), vec![flaky as Arc<dyn StageWorker>]);
    dispatcher.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(jobs.get_job("v1").await.unwrap().fail_count, 1);

    // The same job later succeeds end to end; the counter is not reset.
    let dispatcher = dispatcher_with(jobs.clone(), all_succeeding_workers());
    dispatcher.tick(&CancellationToken::new()).await.unwrap();

    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.get_stage(), Some(Stage::Uploaded));
    assert_eq!(job.fail_count, 1);
}

#[tokio::test]
async fn shutdown_is_not_a_failure_and_the_job_resumes() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::Pending).await;

    let (hanging, _) = ScriptedWorker::new(Stage::DownloadingVod, Script::HangUntilCancelled);
    let dispatcher = dispatcher_with(jobs.clone(), vec![hanging as Arc<dyn StageWorker>]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = dispatcher.tick(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());

    // The job is left mid-stage, unfailed, with no counter bump.
    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.get_stage(), Some(Stage::DownloadingVod));
    assert!(!job.failed);
    assert_eq!(job.fail_count, 0);

    // The next run resumes the active stage from its checkpoint.
    let (resumed, runs) = ScriptedWorker::new(
        Stage::DownloadingVod,
        Script::Succeed(vec!["downloading again"]),
    );
    let mut workers = all_succeeding_workers();
    workers[0] = resumed;
    let dispatcher = dispatcher_with(jobs.clone(), workers);
    dispatcher.tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.get_stage(), Some(Stage::Uploaded));
}

#[tokio::test]
async fn lease_keeper_refreshes_and_releases() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::Pending).await;

    let cancel = CancellationToken::new();
    let keeper = LeaseKeeper::start(
        jobs.clone(),
        "v1",
        "dispatcher-test",
        Duration::from_millis(20),
        &cancel,
    );
    tokio::time::sleep(Duration::from_millis(60)).await;

    let job = jobs.get_job("v1").await.unwrap();
    assert_eq!(job.leased_by, "dispatcher-test");
    assert!(job.leased_at > 0);

    keeper.stop().await;
    let job = jobs.get_job("v1").await.unwrap();
    assert!(job.leased_by.is_empty());
    // The timestamp is left as history.
    assert!(job.leased_at > 0);
}

#[tokio::test]
async fn operator_can_clear_a_permanent_failure() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    insert_job(&*jobs, "v1", Stage::PendingUpload).await;
    jobs.record_failure("v1", "Failed at stage 'Uploading': quota", 3, true)
        .await
        .unwrap();
    assert!(jobs.next_eligible_job().await.unwrap().is_none());

    jobs.clear_failure("v1", true).await.unwrap();

    let job = jobs.get_job("v1").await.unwrap();
    assert!(!job.failed);
    assert_eq!(job.fail_count, 0);
    assert!(job.fail_reason.is_empty());
    assert_eq!(
        jobs.next_eligible_job().await.unwrap().unwrap().vod_id,
        "v1"
    );
}

#[tokio::test]
async fn unknown_stage_string_fails_permanently() {
    let db = test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));

    let mut job = ArchiveJob::new("v1");
    job.stage = "NotARealStage".to_string();
    jobs.create_job(&job).await.unwrap();

    let dispatcher = dispatcher_with(jobs.clone(), vec![]);
    dispatcher.tick(&CancellationToken::new()).await.unwrap();

    let job = jobs.get_job("v1").await.unwrap();
    assert!(job.failed);
    assert!(job.fail_reason.contains("NotARealStage"));
}

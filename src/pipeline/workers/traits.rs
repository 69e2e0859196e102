//! The uniform stage-worker contract.
//!
//! A worker advances one stage by producing one artifact, emitting a lazy,
//! finite, non-restartable sequence of human-readable status strings while it
//! does so. The sequence ends silently on success, or with a single `Err`
//! item on failure or cancellation. The dispatcher knows nothing about the
//! statuses beyond "non-empty string suitable for display".

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::database::models::ArchiveJob;
use crate::pipeline::stage::Stage;

/// The status sequence produced by a running worker.
pub type StatusStream = ReceiverStream<Result<String>>;

/// Bounded channel capacity for status items. A slow consumer (the
/// dispatcher persisting progress) back-pressures the producing worker
/// instead of buffering unboundedly.
pub const STATUS_CHANNEL_CAPACITY: usize = 64;

/// A procedure that executes one active stage of the pipeline.
///
/// Required properties:
/// - **Idempotence on restart:** a re-run after a crash overwrites or
///   discards partial output (workers write to a staging path and promote).
/// - **Cancellation:** the worker winds down promptly when the token fires
///   and terminates the sequence with [`Error::Cancelled`].
/// - **Deterministic output:** the artifact path is a pure function of the
///   VOD id and the worker kind.
///
/// [`Error::Cancelled`]: crate::Error::Cancelled
pub trait StageWorker: Send + Sync {
    /// The active stage this worker executes.
    fn stage(&self) -> Stage;

    /// The artifact produced for `vod_id`, if the stage yields a local file.
    /// `None` for the uploader, whose artifact is a remote id.
    fn output_path(&self, vod_id: &str) -> Option<PathBuf>;

    /// Begin executing the stage for `job` and return its status sequence.
    fn start(&self, job: &ArchiveJob, cancel: CancellationToken) -> StatusStream;
}

/// Create the channel pair backing a worker's status sequence.
pub(crate) fn status_channel() -> (mpsc::Sender<Result<String>>, StatusStream) {
    let (tx, rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
    (tx, ReceiverStream::new(rx))
}

/// Validate a recorded input path: an empty path or a missing file is a
/// permanent failure, because re-running the same stage cannot regenerate an
/// upstream artifact.
pub(crate) async fn require_input(path: &str, what: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(crate::Error::missing_input(format!(
            "{what} path not recorded"
        )));
    }
    let path = std::path::Path::new(path);
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(crate::Error::missing_input(format!(
            "{what} missing on disk: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_require_input_rejects_empty_and_missing() {
        let err = require_input("", "source video").await.unwrap_err();
        assert!(err.is_permanent());

        let err = require_input("/nonexistent/file.mp4", "source video")
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_require_input_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.mp4");
        tokio::fs::write(&path, b"x").await.unwrap();
        let resolved = require_input(path.to_str().unwrap(), "source video")
            .await
            .unwrap();
        assert_eq!(resolved, path);
    }
}

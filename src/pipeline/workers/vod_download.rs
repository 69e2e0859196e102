//! VOD download worker.

use std::path::PathBuf;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::database::models::ArchiveJob;
use crate::pipeline::stage::Stage;
use crate::pipeline::workers::command::stream_command;
use crate::pipeline::workers::traits::{StageWorker, StatusStream, status_channel};
use crate::utils::fs::Workspace;

/// Downloads the source video via an external downloader CLI (yt-dlp
/// compatible) into `vods/{vod_id}.mp4`.
pub struct VodDownloader {
    bin: String,
    workspace: Workspace,
}

impl VodDownloader {
    pub fn new(bin: impl Into<String>, workspace: Workspace) -> Self {
        Self {
            bin: bin.into(),
            workspace,
        }
    }

    fn vod_url(vod_id: &str) -> String {
        format!("https://www.twitch.tv/videos/{vod_id}")
    }

    async fn execute(
        bin: String,
        workspace: Workspace,
        vod_id: String,
        tx: mpsc::Sender<Result<String>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let destination = workspace.vod_path(&vod_id);
        let staging = workspace.staging_for(&destination);

        let _ = tx
            .send(Ok(format!("Downloading VOD {vod_id}")))
            .await;

        let mut cmd = Command::new(&bin);
        cmd.arg("--newline")
            .arg("--force-overwrites")
            .args(["-f", "best"])
            .arg("-o")
            .arg(&staging)
            .arg(Self::vod_url(&vod_id));

        stream_command(cmd, "VOD download", &tx, &cancel).await?;

        workspace.promote(&staging, &destination).await?;
        let _ = tx
            .send(Ok(format!("VOD downloaded to {}", destination.display())))
            .await;
        Ok(())
    }
}

impl StageWorker for VodDownloader {
    fn stage(&self) -> Stage {
        Stage::DownloadingVod
    }

    fn output_path(&self, vod_id: &str) -> Option<PathBuf> {
        Some(self.workspace.vod_path(vod_id))
    }

    fn start(&self, job: &ArchiveJob, cancel: CancellationToken) -> StatusStream {
        let (tx, stream) = status_channel();
        let bin = self.bin.clone();
        let workspace = self.workspace.clone();
        let vod_id = job.vod_id.clone();

        tokio::spawn(async move {
            let result = Self::execute(bin, workspace, vod_id, tx.clone(), cancel).await;
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        stream
    }
}

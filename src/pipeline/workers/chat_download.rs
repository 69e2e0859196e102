//! Chat download worker.

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

/// Downloads the chat log via the chat tool's `chatdownload` subcommand
/// into `chats/{vod_id}.json`.
pub struct ChatDownloader {
    bin: String,
    workspace: Workspace,
}

impl ChatDownloader {
    pub fn new(bin: impl Into<String>, workspace: Workspace) -> Self {
        Self {
            bin: bin.into(),
            workspace,
        }
    }

    async fn execute(
        bin: String,
        workspace: Workspace,
        vod_id: String,
        tx: mpsc::Sender<Result<String>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let destination = workspace.chat_text_path(&vod_id);
        let staging = workspace.staging_for(&destination);

        let _ = tx.send(Ok(format!("Downloading chat for {vod_id}"))).await;

        let mut cmd = Command::new(&bin);
        cmd.arg("chatdownload")
            .args(["--id", &vod_id])
            .args(["--collision", "Overwrite"])
            .arg("-o")
            .arg(&staging);

        stream_command(cmd, "Chat download", &tx, &cancel).await?;

        workspace.promote(&staging, &destination).await?;
        let _ = tx
            .send(Ok(format!("Chat downloaded to {}", destination.display())))
            .await;
        Ok(())
    }
}

impl StageWorker for ChatDownloader {
    fn stage(&self) -> Stage {
        Stage::DownloadingChat
    }

    fn output_path(&self, vod_id: &str) -> Option<PathBuf> {
        Some(self.workspace.chat_text_path(vod_id))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_is_deterministic() {
        let worker = ChatDownloader::new("TwitchDownloaderCLI", Workspace::new("/work"));
        assert_eq!(
            worker.output_path("v42"),
            Some(PathBuf::from("/work/chats/v42.json"))
        );
        assert_eq!(worker.stage(), Stage::DownloadingChat);
    }
}

//! Chat render worker.

use std::path::PathBuf;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::database::models::ArchiveJob;
use crate::pipeline::stage::Stage;
use crate::pipeline::workers::command::stream_command;
use crate::pipeline::workers::ffmpeg::probe_video;
use crate::pipeline::workers::traits::{StageWorker, StatusStream, require_input, status_channel};
use crate::utils::fs::Workspace;

/// Minimum width of the rendered chat column, in pixels.
const MIN_CHAT_WIDTH: u32 = 320;

/// Renders the chat log as a video column via the chat tool's `chatrender`
/// subcommand, matched to the source video's frame rate and height.
/// Output: `chats/{vod_id}_chat.mp4`.
pub struct ChatRenderer {
    bin: String,
    ffprobe: String,
    workspace: Workspace,
}

impl ChatRenderer {
    pub fn new(
        bin: impl Into<String>,
        ffprobe: impl Into<String>,
        workspace: Workspace,
    ) -> Self {
        Self {
            bin: bin.into(),
            ffprobe: ffprobe.into(),
            workspace,
        }
    }

    /// Chat column width for a given video height: a third of the height,
    /// floored to [`MIN_CHAT_WIDTH`] and kept even for encoder alignment.
    fn chat_width(height: u32) -> u32 {
        let width = (height / 3).max(MIN_CHAT_WIDTH);
        width - width % 2
    }

    async fn execute(
        bin: String,
        ffprobe: String,
        workspace: Workspace,
        vod_id: String,
        chat_text_path: String,
        vod_file_path: String,
        tx: mpsc::Sender<Result<String>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let chat_json = require_input(&chat_text_path, "chat log").await?;
        let source_video = require_input(&vod_file_path, "source video").await?;

        let probe = probe_video(&ffprobe, &source_video).await?;
        let height = if probe.height > 0 { probe.height } else { 1080 };
        let framerate = probe.fps.round().max(1.0) as u32;

        let _ = tx
            .send(Ok(format!(
                "Rendering chat for {vod_id} at {height}p {framerate}fps"
            )))
            .await;

        let destination = workspace.chat_video_path(&vod_id);
        let staging = workspace.staging_for(&destination);

        let mut cmd = Command::new(&bin);
        cmd.arg("chatrender")
            .arg("-i")
            .arg(&chat_json)
            .args(["-h", &height.to_string()])
            .args(["-w", &Self::chat_width(height).to_string()])
            .args(["--framerate", &framerate.to_string()])
            .args(["--collision", "Overwrite"])
            .arg("-o")
            .arg(&staging);

        stream_command(cmd, "Chat render", &tx, &cancel).await?;

        workspace.promote(&staging, &destination).await?;
        let _ = tx
            .send(Ok(format!("Chat rendered to {}", destination.display())))
            .await;
        Ok(())
    }
}

impl StageWorker for ChatRenderer {
    fn stage(&self) -> Stage {
        Stage::RenderingChat
    }

    fn output_path(&self, vod_id: &str) -> Option<PathBuf> {
        Some(self.workspace.chat_video_path(vod_id))
    }

    fn start(&self, job: &ArchiveJob, cancel: CancellationToken) -> StatusStream {
        let (tx, stream) = status_channel();
        let bin = self.bin.clone();
        let ffprobe = self.ffprobe.clone();
        let workspace = self.workspace.clone();
        let vod_id = job.vod_id.clone();
        let chat_text_path = job.chat_text_file_path.clone();
        let vod_file_path = job.vod_file_path.clone();

        tokio::spawn(async move {
            let result = Self::execute(
                bin,
                ffprobe,
                workspace,
                vod_id,
                chat_text_path,
                vod_file_path,
                tx.clone(),
                cancel,
            )
            .await;
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
    fn test_chat_width_scales_with_height() {
        assert_eq!(ChatRenderer::chat_width(1080), 360);
        assert_eq!(ChatRenderer::chat_width(720), 320);
        assert_eq!(ChatRenderer::chat_width(480), 320);
        // Always even
        assert_eq!(ChatRenderer::chat_width(1082) % 2, 0);
    }

    #[test]
    fn test_output_path_is_deterministic() {
        let worker = ChatRenderer::new("TwitchDownloaderCLI", "ffprobe", Workspace::new("/work"));
        assert_eq!(
            worker.output_path("v42"),
            Some(PathBuf::from("/work/chats/v42_chat.mp4"))
        );
        assert_eq!(worker.stage(), Stage::RenderingChat);
    }
}

//! Final compositing worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::database::models::ArchiveJob;
use crate::pipeline::stage::Stage;
use crate::pipeline::workers::ffmpeg::{detect_h264_encoder, probe_video, run_ffmpeg_with_progress};
use crate::pipeline::workers::traits::{StageWorker, StatusStream, require_input, status_channel};
use crate::utils::fs::Workspace;

/// Composites the source video and the rendered chat side-by-side with
/// ffmpeg into `finals/{vod_id}_final.mp4`.
///
/// The H.264 encoder is probed once per process from a hardware preference
/// list (AMD, then NVIDIA, then Intel) with a software fallback.
pub struct FinalRenderer {
    ffmpeg: String,
    ffprobe: String,
    workspace: Workspace,
    encoder: Arc<tokio::sync::OnceCell<&'static str>>,
}

impl FinalRenderer {
    pub fn new(
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        workspace: Workspace,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            workspace,
            encoder: Arc::new(tokio::sync::OnceCell::new()),
        }
    }

    fn build_args(
        vod: &Path,
        chat: &Path,
        staging: &Path,
        encoder: &str,
        height: u32,
        fps: f64,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-nostats".into(),
            "-loglevel".into(),
            "info".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-i".into(),
            vod.to_string_lossy().into_owned(),
            "-i".into(),
            chat.to_string_lossy().into_owned(),
            "-filter_complex".into(),
            format!("[1:v]scale=-2:{height}[chat];[0:v][chat]hstack=inputs=2[v]"),
            "-map".into(),
            "[v]".into(),
            "-map".into(),
            "0:a?".into(),
            "-c:v".into(),
            encoder.into(),
            "-c:a".into(),
            "aac".into(),
            "-r".into(),
            format!("{fps}"),
            "-movflags".into(),
            "+faststart".into(),
        ];
        args.push(staging.to_string_lossy().into_owned());
        args
    }

    async fn execute(
        ffmpeg: String,
        ffprobe: String,
        workspace: Workspace,
        encoder_cell: Arc<tokio::sync::OnceCell<&'static str>>,
        vod_id: String,
        vod_file_path: String,
        chat_video_file_path: String,
        tx: mpsc::Sender<Result<String>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let vod = require_input(&vod_file_path, "source video").await?;
        let chat = require_input(&chat_video_file_path, "chat video").await?;

        let probe = probe_video(&ffprobe, &vod).await?;
        let height = if probe.height > 0 { probe.height } else { 1080 };
        let fps = if probe.fps > 0.0 { probe.fps } else { 30.0 };

        let encoder = *encoder_cell
            .get_or_init(|| async {
                let encoder = detect_h264_encoder(&ffmpeg).await;
                info!("Selected H.264 encoder: {encoder}");
                encoder
            })
            .await;

        let _ = tx
            .send(Ok(format!(
                "Combining {vod_id} with {encoder} at {height}p"
            )))
            .await;

        let destination = workspace.final_video_path(&vod_id);
        let staging = workspace.staging_for(&destination);

        let mut cmd = Command::new(&ffmpeg);
        cmd.args(Self::build_args(
            &vod, &chat, &staging, encoder, height, fps,
        ));

        run_ffmpeg_with_progress(cmd, "Combining", &tx, &cancel).await?;

        workspace.promote(&staging, &destination).await?;
        let _ = tx
            .send(Ok(format!(
                "Final video written to {}",
                destination.display()
            )))
            .await;
        Ok(())
    }
}

impl StageWorker for FinalRenderer {
    fn stage(&self) -> Stage {
        Stage::Combining
    }

    fn output_path(&self, vod_id: &str) -> Option<PathBuf> {
        Some(self.workspace.final_video_path(vod_id))
    }

    fn start(&self, job: &ArchiveJob, cancel: CancellationToken) -> StatusStream {
        let (tx, stream) = status_channel();
        let ffmpeg = self.ffmpeg.clone();
        let ffprobe = self.ffprobe.clone();
        let workspace = self.workspace.clone();
        let encoder_cell = self.encoder.clone();
        let vod_id = job.vod_id.clone();
        let vod_file_path = job.vod_file_path.clone();
        let chat_video_file_path = job.chat_video_file_path.clone();

        tokio::spawn(async move {
            let result = Self::execute(
                ffmpeg,
                ffprobe,
                workspace,
                encoder_cell,
                vod_id,
                vod_file_path,
                chat_video_file_path,
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

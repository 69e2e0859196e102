//! Filesystem layout and staging helpers.
//!
//! Every artifact lives at a deterministic path derived from the VOD id.
//! Workers write into a staging directory next to the destination and
//! promote the file with a rename once complete, so a re-run after a crash
//! overwrites partial output instead of corrupting the artifact.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

const VODS_DIR: &str = "vods";
const CHATS_DIR: &str = "chats";
const FINALS_DIR: &str = "finals";
const STAGING_DIR: &str = ".staging";

/// The working-directory layout for pipeline artifacts.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create all artifact and staging directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [VODS_DIR, CHATS_DIR, FINALS_DIR] {
            let path = self.root.join(dir);
            tokio::fs::create_dir_all(path.join(STAGING_DIR)).await?;
        }
        Ok(())
    }

    /// `vods/{vod_id}.mp4`
    pub fn vod_path(&self, vod_id: &str) -> PathBuf {
        self.root.join(VODS_DIR).join(format!("{vod_id}.mp4"))
    }

    /// `chats/{vod_id}.json`
    pub fn chat_text_path(&self, vod_id: &str) -> PathBuf {
        self.root.join(CHATS_DIR).join(format!("{vod_id}.json"))
    }

    /// `chats/{vod_id}_chat.mp4`
    pub fn chat_video_path(&self, vod_id: &str) -> PathBuf {
        self.root.join(CHATS_DIR).join(format!("{vod_id}_chat.mp4"))
    }

    /// `finals/{vod_id}_final.mp4`
    pub fn final_video_path(&self, vod_id: &str) -> PathBuf {
        self.root.join(FINALS_DIR).join(format!("{vod_id}_final.mp4"))
    }

    /// The staging path for a destination: `<parent>/.staging/<file>`.
    pub fn staging_for(&self, destination: &Path) -> PathBuf {
        let parent = destination.parent().unwrap_or(&self.root);
        let file = destination.file_name().unwrap_or_default();
        parent.join(STAGING_DIR).join(file)
    }

    /// Promote a completed staging file to its destination.
    ///
    /// Fails if the staging file is missing or empty, which means the
    /// producing tool exited successfully without writing its output.
    pub async fn promote(&self, staging: &Path, destination: &Path) -> Result<()> {
        let meta = tokio::fs::metadata(staging).await.map_err(|_| {
            Error::worker(format!("Expected output missing: {}", staging.display()))
        })?;
        if meta.len() == 0 {
            return Err(Error::worker(format!(
                "Expected output is empty: {}",
                staging.display()
            )));
        }
        tokio::fs::rename(staging, destination).await?;
        Ok(())
    }
}

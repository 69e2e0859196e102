//! The ingestor.
//!
//! A periodic task that scans configured channels on the source platform
//! and inserts a metadata row plus a `Pending` job for every VOD not seen
//! before. It writes independently of the dispatcher and never touches rows
//! the pipeline is driving.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::models::{ArchiveJob, Channel, VodMetadata};
use crate::database::repositories::{ChannelRepository, JobRepository, VodMetadataRepository};
use crate::{Error, Result};

/// A source of recent VODs for a channel.
#[async_trait]
pub trait VodSource: Send + Sync {
    async fn recent_vods(&self, channel: &Channel) -> Result<Vec<VodMetadata>>;
}

const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// Number of recent archives fetched per channel scan.
const VODS_PER_SCAN: u32 = 20;

/// Twitch Helix implementation of [`VodSource`].
pub struct TwitchVodSource {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct HelixVideosResponse {
    #[serde(default)]
    data: Vec<HelixVideo>,
}

#[derive(Debug, Deserialize)]
struct HelixVideo {
    id: String,
    user_login: String,
    title: String,
    url: String,
    created_at: String,
    duration: String,
}

impl TwitchVodSource {
    pub fn new(client_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: HELIX_BASE_URL.to_string(),
            client_id: client_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Override the API base URL (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl VodSource for TwitchVodSource {
    async fn recent_vods(&self, channel: &Channel) -> Result<Vec<VodMetadata>> {
        let first = VODS_PER_SCAN.to_string();
        let response = self
            .http
            .get(format!("{}/videos", self.base_url))
            .query(&[
                ("user_login", channel.login.as_str()),
                ("type", "archive"),
                ("first", first.as_str()),
            ])
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Other(format!(
                "VOD listing for '{}' failed: {status}",
                channel.login
            )));
        }

        let parsed: HelixVideosResponse = response.json().await?;
        Ok(parsed
            .data
            .into_iter()
            .map(|video| {
                let mut meta = VodMetadata::new(video.id, video.user_login);
                meta.title = video.title;
                meta.url = video.url;
                meta.duration_secs = parse_duration(&video.duration);
                meta.started_at = DateTime::parse_from_rfc3339(&video.created_at)
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(0);
                meta
            })
            .collect())
    }
}

/// Parse a platform duration string like `"1h2m3s"` into seconds.
pub fn parse_duration(raw: &str) -> i64 {
    let mut total = 0i64;
    let mut digits = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: i64 = digits.parse().unwrap_or(0);
        digits.clear();
        total += match c {
            'h' => value * 3600,
            'm' => value * 60,
            's' => value,
            _ => 0,
        };
    }
    total
}

pub struct Ingestor {
    source: Arc<dyn VodSource>,
    channels: Arc<dyn ChannelRepository>,
    vods: Arc<dyn VodMetadataRepository>,
    jobs: Arc<dyn JobRepository>,
    interval: Duration,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn VodSource>,
        channels: Arc<dyn ChannelRepository>,
        vods: Arc<dyn VodMetadataRepository>,
        jobs: Arc<dyn JobRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            channels,
            vods,
            jobs,
            interval,
        }
    }

    /// Run until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Ingestor started");
        loop {
            match self.scan_once().await {
                Ok(0) => debug!("Scan complete, no new VODs"),
                Ok(inserted) => info!(inserted, "Scan complete"),
                Err(e) => warn!(error = %e, "Channel scan failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Ingestor stopped");
    }

    /// Scan every enabled channel once; returns the number of jobs created.
    pub async fn scan_once(&self) -> Result<usize> {
        let mut inserted = 0usize;
        for channel in self.channels.list_enabled().await? {
            let vods = match self.source.recent_vods(&channel).await {
                Ok(vods) => vods,
                Err(e) => {
                    warn!(channel = %channel.login, error = %e, "Failed to list VODs");
                    continue;
                }
            };
            for meta in vods {
                if self.jobs.find_job(&meta.vod_id).await?.is_some() {
                    continue;
                }
                self.vods.upsert(&meta).await?;
                self.jobs.create_job(&ArchiveJob::new(&meta.vod_id)).await?;
                info!(vod_id = %meta.vod_id, channel = %channel.login, "Ingested new VOD");
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

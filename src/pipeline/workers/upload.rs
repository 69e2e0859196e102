//! Video upload worker.
//!
//! Uploads the composited video to the video host over its resumable upload
//! protocol: a refresh-token OAuth grant, an upload-session initiation, then
//! chunked PUTs with `Content-Range` headers. On success the remote video id
//! is recorded on the job row (the one declared side effect of this worker).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::database::models::{ArchiveJob, MomentDetail, VodMetadata};
use crate::database::repositories::{JobRepository, VodMetadataRepository};
use crate::database::time::ms_to_datetime;
use crate::pipeline::stage::Stage;
use crate::pipeline::workers::traits::{StageWorker, StatusStream, require_input, status_channel};
use crate::utils::titles::{UNTITLED, sanitize_title};
use crate::{Error, Result};

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

/// Gaming category id on the video host.
const CATEGORY_GAMING: &str = "20";

#[derive(Debug, Deserialize)]
struct UploadCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Uploads `finals/{vod_id}_final.mp4` and records the remote video id.
pub struct VideoUploader {
    http: reqwest::Client,
    credentials_path: PathBuf,
    chunk_size: usize,
    jobs: Arc<dyn JobRepository>,
    metadata: Arc<dyn VodMetadataRepository>,
    token_url: String,
    upload_url: String,
}

impl VideoUploader {
    pub fn new(
        credentials_path: impl Into<PathBuf>,
        chunk_size: usize,
        jobs: Arc<dyn JobRepository>,
        metadata: Arc<dyn VodMetadataRepository>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials_path: credentials_path.into(),
            chunk_size,
            jobs,
            metadata,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
        }
    }

    /// Override the API endpoints (tests).
    pub fn with_endpoints(
        mut self,
        token_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        self.token_url = token_url.into();
        self.upload_url = upload_url.into();
        self
    }

    async fn load_credentials(path: &Path) -> Result<UploadCredentials> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::credentials(format!(
                "Cannot read upload credentials {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::credentials(format!(
                "Invalid upload credentials {}: {e}",
                path.display()
            ))
        })
    }

    async fn fetch_access_token(
        http: &reqwest::Client,
        token_url: &str,
        creds: &UploadCredentials,
    ) -> Result<String> {
        let response = http
            .post(token_url)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::credentials(format!(
                "Token refresh rejected ({status}): {body}"
            )));
        }
        if !status.is_success() {
            return Err(Error::worker(format!("Token refresh failed: {status}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    fn build_title(vod_id: &str, meta: Option<&VodMetadata>) -> String {
        let Some(meta) = meta else {
            return format!("{UNTITLED} {vod_id}");
        };
        let date_prefix = if meta.started_at > 0 {
            format!("[{}] ", ms_to_datetime(meta.started_at).format("%Y-%m-%d"))
        } else {
            String::new()
        };
        sanitize_title(&format!("{date_prefix}{}", meta.title))
    }

    fn build_description(vod_id: &str, meta: Option<&VodMetadata>) -> String {
        let Some(meta) = meta else {
            return format!("Archived VOD {vod_id}");
        };

        let mut description = format!("Archived VOD {vod_id}\n\nStreamed by {}", meta.channel);
        if !meta.url.is_empty() {
            description.push_str(&format!("\nOriginal: {}", meta.url));
        }
        if meta.started_at > 0 {
            description.push_str(&format!(
                "\nStream date: {}",
                ms_to_datetime(meta.started_at).format("%Y-%m-%d %H:%M UTC")
            ));
        }

        let games: Vec<(i64, String)> = meta
            .get_moments()
            .into_iter()
            .filter_map(|m| match m.detail {
                MomentDetail::GameChange { game } => Some((m.offset_secs, game)),
                MomentDetail::None => None,
            })
            .collect();
        if !games.is_empty() {
            description.push_str("\n\nGames:");
            for (offset, game) in games {
                description.push_str(&format!("\n{} {game}", format_offset(offset)));
            }
        }

        description
    }

    fn build_video_resource(vod_id: &str, meta: Option<&VodMetadata>) -> serde_json::Value {
        let mut tags = vec![];
        if let Some(meta) = meta
            && !meta.channel.is_empty()
        {
            tags.push(meta.channel.clone());
        }

        json!({
            "snippet": {
                "title": Self::build_title(vod_id, meta),
                "description": Self::build_description(vod_id, meta),
                "tags": tags,
                "categoryId": CATEGORY_GAMING,
            },
            "status": {
                "privacyStatus": "private",
                "selfDeclaredMadeForKids": false,
            },
        })
    }

    async fn initiate_session(
        http: &reqwest::Client,
        upload_url: &str,
        access_token: &str,
        resource: &serde_json::Value,
        content_length: u64,
    ) -> Result<String> {
        let response = http
            .post(format!(
                "{upload_url}?uploadType=resumable&part=snippet,status"
            ))
            .bearer_auth(access_token)
            .header("X-Upload-Content-Length", content_length)
            .header("X-Upload-Content-Type", "video/mp4")
            .json(resource)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::worker(format!(
                "Upload session initiation failed ({status}): {body}"
            )));
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::worker("Upload session response missing Location header"))
    }

    async fn upload_file(
        http: &reqwest::Client,
        session_url: &str,
        path: &Path,
        total: u64,
        chunk_size: usize,
        vod_id: &str,
        tx: &mpsc::Sender<Result<String>>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut offset: u64 = 0;
        let mut buffer = vec![0u8; chunk_size];

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let want = chunk_size.min((total - offset) as usize);
            let mut read = 0;
            while read < want {
                let n = file.read(&mut buffer[read..want]).await?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            if read == 0 {
                return Err(Error::worker("Final video truncated during upload"));
            }

            let end = offset + read as u64 - 1;
            let response = http
                .put(session_url)
                .header(
                    reqwest::header::CONTENT_RANGE,
                    content_range(offset, end, total),
                )
                .body(buffer[..read].to_vec())
                .send()
                .await?;

            let status = response.status();
            offset = end + 1;

            if status.as_u16() == 308 {
                let percent = offset as f64 * 100.0 / total as f64;
                let _ = tx
                    .send(Ok(format!(
                        "Uploading {vod_id}: {percent:.1}% ({offset}/{total} bytes)"
                    )))
                    .await;
                continue;
            }
            if status.is_success() {
                let video: UploadedVideo = response.json().await?;
                return Ok(video.id);
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::worker(format!(
                "Upload chunk rejected ({status}): {body}"
            )));
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        http: reqwest::Client,
        credentials_path: PathBuf,
        chunk_size: usize,
        jobs: Arc<dyn JobRepository>,
        metadata: Arc<dyn VodMetadataRepository>,
        token_url: String,
        upload_url: String,
        vod_id: String,
        final_video_file_path: String,
        tx: mpsc::Sender<Result<String>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let final_video = require_input(&final_video_file_path, "final video").await?;
        let total = tokio::fs::metadata(&final_video).await?.len();
        if total == 0 {
            return Err(Error::missing_input(format!(
                "Final video is empty: {}",
                final_video.display()
            )));
        }

        let creds = Self::load_credentials(&credentials_path).await?;

        let _ = tx.send(Ok("Requesting upload access token".to_string())).await;
        let access_token = Self::fetch_access_token(&http, &token_url, &creds).await?;

        let meta = metadata.find(&vod_id).await?;
        let resource = Self::build_video_resource(&vod_id, meta.as_ref());

        let _ = tx.send(Ok("Initiating resumable upload".to_string())).await;
        let session_url =
            Self::initiate_session(&http, &upload_url, &access_token, &resource, total).await?;

        let video_id = Self::upload_file(
            &http,
            &session_url,
            &final_video,
            total,
            chunk_size,
            &vod_id,
            &tx,
            &cancel,
        )
        .await?;

        jobs.record_uploaded_video_id(&vod_id, &video_id).await?;
        let _ = tx
            .send(Ok(format!("Upload complete: video id {video_id}")))
            .await;
        Ok(())
    }
}

/// `Content-Range` value for a chunk.
fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}

/// Format a VOD offset as `h:mm:ss`.
fn format_offset(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl StageWorker for VideoUploader {
    fn stage(&self) -> Stage {
        Stage::Uploading
    }

    /// The uploader's artifact is a remote id, not a local file.
    fn output_path(&self, _vod_id: &str) -> Option<PathBuf> {
        None
    }

    fn start(&self, job: &ArchiveJob, cancel: CancellationToken) -> StatusStream {
        let (tx, stream) = status_channel();
        let http = self.http.clone();
        let credentials_path = self.credentials_path.clone();
        let chunk_size = self.chunk_size;
        let jobs = self.jobs.clone();
        let metadata = self.metadata.clone();
        let token_url = self.token_url.clone();
        let upload_url = self.upload_url.clone();
        let vod_id = job.vod_id.clone();
        let final_video_file_path = job.final_video_file_path.clone();

        tokio::spawn(async move {
            let result = Self::execute(
                http,
                credentials_path,
                chunk_size,
                jobs,
                metadata,
                token_url,
                upload_url,
                vod_id,
                final_video_file_path,
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

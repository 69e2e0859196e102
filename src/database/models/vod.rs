//! VOD metadata database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

use crate::database::time;

/// Metadata captured at ingestion time.
///
/// The pipeline reads this to enrich upload titles and descriptions; it never
/// writes it back.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VodMetadata {
    pub vod_id: String,
    /// Channel login the VOD belongs to.
    pub channel: String,
    pub title: String,
    /// Original URL on the source platform.
    pub url: String,
    pub duration_secs: i64,
    /// Stream start as epoch ms.
    pub started_at: i64,
    /// JSON array of [`Moment`]s.
    pub moments: String,
    pub created_at: i64,
}

impl VodMetadata {
    pub fn new(vod_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            vod_id: vod_id.into(),
            channel: channel.into(),
            title: String::new(),
            url: String::new(),
            duration_secs: 0,
            started_at: 0,
            moments: "[]".to_string(),
            created_at: time::now_ms(),
        }
    }

    /// Parse the moments JSON; malformed data is treated as empty.
    pub fn get_moments(&self) -> Vec<Moment> {
        serde_json::from_str(&self.moments).unwrap_or_else(|e| {
            warn!(vod_id = %self.vod_id, error = %e, "Invalid moments JSON; treating as empty");
            Vec::new()
        })
    }

    pub fn set_moments(&mut self, moments: &[Moment]) {
        self.moments = serde_json::to_string(moments).unwrap_or_else(|_| "[]".to_string());
    }
}

/// A point of interest within a VOD (e.g. the streamer switching games).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    /// Offset from the start of the VOD, in seconds.
    pub offset_secs: i64,
    #[serde(default)]
    pub detail: MomentDetail,
}

/// What happened at a moment.
/// Internally tagged so unknown producers can fall back to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MomentDetail {
    /// The streamer switched to a different game.
    GameChange { game: String },
    #[default]
    None,
}

impl Moment {
    pub fn game_change(offset_secs: i64, game: impl Into<String>) -> Self {
        Self {
            offset_secs,
            detail: MomentDetail::GameChange { game: game.into() },
        }
    }
}

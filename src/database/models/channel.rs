//! Channel database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;

/// A source-platform account the ingestor scans for new VODs.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Channel {
    /// Platform login name (stable identifier).
    pub login: String,
    pub display_name: String,
    /// Disabled channels are skipped by the ingestor but kept for history.
    pub enabled: bool,
    pub created_at: i64,
}

impl Channel {
    pub fn new(login: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            display_name: display_name.into(),
            enabled: true,
            created_at: time::now_ms(),
        }
    }
}

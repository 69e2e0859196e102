//! Channel repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::Channel;

/// Channel repository trait.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Channels the ingestor should scan.
    async fn list_enabled(&self) -> Result<Vec<Channel>>;
    /// Insert or update a channel (keyed by login).
    async fn upsert(&self, channel: &Channel) -> Result<()>;
    async fn set_enabled(&self, login: &str, enabled: bool) -> Result<()>;
}

/// SQLx implementation of ChannelRepository.
pub struct SqlxChannelRepository {
    pool: SqlitePool,
}

impl SqlxChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for SqlxChannelRepository {
    async fn list_enabled(&self) -> Result<Vec<Channel>> {
        let channels =
            sqlx::query_as::<_, Channel>("SELECT * FROM channel WHERE enabled = 1 ORDER BY login")
                .fetch_all(&self.pool)
                .await?;
        Ok(channels)
    }

    async fn upsert(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            "INSERT INTO channel (login, display_name, enabled, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(login) DO UPDATE SET display_name = excluded.display_name, \
             enabled = excluded.enabled",
        )
        .bind(&channel.login)
        .bind(&channel.display_name)
        .bind(channel.enabled)
        .bind(channel.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_enabled(&self, login: &str, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE channel SET enabled = ? WHERE login = ?")
            .bind(enabled)
            .bind(login)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

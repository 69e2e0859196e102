//! VOD metadata repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::VodMetadata;

/// VOD metadata repository trait.
#[async_trait]
pub trait VodMetadataRepository: Send + Sync {
    async fn find(&self, vod_id: &str) -> Result<Option<VodMetadata>>;
    /// Insert or update metadata (keyed by vod_id).
    async fn upsert(&self, metadata: &VodMetadata) -> Result<()>;
}

/// SQLx implementation of VodMetadataRepository.
pub struct SqlxVodMetadataRepository {
    pool: SqlitePool,
}

impl SqlxVodMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VodMetadataRepository for SqlxVodMetadataRepository {
    async fn find(&self, vod_id: &str) -> Result<Option<VodMetadata>> {
        let metadata =
            sqlx::query_as::<_, VodMetadata>("SELECT * FROM vod_metadata WHERE vod_id = ?")
                .bind(vod_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(metadata)
    }

    async fn upsert(&self, metadata: &VodMetadata) -> Result<()> {
        sqlx::query(
            "INSERT INTO vod_metadata (vod_id, channel, title, url, duration_secs, \
             started_at, moments, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(vod_id) DO UPDATE SET channel = excluded.channel, \
             title = excluded.title, url = excluded.url, \
             duration_secs = excluded.duration_secs, started_at = excluded.started_at, \
             moments = excluded.moments",
        )
        .bind(&metadata.vod_id)
        .bind(&metadata.channel)
        .bind(&metadata.title)
        .bind(&metadata.url)
        .bind(metadata.duration_secs)
        .bind(metadata.started_at)
        .bind(&metadata.moments)
        .bind(metadata.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

//! Database repositories.

pub mod channel;
pub mod job;
pub mod vod;

pub use channel::{ChannelRepository, SqlxChannelRepository};
pub use job::{ArtifactField, JobRepository, SqlxJobRepository};
pub use vod::{SqlxVodMetadataRepository, VodMetadataRepository};

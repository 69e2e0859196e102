//! Database models.

pub mod channel;
pub mod job;
pub mod vod;

pub use channel::Channel;
pub use job::ArchiveJob;
pub use vod::{Moment, MomentDetail, VodMetadata};

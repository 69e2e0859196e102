//! Stage workers.
//!
//! Five workers, one per active stage, all behind the uniform
//! [`StageWorker`] contract.

pub mod chat_download;
pub mod chat_render;
pub mod combine;
pub mod command;
pub mod ffmpeg;
pub mod traits;
pub mod upload;
pub mod vod_download;

pub use chat_download::ChatDownloader;
pub use chat_render::ChatRenderer;
pub use combine::FinalRenderer;
pub use traits::{StageWorker, StatusStream};
pub use upload::VideoUploader;
pub use vod_download::VodDownloader;

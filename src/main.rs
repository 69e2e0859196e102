use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vodvault::config::AppConfig;
use vodvault::database::{self, repositories};
use vodvault::ingest::{Ingestor, TwitchVodSource};
use vodvault::pipeline::workers::{
    ChatDownloader, ChatRenderer, FinalRenderer, StageWorker, VideoUploader, VodDownloader,
};
use vodvault::pipeline::{Dispatcher, DispatcherConfig};
use vodvault::utils::fs::Workspace;
use vodvault::{logging, pipeline};

/// Archives streaming-platform VODs with rendered chat to a video host.
#[derive(Debug, Parser)]
#[command(name = "vodvault", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load environment variables before config so overrides apply.
    dotenvy::dotenv().ok();
    let config = AppConfig::load(args.config.as_deref())?;

    let _log_guard = logging::init_logging(&config.logging.dir, &config.logging.filter)?;
    info!("vodvault starting");

    let pool = database::init_pool(&config.store.database_url).await?;
    database::run_migrations(&pool).await?;

    let workspace = Workspace::new(&config.pipeline.working_dir);
    workspace.ensure_layout().await?;

    let jobs: Arc<dyn repositories::JobRepository> =
        Arc::new(repositories::SqlxJobRepository::new(pool.clone()));
    let channels: Arc<dyn repositories::ChannelRepository> =
        Arc::new(repositories::SqlxChannelRepository::new(pool.clone()));
    let vod_metadata: Arc<dyn repositories::VodMetadataRepository> =
        Arc::new(repositories::SqlxVodMetadataRepository::new(pool.clone()));

    let workers: Vec<Arc<dyn StageWorker>> = vec![
        Arc::new(VodDownloader::new(
            &config.tools.vod_downloader_path,
            workspace.clone(),
        )),
        Arc::new(ChatDownloader::new(
            &config.tools.chat_downloader_path,
            workspace.clone(),
        )),
        Arc::new(ChatRenderer::new(
            &config.tools.chat_downloader_path,
            &config.tools.ffprobe_path,
            workspace.clone(),
        )),
        Arc::new(FinalRenderer::new(
            &config.tools.ffmpeg_path,
            &config.tools.ffprobe_path,
            workspace.clone(),
        )),
        Arc::new(VideoUploader::new(
            &config.upload.credentials_path,
            config.upload.chunk_size_bytes,
            jobs.clone(),
            vod_metadata.clone(),
        )),
    ];

    let dispatcher = Dispatcher::new(
        jobs.clone(),
        workers,
        DispatcherConfig {
            poll_interval: config.pipeline.poll_interval(),
            lease_interval: config.pipeline.lease_refresh_interval(),
            progress_interval: pipeline::throttle::PROGRESS_PERSIST_INTERVAL,
        },
    );

    let root_token = CancellationToken::new();
    logging::start_retention_cleanup(config.logging.dir.clone(), root_token.clone());

    let mut tasks = tokio::task::JoinSet::new();

    if config.ingest.client_id.is_empty() {
        warn!("No source-platform client id configured; ingestor disabled");
    } else {
        let source = Arc::new(TwitchVodSource::new(
            &config.ingest.client_id,
            &config.ingest.auth_token,
        ));
        let ingestor = Ingestor::new(
            source,
            channels,
            vod_metadata,
            jobs.clone(),
            config.ingest.interval(),
        );
        let token = root_token.clone();
        tasks.spawn(async move { ingestor.run(token).await });
    }

    {
        let token = root_token.clone();
        tasks.spawn(async move { dispatcher.run(token).await });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    root_token.cancel();

    while tasks.join_next().await.is_some() {}
    info!("vodvault stopped");

    Ok(())
}

//! Pipeline worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use reel_media::ProcessRunner;
use reel_publish::YouTubePublisher;
use reel_queue::TriggerQueue;
use reel_storage::{StageStores, StorageConfig};
use reel_worker::{init_tracing, Dispatcher, PipelineConfig, PipelineContext};

async fn run() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let storage = StorageConfig::from_env().context("invalid storage configuration")?;
    let store = storage.connect().await.context("failed to connect object store")?;
    let stores = StageStores::new(store, storage.layout.clone());

    let queue = TriggerQueue::from_env().context("failed to create trigger queue")?;

    let mut ctx = PipelineContext::new(
        stores,
        Arc::new(ProcessRunner::new()),
        Arc::new(queue.clone()),
        config,
    );

    let publish_enabled = std::env::var("PUBLISH_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    if publish_enabled {
        let publisher = YouTubePublisher::from_env()
            .await
            .context("failed to create publisher")?;
        ctx = ctx.with_publisher(Arc::new(publisher));
    } else {
        warn!("Publishing disabled; compilation triggers will be dead-lettered");
    }

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9091);
    if metrics_port != 0 {
        reel_worker::metrics::init_metrics(SocketAddr::from(([0, 0, 0, 0], metrics_port)))?;
        info!("Metrics exporter listening on port {}", metrics_port);
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(ctx), queue));

    let signal_target = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_target.shutdown();
        }
    });

    dispatcher.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS); a second
    // install attempt only means one is already present.
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing(&["reel=info", "aws_config=warn", "hyper=warn"]);

    info!("Starting reel-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

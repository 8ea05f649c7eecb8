mod config;
mod models;
mod processor;
mod relay;
mod sampler;
mod store;
mod tracker;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use config::{AppConfig, ModeKind, SinkKind};
use relay::{LocalSink, Relay, RemoteSink};
use sampler::{FixOptions, GpsdSource, Sampler, SamplingMode};
use store::SharedStore;
use tracing::{info, warn};
use tracker::Tracker;

const STATUS_EVERY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Siscom Tracker for device {}...", config.device_id);

    // Pick the sink
    let relay: Arc<dyn Relay> = match config.relay_sink {
        SinkKind::Remote => {
            let sink = RemoteSink::new(config.endpoint_url(), config.relay_timeout())?;
            info!("Relaying to {}", sink.endpoint());
            Arc::new(sink)
        }
        SinkKind::Local => {
            let store = Arc::new(SharedStore::new());
            tokio::spawn(store::observe(
                store.clone(),
                models::record::store_key(&config.device_id),
            ));
            Arc::new(LocalSink::new(store))
        }
    };

    // Background continuity worker
    let (worker, worker_task) = worker::spawn(relay.clone(), config.background_interval());

    // Sampler on top of gpsd
    let source = Arc::new(GpsdSource::new(config.gpsd_addr()));
    let mode = match config.sampler_mode {
        ModeKind::Continuous => SamplingMode::Continuous,
        ModeKind::Interval => SamplingMode::Interval(config.sample_interval()),
    };
    let options = FixOptions {
        timeout: config.fix_timeout(),
        ..FixOptions::default()
    };
    let sampler = Sampler::new(source, mode, options);

    let mut tracker = Tracker::new(
        config.device_id.clone(),
        sampler,
        relay,
        Some(worker.clone()),
    );
    tracker.start().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut status_ticker = tokio::time::interval(STATUS_EVERY);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = status_ticker.tick() => {
                let status = tracker.status();
                info!(
                    "tracking={} sent={} last_sent={:?} {}",
                    status.tracking,
                    status.sent,
                    status.last_sent,
                    status.confirmation.unwrap_or_default()
                );
                if let Some(error) = status.last_error {
                    warn!("last error: {}", error);
                }
                match worker.status().await {
                    Ok(bg) => info!(
                        "background running={} device={:?} has_position={}",
                        bg.running,
                        bg.device_id,
                        bg.cached.is_some()
                    ),
                    Err(e) => warn!("background worker: {}", e),
                }
            }
        }
    }

    tracker.stop().await;
    worker.shutdown().await;
    worker_task.await?;

    Ok(())
}

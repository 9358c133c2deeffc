mod cli;
mod shutdown;

use std::sync::Arc;

use activitymon_engine::{ActivityPipeline, LocalStore, PollingObserver};
use clap::Parser;

use crate::cli::Cli;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store_path = cli.store_path.clone();
    let config = cli.into_pipeline_config();
    config
        .validate()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    tracing::info!(endpoint = %config.endpoint_url, "starting activity capture pipeline");

    let store = Arc::new(LocalStore::open(&store_path, config.queue_max)?);
    let observer = Arc::new(PollingObserver::new(config.window_poll_interval));
    let http = reqwest::Client::builder().build()?;
    let pipeline = Arc::new(ActivityPipeline::new(config, observer, store, http));

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let mut run_handle = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };

    tokio::select! {
        event = shutdown_rx.recv() => {
            match event {
                Some(ShutdownEvent::Graceful) => {
                    tracing::info!("shutdown requested, flushing pending records before exit");
                    pipeline.request_stop();
                }
                Some(ShutdownEvent::Immediate) | None => {
                    tracing::warn!("immediate shutdown requested, exiting without final flush");
                    std::process::exit(130);
                }
            }
        }
        result = &mut run_handle => {
            if let Err(err) = result {
                tracing::error!(%err, "pipeline task exited unexpectedly");
            }
            return Ok(());
        }
    }

    run_handle.await?;
    Ok(())
}

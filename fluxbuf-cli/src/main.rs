//! FluxBuf forwarder - buffers stdin lines into chunk files
//!
//! Usage: `fluxbuf [config.json]`

mod config;
mod flusher;
mod producer;

use anyhow::Context;
use config::ForwarderConfig;
use flusher::Flusher;
use fluxbuf_core::{Buffer, MemoryBackend};
use producer::Producer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args_os().nth(1) {
        Some(path) => ForwarderConfig::load(&PathBuf::from(path))?,
        None => ForwarderConfig::default(),
    };

    info!("Starting FluxBuf forwarder v{}", fluxbuf_core::VERSION);
    info!("Output directory: {:?}", config.output_dir);

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let buffer = Arc::new(Buffer::new(config.buffer.clone(), MemoryBackend)?);
    buffer.start()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = tokio::spawn(
        Flusher::new(buffer.clone(), config.output_dir.clone())
            .run(config.flush_interval(), shutdown_rx.clone()),
    );
    let ticker = tokio::spawn(flusher::run_ticker(
        buffer.clone(),
        config.flush_interval(),
        config.timekey,
        config.timekey_wait,
        shutdown_rx,
    ));

    let mut producer = Producer::new(buffer.clone(), config.tag.clone(), config.timekey, config.batch_size)
        .with_retry_wait(config.retry_wait());
    let records = producer.run(BufReader::new(tokio::io::stdin())).await?;
    info!("Input closed after {} records, draining", records);

    flusher::signal_shutdown(&shutdown_tx);
    let flusher = flusher.await?;
    ticker.await?;

    buffer.enqueue_all(true, |_, _| true)?;
    let flushed = flusher.drain().await?;
    info!("Flushed {} remaining chunks", flushed);
    info!("{}", buffer.statistics().to_json());

    buffer.close()?;
    buffer.terminate();
    info!("FluxBuf forwarder stopped");

    Ok(())
}

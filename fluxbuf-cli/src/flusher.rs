//! Flusher: queued chunks to files, and the enqueue ticker

use anyhow::{Context, Result};
use fluxbuf_core::{Buffer, ChunkHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Writes dequeued chunks to `<output_dir>/<timekey>-<chunk id>.log`
pub struct Flusher {
    buffer: Arc<Buffer>,
    output_dir: PathBuf,
}

impl Flusher {
    pub fn new(buffer: Arc<Buffer>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            buffer,
            output_dir: output_dir.into(),
        }
    }

    /// File receiving the content of `chunk`
    pub fn path_for(&self, chunk: &ChunkHandle) -> PathBuf {
        let timekey = chunk
            .metadata()
            .timekey
            .map_or_else(|| "none".to_string(), |t| t.to_string());
        self.output_dir.join(format!("{}-{}.log", timekey, chunk.id()))
    }

    /// Flush the queue head; returns false when the queue is empty.
    ///
    /// A chunk that cannot be written goes back to the queue head.
    pub async fn flush_once(&self) -> Result<bool> {
        let Some(chunk) = self.buffer.dequeue_chunk()? else {
            return Ok(false);
        };
        let path = self.path_for(&chunk);

        match self.write_chunk(&chunk, &path).await {
            Ok(bytes) => {
                self.buffer.purge_chunk(chunk.id())?;
                debug!("Flushed chunk {} to {:?} ({} bytes)", chunk.id(), path, bytes);
                Ok(true)
            }
            Err(e) => {
                self.buffer.takeback_chunk(chunk.id())?;
                warn!("Failed to flush chunk {}, taken back: {:#}", chunk.id(), e);
                Err(e)
            }
        }
    }

    async fn write_chunk(&self, chunk: &ChunkHandle, path: &Path) -> Result<usize> {
        let handle = chunk.clone();
        let content = tokio::task::spawn_blocking(move || {
            let guard = handle.lock();
            guard.read()
        })
        .await??;
        tokio::fs::write(path, &content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(content.len())
    }

    /// Flush until the queue is empty; returns the number of chunks written
    pub async fn drain(&self) -> Result<usize> {
        let mut flushed = 0;
        while self.flush_once().await? {
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Flush every `interval` until `shutdown` flips to true
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain().await {
                        error!("Flush failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        self
    }
}

/// Enqueue staged chunks whose time bucket closed at least `wait` seconds ago
pub fn enqueue_expired(buffer: &Buffer, now: i64, span: i64, wait: i64) -> Result<()> {
    buffer.enqueue_all(false, |metadata, _| {
        metadata
            .timekey
            .is_some_and(|timekey| timekey + span + wait <= now)
    })?;
    Ok(())
}

/// Enqueue expired chunks and log statistics every `interval`
pub async fn run_ticker(
    buffer: Arc<Buffer>,
    interval: Duration,
    span: i64,
    wait: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = enqueue_expired(&buffer, now, span, wait) {
                    error!("Enqueue failed: {:#}", e);
                }
                info!("{}", buffer.statistics().to_json());
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Ask the flusher and ticker to stop; false when both already exited
pub fn signal_shutdown(shutdown: &watch::Sender<bool>) -> bool {
    match shutdown.send(true) {
        Ok(()) => true,
        Err(_) => {
            warn!("Flusher and ticker already stopped");
            false
        }
    }
}

//! Stdin producer: lines to buffer writes

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fluxbuf_core::{Buffer, BufferError, Metadata, NewlineDelimited, WriteOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Start of the time bucket containing `now`
pub fn timekey_of(now: DateTime<Utc>, span: i64) -> i64 {
    now.timestamp().div_euclid(span) * span
}

/// Groups lines by time bucket and writes them in batches
pub struct Producer {
    buffer: Arc<Buffer>,
    tag: String,
    span: i64,
    batch_size: usize,
    retry_wait: Duration,
    pending: BTreeMap<Metadata, Vec<Bytes>>,
    pending_records: usize,
}

impl Producer {
    pub fn new(buffer: Arc<Buffer>, tag: impl Into<String>, span: i64, batch_size: usize) -> Self {
        Self {
            buffer,
            tag: tag.into(),
            span,
            batch_size,
            retry_wait: Duration::from_millis(100),
            pending: BTreeMap::new(),
            pending_records: 0,
        }
    }

    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_wait = retry_wait;
        self
    }

    /// Read lines until EOF; returns the number of records written
    pub async fn run<R>(&mut self, reader: R) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await? {
            self.push(line, Utc::now());
            count += 1;
            if self.pending_records >= self.batch_size {
                self.flush().await?;
            }
        }
        self.flush().await?;
        Ok(count)
    }

    /// Add a line to the batch of its time bucket
    pub fn push(&mut self, line: String, now: DateTime<Utc>) {
        let metadata = self
            .buffer
            .metadata(Some(timekey_of(now, self.span)), Some(self.tag.clone()), None);
        self.pending
            .entry(metadata)
            .or_default()
            .push(Bytes::from(line));
        self.pending_records += 1;
    }

    /// Write the pending batches, waiting while the buffer is full
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batches = std::mem::take(&mut self.pending);
        let records = std::mem::take(&mut self.pending_records);

        loop {
            // chunk locks are blocking, keep them off the runtime threads
            let buffer = self.buffer.clone();
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = buffer.write(&batches, WriteOptions::formatted(&NewlineDelimited));
                (batches, result)
            })
            .await?;
            batches = returned;

            match result {
                Ok(()) => {
                    debug!("Wrote {} records in {} batches", records, batches.len());
                    return Ok(());
                }
                Err(BufferError::BufferOverflow { .. }) => {
                    debug!("Buffer full, retrying in {:?}", self.retry_wait);
                    tokio::time::sleep(self.retry_wait).await;
                }
                Err(BufferError::ChunkOverflow(skipped)) => {
                    warn!("Dropped {} oversized records", skipped.len());
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

//! Chunked write buffer
//!
//! The buffer groups records by [`Metadata`](crate::Metadata) into a
//! *stage* of open chunks, moves closed chunks into a FIFO *queue*, and
//! lends queued chunks to a flusher until they are purged or taken back.
//!
//! Lock order is chunk, then buffer: code holding the buffer-wide lock
//! never waits for a chunk lock.

mod backend;
mod engine;
mod write;


pub use backend::{BufferBackend, MemoryBackend, ResumedChunks};
pub use engine::Buffer;
pub use write::WriteOptions;

use crate::chunk::Compression;
use crate::{BufferError, Result};
use serde::{Deserialize, Serialize};

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum committed bytes per chunk
    pub chunk_limit_size: usize,
    /// Maximum records per chunk
    pub chunk_limit_records: Option<usize>,
    /// Share of the limits at which a chunk counts as full
    pub chunk_full_threshold: f64,
    /// Maximum staged plus queued bytes
    pub total_limit_size: usize,
    /// Overrides `total_limit_size` with this many chunks
    pub queue_limit_length: Option<usize>,
    /// Queue length at which periodic enqueueing stops
    pub queued_chunks_limit_size: Option<usize>,
    /// Compression applied by newly generated chunks
    pub compress: Compression,
    /// Require a backend whose chunks survive a restart
    pub persistent: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_limit_size: crate::defaults::CHUNK_LIMIT_SIZE,
            chunk_limit_records: None,
            chunk_full_threshold: crate::defaults::CHUNK_FULL_THRESHOLD,
            total_limit_size: crate::defaults::TOTAL_LIMIT_SIZE,
            queue_limit_length: None,
            queued_chunks_limit_size: None,
            compress: Compression::default(),
            persistent: false,
        }
    }
}

impl BufferConfig {
    /// Check option ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.chunk_full_threshold > 0.0 && self.chunk_full_threshold <= 1.0) {
            return Err(BufferError::Config(format!(
                "chunk_full_threshold must be in (0, 1], got {}",
                self.chunk_full_threshold
            )));
        }
        if self.chunk_limit_size == 0 {
            return Err(BufferError::Config("chunk_limit_size must be positive".into()));
        }
        if self.total_limit_size == 0 {
            return Err(BufferError::Config("total_limit_size must be positive".into()));
        }
        if self.chunk_limit_records == Some(0) {
            return Err(BufferError::Config("chunk_limit_records must be positive".into()));
        }
        if self.queue_limit_length == Some(0) {
            return Err(BufferError::Config("queue_limit_length must be positive".into()));
        }
        Ok(())
    }

    /// Total limit after applying `queue_limit_length`
    pub fn effective_total_limit_size(&self) -> usize {
        match self.queue_limit_length {
            Some(length) => self.chunk_limit_size.saturating_mul(length),
            None => self.total_limit_size,
        }
    }
}

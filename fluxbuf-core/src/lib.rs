//! FluxBuf Core - Chunked Write Buffer Engine
//!
//! A buffer for log and event forwarding pipelines that:
//! - Groups records by metadata (time bucket, tag, custom variables)
//! - Packs them into size-bounded chunks, splitting oversized batches
//! - Hands completed chunks to a flusher and applies backpressure
//!
//! # Architecture
//!
//! - **Metadata**: Grouping key for records
//! - **Chunk**: Appendable unit with pending/committed content and its own lock
//! - **Buffer**: Stage of open chunks, FIFO queue of closed chunks, and
//!   the chunks currently lent to a flusher
//! - **Backend**: Creates chunks and restores them at start
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use fluxbuf_core::{Buffer, BufferConfig, MemoryBackend, WriteOptions};
//! use std::collections::BTreeMap;
//!
//! let buffer = Buffer::new(BufferConfig::default(), MemoryBackend).unwrap();
//! buffer.start().unwrap();
//!
//! let m = buffer.metadata(Some(1460390400), Some("app".into()), None);
//! let batches = BTreeMap::from([(m.clone(), vec![Bytes::from_static(b"hello\n")])]);
//! buffer.write(&batches, WriteOptions::default()).unwrap();
//!
//! buffer.enqueue_chunk(&m).unwrap();
//! let chunk = buffer.dequeue_chunk().unwrap().unwrap();
//! assert_eq!(&chunk.lock().read().unwrap()[..], b"hello\n");
//! buffer.purge_chunk(chunk.id()).unwrap();
//! ```

pub mod buffer;
pub mod chunk;
pub mod format;
pub mod metrics;

mod error;
mod metadata;

pub use buffer::{Buffer, BufferBackend, BufferConfig, MemoryBackend, WriteOptions};
pub use chunk::{Chunk, ChunkGuard, ChunkHandle, ChunkId, ChunkState, Compression, MemoryChunk};
pub use error::{BufferError, Result};
pub use format::{Formatter, LengthPrefixed, NewlineDelimited};
pub use metadata::{Metadata, Timekey};
pub use metrics::{BufferMetrics, BufferStatistics, MetricsSink};

/// FluxBuf version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Maximum bytes per chunk (8MB)
    pub const CHUNK_LIMIT_SIZE: usize = 8 * 1024 * 1024;

    /// Maximum staged plus queued bytes (512MB)
    pub const TOTAL_LIMIT_SIZE: usize = 512 * 1024 * 1024;

    /// Share of the chunk limit at which a chunk is full
    pub const CHUNK_FULL_THRESHOLD: f64 = 0.95;
}

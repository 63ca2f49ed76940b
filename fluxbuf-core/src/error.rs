//! Error types for FluxBuf

use crate::chunk::ChunkId;
use thiserror::Error;

/// Result type alias for buffer operations
pub type Result<T> = std::result::Result<T, BufferError>;

/// FluxBuf error types
#[derive(Error, Debug)]
pub enum BufferError {
    /// Staged and queued bytes already reached the total limit
    #[error("buffer space has too many data: stage {stage_size} + queue {queue_size} >= limit {total_limit_size}")]
    BufferOverflow {
        stage_size: usize,
        queue_size: usize,
        total_limit_size: usize,
    },

    /// One or more records can never fit into a chunk
    #[error("{}", .0.join(", "))]
    ChunkOverflow(Vec<String>),

    /// Chunk rejected an append
    #[error("Append error: {0}")]
    Append(String),

    /// Chunk failed to commit pending data
    #[error("Commit error: {0}")]
    Commit(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Chunk id is not known to the buffer
    #[error("Unknown chunk: {0}")]
    UnknownChunk(ChunkId),

    /// Buffer used before `start` or after `terminate`
    #[error("Buffer is not started")]
    NotStarted,

    /// Operation not supported in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl BufferError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, BufferError::BufferOverflow { .. } | BufferError::Io(_))
    }

    /// Check if error is one of the overflow conditions
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            BufferError::BufferOverflow { .. } | BufferError::ChunkOverflow(_)
        )
    }
}

//! Chunk storage backends

use crate::chunk::{Chunk, Compression, MemoryChunk};
use crate::{BufferError, Metadata, Result};
use indexmap::IndexMap;

/// Chunks recovered at start: staged chunks by metadata, then the queue
pub type ResumedChunks = (IndexMap<Metadata, Box<dyn Chunk>>, Vec<Box<dyn Chunk>>);

/// Storage collaborator of a [`Buffer`](super::Buffer).
///
/// A backend creates chunks and hands back whatever survived the previous
/// run. Neither operation has a meaningful default.
pub trait BufferBackend: Send + Sync {
    /// Chunks to restore, called once by `Buffer::start`
    fn resume(&self) -> Result<ResumedChunks> {
        Err(BufferError::InvalidOperation(
            "resume is not implemented by this backend".into(),
        ))
    }

    /// Create a new, empty chunk for `metadata`
    fn generate_chunk(
        &self,
        metadata: &Metadata,
        compression: Compression,
    ) -> Result<Box<dyn Chunk>> {
        let _ = (metadata, compression);
        Err(BufferError::InvalidOperation(
            "generate_chunk is not implemented by this backend".into(),
        ))
    }

    /// Whether chunks survive a process restart
    fn persistent(&self) -> bool {
        false
    }
}

/// Backend keeping every chunk in memory
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

impl BufferBackend for MemoryBackend {
    fn resume(&self) -> Result<ResumedChunks> {
        Ok((IndexMap::new(), Vec::new()))
    }

    fn generate_chunk(
        &self,
        metadata: &Metadata,
        compression: Compression,
    ) -> Result<Box<dyn Chunk>> {
        Ok(Box::new(MemoryChunk::new(metadata.clone(), compression)))
    }
}

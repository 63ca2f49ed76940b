//! Buffer chunks
//!
//! A chunk is a bounded, appendable unit of record bytes. Appends are
//! *pending* until committed; `bytesize`/`size` only ever report committed
//! content. The buffer drives each chunk through a small state machine:
//!
//! ```text
//! Unstaged -> Staged -> Enqueued -> (purged)
//!     \          \          \
//!      `----------`----------`--> Closed
//! ```

mod codec;
mod handle;
mod memory;

pub use handle::{ChunkGuard, ChunkHandle, LockStats};
pub use memory::MemoryChunk;

use crate::{Metadata, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Process-unique chunk identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(Uuid);

impl ChunkId {
    /// Generate a new random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16 bytes of the id
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Chunk lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Created but not reachable from the stage
    Unstaged,
    /// The stage entry for its metadata
    Staged,
    /// In the queue or checked out by a flusher
    Enqueued,
    /// Resources released; terminal
    Closed,
}

/// Payload compression applied by a chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Store bytes as given
    #[default]
    #[serde(alias = "none")]
    Text,
    /// LZ4 frame per append call
    #[serde(alias = "gzip")]
    Lz4,
}

/// Committed position of a chunk, used to undo commits made by a failed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Committed bytes
    pub bytesize: usize,
    /// Committed records
    pub size: usize,
}

/// Optional capability: chunks that want to know when they reach the queue
pub trait EnqueueHook {
    /// Called once the chunk has been moved into the queue
    fn on_enqueued(&mut self);
}

/// Fields every chunk implementation carries
#[derive(Debug, Clone)]
pub struct ChunkCore {
    id: ChunkId,
    metadata: Metadata,
    state: ChunkState,
    compression: Compression,
    created_at: SystemTime,
    modified_at: SystemTime,
}

impl ChunkCore {
    /// Create the core of a new, unstaged chunk
    pub fn new(metadata: Metadata, compression: Compression) -> Self {
        let now = SystemTime::now();
        Self {
            id: ChunkId::generate(),
            metadata,
            state: ChunkState::Unstaged,
            compression,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn modified_at(&self) -> SystemTime {
        self.modified_at
    }

    /// Record a successful commit
    pub fn touch(&mut self) {
        self.modified_at = SystemTime::now();
    }

    /// Move to a new state. Closed is terminal.
    pub fn transition(&mut self, state: ChunkState) {
        if self.state != ChunkState::Closed {
            self.state = state;
        }
    }
}

/// Contract every buffer chunk satisfies.
///
/// Implementations only provide the byte-level operations; identity, state
/// and timestamps live in [`ChunkCore`].
pub trait Chunk: Send + fmt::Debug {
    fn core(&self) -> &ChunkCore;

    fn core_mut(&mut self) -> &mut ChunkCore;

    /// Stage raw records, concatenated (one frame per call when compressed)
    fn append(&mut self, records: &[Bytes]) -> Result<()>;

    /// Stage an already formatted payload holding `records` records
    fn concat(&mut self, bulk: &[u8], records: usize) -> Result<()>;

    /// Make pending content visible
    fn commit(&mut self) -> Result<()>;

    /// Discard pending content
    fn rollback(&mut self) -> Result<()>;

    /// Truncate committed content back to `checkpoint` and drop pending content
    fn revert(&mut self, checkpoint: Checkpoint) -> Result<()>;

    /// Committed bytes
    fn bytesize(&self) -> usize;

    /// Committed records
    fn size(&self) -> usize;

    /// Bytes appended since the last commit or rollback
    fn pending_bytesize(&self) -> usize;

    /// Records appended since the last commit or rollback
    fn pending_size(&self) -> usize;

    /// Committed content as stored (compressed frames when compressed)
    fn raw(&self) -> Bytes;

    /// Release backing resources
    fn close(&mut self) -> Result<()>;

    /// Discard all content and release backing resources
    fn purge(&mut self) -> Result<()>;

    fn unique_id(&self) -> ChunkId {
        self.core().id()
    }

    fn metadata(&self) -> &Metadata {
        self.core().metadata()
    }

    fn state(&self) -> ChunkState {
        self.core().state()
    }

    fn compression(&self) -> Compression {
        self.core().compression()
    }

    /// No committed records; a zero-length record still counts
    fn is_empty(&self) -> bool {
        self.size() == 0 && self.bytesize() == 0
    }

    fn is_writable(&self) -> bool {
        matches!(self.state(), ChunkState::Staged | ChunkState::Unstaged)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            bytesize: self.bytesize(),
            size: self.size(),
        }
    }

    /// Committed content, decompressed
    fn read(&self) -> Result<Bytes> {
        match self.compression() {
            Compression::Text => Ok(self.raw()),
            Compression::Lz4 => codec::decode_frames(&self.raw()),
        }
    }

    fn as_enqueue_hook(&mut self) -> Option<&mut dyn EnqueueHook> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ids_are_unique() {
        let a = ChunkId::generate();
        let b = ChunkId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut core = ChunkCore::new(Metadata::default(), Compression::Text);
        assert_eq!(core.state(), ChunkState::Unstaged);
        core.transition(ChunkState::Staged);
        core.transition(ChunkState::Closed);
        core.transition(ChunkState::Enqueued);
        assert_eq!(core.state(), ChunkState::Closed);
    }

    #[test]
    fn test_compression_names() {
        let c: Compression = serde_json::from_str("\"gzip\"").unwrap();
        assert_eq!(c, Compression::Lz4);
        let c: Compression = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(c, Compression::Text);
        assert_eq!(serde_json::to_string(&Compression::Lz4).unwrap(), "\"lz4\"");
    }
}

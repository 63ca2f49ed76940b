//! Shared chunk handles and lock guards

use super::{Chunk, ChunkId};
use crate::Metadata;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock acquisition counters for a chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Number of times the lock was acquired
    pub acquired: u64,
    /// Number of times the lock was released
    pub released: u64,
}

impl LockStats {
    /// Check if a guard is currently outstanding
    pub fn is_held(&self) -> bool {
        self.acquired > self.released
    }
}

#[derive(Debug, Default)]
struct LockCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Cheap, cloneable reference to a chunk owned by the buffer.
///
/// Identity and metadata are copied out of the chunk so the buffer can
/// route handles without taking the chunk lock.
#[derive(Clone)]
pub struct ChunkHandle {
    id: ChunkId,
    metadata: Metadata,
    inner: Arc<Mutex<Box<dyn Chunk>>>,
    counters: Arc<LockCounters>,
}

impl ChunkHandle {
    /// Wrap a chunk
    pub fn new(chunk: Box<dyn Chunk>) -> Self {
        Self {
            id: chunk.unique_id(),
            metadata: chunk.metadata().clone(),
            inner: Arc::new(Mutex::new(chunk)),
            counters: Arc::new(LockCounters::default()),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Acquire the chunk lock, blocking until it is available
    pub fn lock(&self) -> ChunkGuard {
        let guard = self.inner.lock_arc();
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        ChunkGuard {
            handle: self.clone(),
            guard,
        }
    }

    /// Acquire the chunk lock if nobody holds it
    pub fn try_lock(&self) -> Option<ChunkGuard> {
        let guard = self.inner.try_lock_arc()?;
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Some(ChunkGuard {
            handle: self.clone(),
            guard,
        })
    }

    /// Lock acquisitions and releases so far
    pub fn lock_stats(&self) -> LockStats {
        LockStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
        }
    }

    /// Check if both handles refer to the same chunk
    pub fn ptr_eq(&self, other: &ChunkHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ChunkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkHandle")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Owned permit on a chunk's lock.
///
/// The guard can be moved and stored, so a multi-step operation keeps the
/// chunk locked until the guard is dropped.
pub struct ChunkGuard {
    handle: ChunkHandle,
    guard: ArcMutexGuard<RawMutex, Box<dyn Chunk>>,
}

impl ChunkGuard {
    /// Handle of the locked chunk
    pub fn handle(&self) -> &ChunkHandle {
        &self.handle
    }
}

impl Deref for ChunkGuard {
    type Target = dyn Chunk;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for ChunkGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for ChunkGuard {
    fn drop(&mut self) {
        self.handle.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for ChunkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkGuard")
            .field("id", &self.handle.id)
            .finish()
    }
}

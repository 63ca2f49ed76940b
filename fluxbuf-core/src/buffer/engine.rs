//! Buffer engine: stage, queue and dequeued bookkeeping

use super::{BufferBackend, BufferConfig};
use crate::chunk::{Chunk, ChunkGuard, ChunkHandle, ChunkId, ChunkState};
use crate::metadata::Timekey;
use crate::metrics::{available_space_ratio, BufferStatistics, Gauge, MetricsSink, NoopMetrics};
use crate::{BufferError, Metadata, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mutable buffer state, guarded by the buffer-wide lock
#[derive(Debug, Default)]
pub(super) struct BufferState {
    pub(super) started: bool,
    pub(super) stage: IndexMap<Metadata, ChunkHandle>,
    pub(super) queue: VecDeque<ChunkHandle>,
    pub(super) dequeued: HashMap<ChunkId, ChunkHandle>,
    /// Chunks per metadata in queue and dequeued
    pub(super) queued_num: HashMap<Metadata, usize>,
    /// Committed bytes of staged chunks
    pub(super) stage_size: usize,
    /// Committed bytes of queued and dequeued chunks
    pub(super) queue_size: usize,
    /// Chunks per timekey in stage, queue and dequeued
    pub(super) timekeys: BTreeMap<Timekey, usize>,
}

impl BufferState {
    pub(super) fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(BufferError::NotStarted)
        }
    }

    /// Check if `guard` holds the chunk staged for its metadata
    pub(super) fn is_staged(&self, guard: &ChunkGuard) -> bool {
        self.stage
            .get(guard.metadata())
            .is_some_and(|h| h.id() == guard.handle().id())
    }

    pub(super) fn track(&mut self, metadata: &Metadata) {
        if let Some(timekey) = metadata.timekey {
            *self.timekeys.entry(timekey).or_insert(0) += 1;
        }
    }

    pub(super) fn untrack(&mut self, metadata: &Metadata) {
        if let Some(timekey) = metadata.timekey {
            if let Some(count) = self.timekeys.get_mut(&timekey) {
                *count -= 1;
                if *count == 0 {
                    self.timekeys.remove(&timekey);
                }
            }
        }
    }

    pub(super) fn increment_queued(&mut self, metadata: &Metadata) {
        *self.queued_num.entry(metadata.clone()).or_insert(0) += 1;
    }

    fn decrement_queued(&mut self, metadata: &Metadata) {
        if let Some(count) = self.queued_num.get_mut(metadata) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.queued_num.remove(metadata);
            }
        }
    }

    fn remove_queued(&mut self, id: ChunkId) -> Option<ChunkHandle> {
        let position = self.queue.iter().position(|h| h.id() == id)?;
        self.queue.remove(position)
    }

    fn find(&self, id: ChunkId) -> Option<ChunkHandle> {
        self.dequeued
            .get(&id)
            .or_else(|| self.queue.iter().find(|h| h.id() == id))
            .or_else(|| self.stage.values().find(|h| h.id() == id))
            .cloned()
    }

    pub(super) fn gauges(&self) -> SizeGauges {
        SizeGauges {
            stage_length: self.stage.len(),
            stage_byte_size: self.stage_size,
            queue_length: self.queue.len(),
            queue_byte_size: self.queue_size,
        }
    }
}

/// Size gauges captured under the buffer lock and published after it
#[derive(Debug, Clone, Copy)]
pub(super) struct SizeGauges {
    stage_length: usize,
    stage_byte_size: usize,
    queue_length: usize,
    queue_byte_size: usize,
}

/// Chunked write buffer.
///
/// Shared between producers and flushers through `Arc<Buffer>`; every
/// operation takes `&self`.
pub struct Buffer {
    pub(super) config: BufferConfig,
    pub(super) total_limit_size: usize,
    pub(super) backend: Box<dyn BufferBackend>,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) state: Mutex<BufferState>,
}

impl Buffer {
    /// Create a stopped buffer
    pub fn new(config: BufferConfig, backend: impl BufferBackend + 'static) -> Result<Self> {
        config.validate()?;
        if config.persistent && !backend.persistent() {
            return Err(BufferError::Config(
                "persistent buffer requires a persistent backend".into(),
            ));
        }
        Ok(Self {
            total_limit_size: config.effective_total_limit_size(),
            config,
            backend: Box::new(backend),
            metrics: Arc::new(NoopMetrics),
            state: Mutex::new(BufferState::default()),
        })
    }

    /// Publish gauges into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn chunk_limit_size(&self) -> usize {
        self.config.chunk_limit_size
    }

    /// Total limit in effect, after `queue_limit_length`
    pub fn total_limit_size(&self) -> usize {
        self.total_limit_size
    }

    pub fn persistent(&self) -> bool {
        self.backend.persistent()
    }

    /// Restore chunks from the backend and accept operations
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(BufferError::InvalidOperation("buffer is already started".into()));
        }

        let (staged, queued) = self.backend.resume()?;
        let mut restored = BufferState {
            started: true,
            ..Default::default()
        };
        for (metadata, mut chunk) in staged {
            chunk.core_mut().transition(ChunkState::Staged);
            restored.stage_size += chunk.bytesize();
            restored.track(&metadata);
            restored.stage.insert(metadata, ChunkHandle::new(chunk));
        }
        for mut chunk in queued {
            chunk.core_mut().transition(ChunkState::Enqueued);
            restored.queue_size += chunk.bytesize();
            let handle = ChunkHandle::new(chunk);
            restored.track(handle.metadata());
            restored.increment_queued(handle.metadata());
            restored.queue.push_back(handle);
        }
        *state = restored;

        info!(
            "Buffer started: {} staged ({} bytes), {} queued ({} bytes)",
            state.stage.len(),
            state.stage_size,
            state.queue.len(),
            state.queue_size
        );
        let gauges = state.gauges();
        drop(state);
        self.publish(gauges);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Canonical metadata for the given parts
    pub fn metadata(
        &self,
        timekey: Option<Timekey>,
        tag: Option<String>,
        variables: Option<BTreeMap<String, String>>,
    ) -> Metadata {
        Metadata::canonical(timekey, tag, variables)
    }

    /// Check if staged plus queued bytes are below the total limit
    pub fn storable(&self) -> bool {
        let state = self.state.lock();
        state.stage_size + state.queue_size < self.total_limit_size
    }

    /// Check if committed plus pending content exceeds a chunk limit
    pub fn chunk_size_over(&self, chunk: &dyn Chunk) -> bool {
        let bytes = chunk.bytesize() + chunk.pending_bytesize();
        let records = chunk.size() + chunk.pending_size();
        bytes > self.config.chunk_limit_size
            || self
                .config
                .chunk_limit_records
                .is_some_and(|limit| records > limit)
    }

    /// Check if committed plus pending content reached the full threshold
    pub fn chunk_size_full(&self, chunk: &dyn Chunk) -> bool {
        let threshold = self.config.chunk_full_threshold;
        let bytes = (chunk.bytesize() + chunk.pending_bytesize()) as f64;
        let records = (chunk.size() + chunk.pending_size()) as f64;
        bytes >= self.config.chunk_limit_size as f64 * threshold
            || self
                .config
                .chunk_limit_records
                .is_some_and(|limit| records >= limit as f64 * threshold)
    }

    /// Move the staged chunk of `metadata` to the queue tail
    pub fn enqueue_chunk(&self, metadata: &Metadata) -> Result<()> {
        if let Some(mut guard) = self.lock_staged(metadata, false)? {
            let mut state = self.state.lock();
            self.enqueue_locked(&mut state, &mut guard);
            let gauges = state.gauges();
            drop(state);
            self.publish(gauges);
        }
        Ok(())
    }

    /// Enqueue staged chunks in stage order.
    ///
    /// A chunk is enqueued when `force` is set or `predicate` accepts it.
    /// Without `force`, enqueueing stops once the queue is full.
    pub fn enqueue_all<F>(&self, force: bool, mut predicate: F) -> Result<()>
    where
        F: FnMut(&Metadata, &dyn Chunk) -> bool,
    {
        for metadata in self.stage_keys_checked()? {
            if !force && self.queue_full() {
                break;
            }
            let Some(mut guard) = self.lock_staged(&metadata, false)? else {
                continue;
            };
            if force || predicate(&metadata, &*guard) {
                let mut state = self.state.lock();
                self.enqueue_locked(&mut state, &mut guard);
                let gauges = state.gauges();
                drop(state);
                self.publish(gauges);
            }
        }
        Ok(())
    }

    /// Hand the queue head to a flusher
    pub fn dequeue_chunk(&self) -> Result<Option<ChunkHandle>> {
        let mut state = self.state.lock();
        state.ensure_started()?;
        let Some(handle) = state.queue.pop_front() else {
            return Ok(None);
        };
        state.dequeued.insert(handle.id(), handle.clone());
        debug!("Dequeued chunk {} ({})", handle.id(), handle.metadata());
        let gauges = state.gauges();
        drop(state);
        self.publish(gauges);
        Ok(Some(handle))
    }

    /// Return a dequeued chunk to the queue head
    pub fn takeback_chunk(&self, id: ChunkId) -> Result<bool> {
        let mut state = self.state.lock();
        state.ensure_started()?;
        let Some(handle) = state.dequeued.remove(&id) else {
            return Ok(false);
        };
        state.queue.push_front(handle);
        debug!("Took back chunk {}", id);
        let gauges = state.gauges();
        drop(state);
        self.publish(gauges);
        Ok(true)
    }

    /// Discard a chunk, usually after a successful flush
    pub fn purge_chunk(&self, id: ChunkId) -> Result<()> {
        let handle = {
            let state = self.state.lock();
            state.ensure_started()?;
            state
                .find(id)
                .ok_or_else(|| BufferError::InvalidOperation(format!("unknown chunk {}", id)))?
        };

        let mut guard = handle.lock();
        let mut state = self.state.lock();
        let metadata = guard.metadata().clone();
        let bytesize = guard.bytesize();
        if state.dequeued.remove(&id).is_some() || state.remove_queued(id).is_some() {
            state.queue_size -= bytesize;
            state.decrement_queued(&metadata);
        } else if state.is_staged(&guard) {
            state.stage.shift_remove(&metadata);
            state.stage_size -= bytesize;
        } else {
            // purged or cleared since the lookup
            return Err(BufferError::UnknownChunk(id));
        }
        state.untrack(&metadata);
        let gauges = state.gauges();
        drop(state);

        guard.purge()?;
        debug!("Purged chunk {} ({}, {} bytes)", id, metadata, bytesize);
        self.publish(gauges);
        Ok(())
    }

    /// Purge every queued chunk; staged and dequeued chunks are kept
    pub fn clear_queue(&self) -> Result<()> {
        let handles: Vec<ChunkHandle> = {
            let state = self.state.lock();
            state.ensure_started()?;
            state.queue.iter().cloned().collect()
        };

        let mut cleared = 0;
        for handle in handles {
            let mut guard = handle.lock();
            let mut state = self.state.lock();
            if state.remove_queued(handle.id()).is_none() {
                continue;
            }
            state.queue_size -= guard.bytesize();
            state.decrement_queued(handle.metadata());
            state.untrack(handle.metadata());
            drop(state);

            if let Err(e) = guard.purge() {
                warn!("Failed to purge chunk {} while clearing queue: {}", handle.id(), e);
            }
            cleared += 1;
        }

        debug!("Cleared {} queued chunks", cleared);
        let gauges = self.state.lock().gauges();
        self.publish(gauges);
        Ok(())
    }

    /// Close every chunk without purging it
    pub fn close(&self) -> Result<()> {
        let handles: Vec<ChunkHandle> = {
            let state = self.state.lock();
            state
                .stage
                .values()
                .chain(state.queue.iter())
                .chain(state.dequeued.values())
                .cloned()
                .collect()
        };

        for handle in &handles {
            if let Err(e) = handle.lock().close() {
                warn!("Failed to close chunk {}: {}", handle.id(), e);
            }
        }
        info!("Buffer closed ({} chunks)", handles.len());
        Ok(())
    }

    /// Drop all state; the buffer accepts operations again after `start`
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        *state = BufferState::default();
        let gauges = state.gauges();
        drop(state);
        self.publish(gauges);
        info!("Buffer terminated");
    }

    /// Check if anything is queued, or anything of `metadata` is queued or dequeued
    pub fn queued(&self, metadata: Option<&Metadata>) -> Result<bool> {
        let state = self.state.lock();
        state.ensure_started()?;
        Ok(match metadata {
            Some(m) => state.queued_num.get(m).is_some_and(|n| *n > 0),
            None => !state.queue.is_empty(),
        })
    }

    /// Records held by queued chunks
    pub fn queued_records(&self) -> Result<usize> {
        Ok(self
            .queued_chunks_checked()?
            .iter()
            .map(|h| h.lock().size())
            .sum())
    }

    /// Check if the queue reached `queued_chunks_limit_size`
    pub fn queue_full(&self) -> bool {
        match self.config.queued_chunks_limit_size {
            Some(limit) => self.state.lock().queue.len() >= limit,
            None => false,
        }
    }

    /// Number of chunks of `metadata` in queue and dequeued
    pub fn queued_num(&self, metadata: &Metadata) -> usize {
        self.state.lock().queued_num.get(metadata).copied().unwrap_or(0)
    }

    /// Timekeys with at least one chunk, ascending
    pub fn timekeys(&self) -> Vec<Timekey> {
        self.state.lock().timekeys.keys().copied().collect()
    }

    /// Recount timekeys from the chunks currently held
    pub fn update_timekeys(&self) {
        let mut state = self.state.lock();
        let mut timekeys = BTreeMap::new();
        let held = state
            .stage
            .values()
            .chain(state.queue.iter())
            .chain(state.dequeued.values());
        for handle in held {
            if let Some(timekey) = handle.metadata().timekey {
                *timekeys.entry(timekey).or_insert(0) += 1;
            }
        }
        state.timekeys = timekeys;
    }

    pub fn stage_size(&self) -> usize {
        self.state.lock().stage_size
    }

    pub fn queue_size(&self) -> usize {
        self.state.lock().queue_size
    }

    pub fn stage_len(&self) -> usize {
        self.state.lock().stage.len()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn dequeued_len(&self) -> usize {
        self.state.lock().dequeued.len()
    }

    /// Staged metadata in stage order
    pub fn stage_keys(&self) -> Vec<Metadata> {
        self.state.lock().stage.keys().cloned().collect()
    }

    pub fn staged_chunk(&self, metadata: &Metadata) -> Option<ChunkHandle> {
        self.state.lock().stage.get(metadata).cloned()
    }

    /// Queued chunks, head first
    pub fn queued_chunks(&self) -> Vec<ChunkHandle> {
        self.state.lock().queue.iter().cloned().collect()
    }

    pub fn dequeued_chunk(&self, id: ChunkId) -> Option<ChunkHandle> {
        self.state.lock().dequeued.get(&id).cloned()
    }

    /// Point-in-time statistics; also published to the metrics sink
    pub fn statistics(&self) -> BufferStatistics {
        let state = self.state.lock();
        let used = state.stage_size + state.queue_size;
        let stats = BufferStatistics {
            stage_length: state.stage.len(),
            stage_byte_size: state.stage_size,
            queue_length: state.queue.len(),
            queue_byte_size: state.queue_size,
            available_buffer_space_ratios: available_space_ratio(used, self.total_limit_size),
            total_queued_size: used,
            oldest_timekey: state.timekeys.keys().next().copied(),
            newest_timekey: state.timekeys.keys().next_back().copied(),
        };
        drop(state);
        stats.publish(&*self.metrics);
        stats
    }

    fn stage_keys_checked(&self) -> Result<Vec<Metadata>> {
        let state = self.state.lock();
        state.ensure_started()?;
        Ok(state.stage.keys().cloned().collect())
    }

    fn queued_chunks_checked(&self) -> Result<Vec<ChunkHandle>> {
        let state = self.state.lock();
        state.ensure_started()?;
        Ok(state.queue.iter().cloned().collect())
    }

    /// Lock the chunk staged for `metadata`, creating it when `create` is set.
    ///
    /// The stage entry may change while waiting for the chunk lock, so the
    /// entry is checked again once the lock is held.
    pub(super) fn lock_staged(
        &self,
        metadata: &Metadata,
        create: bool,
    ) -> Result<Option<ChunkGuard>> {
        loop {
            let handle = {
                let mut state = self.state.lock();
                state.ensure_started()?;
                match state.stage.get(metadata) {
                    Some(handle) => handle.clone(),
                    None if create => {
                        let mut chunk =
                            self.backend.generate_chunk(metadata, self.config.compress)?;
                        chunk.core_mut().transition(ChunkState::Staged);
                        let handle = ChunkHandle::new(chunk);
                        state.stage.insert(metadata.clone(), handle.clone());
                        state.track(metadata);
                        debug!("Staged new chunk {} ({})", handle.id(), metadata);
                        handle
                    }
                    None => return Ok(None),
                }
            };

            let guard = handle.lock();
            let staged = self.state.lock().is_staged(&guard);
            if staged {
                return Ok(Some(guard));
            }
        }
    }

    /// Move a locked staged chunk into the queue, or purge it when empty.
    ///
    /// Returns false if the chunk is no longer the stage entry of its
    /// metadata.
    pub(super) fn enqueue_locked(&self, state: &mut BufferState, guard: &mut ChunkGuard) -> bool {
        if !state.is_staged(guard) {
            return false;
        }
        let metadata = guard.metadata().clone();
        let id = guard.handle().id();
        let bytesize = guard.bytesize();
        state.stage.shift_remove(&metadata);
        state.stage_size -= bytesize;

        if guard.is_empty() {
            state.untrack(&metadata);
            if let Err(e) = guard.purge() {
                warn!("Failed to purge empty chunk {}: {}", id, e);
            }
            debug!("Discarded empty chunk {} ({})", id, metadata);
            return true;
        }

        guard.core_mut().transition(ChunkState::Enqueued);
        state.queue.push_back(guard.handle().clone());
        state.queue_size += bytesize;
        state.increment_queued(&metadata);
        if let Some(hook) = guard.as_enqueue_hook() {
            hook.on_enqueued();
        }
        debug!("Enqueued chunk {} ({}, {} bytes)", id, metadata, bytesize);
        true
    }

    pub(super) fn publish(&self, gauges: SizeGauges) {
        let metrics = &self.metrics;
        metrics.set(Gauge::StageLength, gauges.stage_length as f64);
        metrics.set(Gauge::StageByteSize, gauges.stage_byte_size as f64);
        metrics.set(Gauge::QueueLength, gauges.queue_length as f64);
        metrics.set(Gauge::QueueByteSize, gauges.queue_byte_size as f64);
        metrics.set(
            Gauge::TotalQueuedSize,
            (gauges.stage_byte_size + gauges.queue_byte_size) as f64,
        );
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("config", &self.config)
            .field("total_limit_size", &self.total_limit_size)
            .finish()
    }
}

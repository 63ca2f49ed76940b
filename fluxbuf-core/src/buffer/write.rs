//! Write path: single-shot append, step-by-step packing, commit and apply
//!
//! A write runs in three phases:
//!
//! 1. **Pack** - every batch is appended to its staged chunk, or split over
//!    the staged chunk and fresh unstaged chunks when it does not fit.
//!    Every chunk touched keeps its lock until the write settles.
//! 2. **Commit** - all touched chunks are committed. Any failure reverts
//!    every touched chunk to its state before the write.
//! 3. **Apply** - one buffer critical section moves full chunks to the
//!    queue and publishes the new stage entries and sizes.

use super::engine::{Buffer, BufferState};
use crate::chunk::{Checkpoint, ChunkGuard, ChunkHandle, ChunkState, Compression};
use crate::format::Formatter;
use crate::{BufferError, Metadata, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Initial number of slices when a batch has to be split
const INITIAL_SPLITS: usize = 10;

/// Options of a single [`Buffer::write`] call
#[derive(Clone, Copy, Default)]
pub struct WriteOptions<'a> {
    /// Formats records before they are stored
    pub format: Option<&'a dyn Formatter>,
    /// Enqueue every touched chunk once the write commits
    pub enqueue: bool,
}

impl<'a> WriteOptions<'a> {
    pub fn formatted(format: &'a dyn Formatter) -> Self {
        Self {
            format: Some(format),
            enqueue: false,
        }
    }

    pub fn enqueue(mut self) -> Self {
        self.enqueue = true;
        self
    }
}

impl fmt::Debug for WriteOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("format", &self.format.is_some())
            .field("enqueue", &self.enqueue)
            .finish()
    }
}

/// Chunks touched for one metadata
struct Packed {
    metadata: Metadata,
    staged: ChunkGuard,
    /// Committed state of the staged chunk before this write
    checkpoint: Checkpoint,
    /// Staged chunk takes no more records in this write
    sealed: bool,
    unstaged: Vec<ChunkGuard>,
    /// Last unstaged chunk takes no more records in this write
    need_fresh: bool,
}

impl Packed {
    fn new(staged: ChunkGuard) -> Self {
        Self {
            metadata: staged.metadata().clone(),
            checkpoint: staged.checkpoint(),
            staged,
            sealed: false,
            unstaged: Vec::new(),
            need_fresh: false,
        }
    }

    /// Chunk receiving the next slice
    fn target(&mut self, buffer: &Buffer) -> Result<&mut ChunkGuard> {
        if !self.sealed {
            return Ok(&mut self.staged);
        }
        if self.need_fresh || self.unstaged.is_empty() {
            let chunk = buffer
                .backend
                .generate_chunk(&self.metadata, buffer.config.compress)?;
            let handle = ChunkHandle::new(chunk);
            debug!("Generated unstaged chunk {} ({})", handle.id(), self.metadata);
            self.unstaged.push(handle.lock());
            self.need_fresh = false;
        }
        let last = self.unstaged.len() - 1;
        Ok(&mut self.unstaged[last])
    }

    /// Stop writing into the current target
    fn advance(&mut self) {
        if self.sealed {
            self.need_fresh = true;
        } else {
            self.sealed = true;
        }
    }

    /// Drop everything packed so far; the staged chunk stays locked
    fn reset(&mut self) -> Result<()> {
        self.staged.rollback()?;
        self.staged.revert(self.checkpoint)?;
        self.sealed = false;
        self.need_fresh = false;
        for mut chunk in self.unstaged.drain(..) {
            chunk.purge()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.staged.commit()?;
        for chunk in &mut self.unstaged {
            chunk.commit()?;
        }
        Ok(())
    }

    /// Restore the state before this write, discarding unstaged chunks
    fn abort(mut self) {
        let id = self.staged.handle().id();
        let reverted = self
            .staged
            .rollback()
            .and_then(|()| self.staged.revert(self.checkpoint));
        if let Err(e) = reverted {
            warn!("Failed to revert chunk {}: {}", id, e);
        }
        for mut chunk in self.unstaged.drain(..) {
            if let Err(e) = chunk.purge() {
                warn!("Failed to purge unstaged chunk {}: {}", chunk.handle().id(), e);
            }
        }
    }
}

/// Outcome of one packing attempt
enum Attempt {
    Done(Vec<String>),
    Retry(usize),
}

fn append_slice(chunk: &mut ChunkGuard, records: &[Bytes], formatted: Option<&Bytes>) -> Result<()> {
    match formatted {
        Some(bulk) => chunk.concat(bulk, records.len()),
        None => chunk.append(records),
    }
}

impl Buffer {
    /// Store records grouped by metadata.
    ///
    /// Batches are processed in metadata order, which is also the order in
    /// which chunk locks are taken. Records that can never fit into a chunk
    /// are skipped and reported as [`BufferError::ChunkOverflow`] after
    /// everything else is stored. Any other failure leaves every chunk as
    /// it was before the call.
    pub fn write(
        &self,
        batches: &BTreeMap<Metadata, Vec<Bytes>>,
        options: WriteOptions<'_>,
    ) -> Result<()> {
        if batches.values().all(Vec::is_empty) {
            return Ok(());
        }
        {
            let state = self.state.lock();
            state.ensure_started()?;
            if state.stage_size + state.queue_size >= self.total_limit_size {
                return Err(BufferError::BufferOverflow {
                    stage_size: state.stage_size,
                    queue_size: state.queue_size,
                    total_limit_size: self.total_limit_size,
                });
            }
        }

        let mut packed = Vec::with_capacity(batches.len());
        let mut errors = Vec::new();
        let outcome = self
            .pack_all(&mut packed, &mut errors, batches, options.format)
            .and_then(|()| packed.iter_mut().try_for_each(Packed::commit));
        if let Err(e) = outcome {
            warn!("Write failed, reverting {} chunk groups: {}", packed.len(), e);
            for p in packed {
                p.abort();
            }
            return Err(e);
        }

        self.apply(packed, options.enqueue);

        if errors.is_empty() {
            Ok(())
        } else {
            for e in &errors {
                warn!("Skipped record: {}", e);
            }
            Err(BufferError::ChunkOverflow(errors))
        }
    }

    fn pack_all(
        &self,
        packed: &mut Vec<Packed>,
        errors: &mut Vec<String>,
        batches: &BTreeMap<Metadata, Vec<Bytes>>,
        format: Option<&dyn Formatter>,
    ) -> Result<()> {
        for (metadata, records) in batches {
            if records.is_empty() {
                continue;
            }
            self.pack_metadata(packed, errors, metadata, records, format)?;
        }
        Ok(())
    }

    fn pack_metadata(
        &self,
        packed: &mut Vec<Packed>,
        errors: &mut Vec<String>,
        metadata: &Metadata,
        records: &[Bytes],
        format: Option<&dyn Formatter>,
    ) -> Result<()> {
        let formatted = format.map(|f| f.format(records));
        loop {
            let Some(guard) = self.lock_staged(metadata, true)? else {
                continue;
            };
            let index = packed.len();
            packed.push(Packed::new(guard));

            let current = &mut packed[index];
            append_slice(&mut current.staged, records, formatted.as_ref())?;
            if !self.chunk_size_over(&*current.staged) {
                return Ok(());
            }
            current.staged.rollback()?;

            if formatted.is_some() && !current.staged.is_empty() {
                // keep the formatted batch whole: queue what is staged and
                // retry with an empty chunk
                let mut enqueued = packed.remove(index);
                let mut state = self.state.lock();
                self.enqueue_locked(&mut state, &mut enqueued.staged);
                let gauges = state.gauges();
                drop(state);
                self.publish(gauges);
                continue;
            }

            return self.pack_step_by_step(&mut packed[index], errors, records, format);
        }
    }

    fn pack_step_by_step(
        &self,
        packed: &mut Packed,
        errors: &mut Vec<String>,
        records: &[Bytes],
        format: Option<&dyn Formatter>,
    ) -> Result<()> {
        let mut splits_count = INITIAL_SPLITS;
        loop {
            match self.pack_attempt(packed, records, format, splits_count)? {
                Attempt::Done(skipped) => {
                    errors.extend(skipped);
                    return Ok(());
                }
                Attempt::Retry(next) => {
                    debug!(
                        "Repacking {} records for {} with {} splits",
                        records.len(),
                        packed.metadata,
                        next
                    );
                    packed.reset()?;
                    splits_count = next;
                }
            }
        }
    }

    fn pack_attempt(
        &self,
        packed: &mut Packed,
        records: &[Bytes],
        format: Option<&dyn Formatter>,
        splits_count: usize,
    ) -> Result<Attempt> {
        let limit = self.config.chunk_limit_size;
        let total = records.len();
        let splits = splits_count.clamp(1, total);
        let slice_len = if total % splits == 0 {
            total / splits
        } else {
            total / (splits - 1)
        };

        let mut skipped = Vec::new();
        for (nth, slice) in records.chunks(slice_len).enumerate() {
            let formatted = format.map(|f| f.format(slice));
            let single = slice.len() == 1;

            if single {
                let determined = match (self.config.compress, &formatted) {
                    (Compression::Lz4, _) => None,
                    (Compression::Text, Some(bulk)) => Some(bulk.len()),
                    (Compression::Text, None) => Some(slice[0].len()),
                };
                if let Some(n) = determined.filter(|n| *n > limit) {
                    skipped.push(format!(
                        "a {} bytes record (nth: {}) is larger than buffer chunk limit size ({})",
                        n, nth, limit
                    ));
                    continue;
                }
            }

            loop {
                let target = packed.target(self)?;
                // earlier slices must survive the rollback below
                if target.pending_size() > 0 || target.pending_bytesize() > 0 {
                    target.commit()?;
                }
                append_slice(target, slice, formatted.as_ref())?;
                let adding = target.pending_bytesize();
                let over = self.chunk_size_over(&**target);
                if over {
                    target.rollback()?;
                }
                let full = self.chunk_size_full(&**target);

                if !over {
                    if full {
                        packed.advance();
                    }
                    break;
                }
                if single {
                    if adding > limit {
                        skipped.push(format!(
                            "concatenated/appended a {} bytes record (nth: {}) is larger than buffer chunk limit size ({})",
                            adding, nth, limit
                        ));
                        break;
                    }
                    packed.advance();
                    continue;
                }
                if full {
                    packed.advance();
                    continue;
                }
                return Ok(Attempt::Retry(splits_count.saturating_mul(10)));
            }
        }
        Ok(Attempt::Done(skipped))
    }

    /// Publish committed chunks: one critical section for the whole write
    fn apply(&self, packed: Vec<Packed>, force: bool) {
        let mut state = self.state.lock();
        if !state.started {
            warn!("Buffer terminated during write, dropping {} chunk groups", packed.len());
            return;
        }

        for Packed {
            metadata,
            mut staged,
            checkpoint,
            sealed,
            unstaged,
            ..
        } in packed
        {
            if state.is_staged(&staged) {
                state.stage_size += staged.bytesize() - checkpoint.bytesize;
                if force || sealed || self.chunk_size_full(&*staged) {
                    self.enqueue_locked(&mut state, &mut staged);
                }
            }

            let last = unstaged.len().saturating_sub(1);
            for (i, mut chunk) in unstaged.into_iter().enumerate() {
                self.place_unstaged(&mut state, &metadata, &mut chunk, i == last, force);
            }
        }

        let gauges = state.gauges();
        drop(state);
        self.publish(gauges);
    }

    fn place_unstaged(
        &self,
        state: &mut BufferState,
        metadata: &Metadata,
        chunk: &mut ChunkGuard,
        last: bool,
        force: bool,
    ) {
        let id = chunk.handle().id();
        if chunk.is_empty() {
            if let Err(e) = chunk.purge() {
                warn!("Failed to purge empty chunk {}: {}", id, e);
            }
            return;
        }

        let bytesize = chunk.bytesize();
        state.track(metadata);
        if last && !force && !state.stage.contains_key(metadata) && !self.chunk_size_full(&**chunk) {
            chunk.core_mut().transition(ChunkState::Staged);
            state.stage.insert(metadata.clone(), chunk.handle().clone());
            state.stage_size += bytesize;
            debug!("Staged chunk {} ({}, {} bytes)", id, metadata, bytesize);
            return;
        }

        chunk.core_mut().transition(ChunkState::Enqueued);
        state.queue.push_back(chunk.handle().clone());
        state.queue_size += bytesize;
        state.increment_queued(metadata);
        if let Some(hook) = chunk.as_enqueue_hook() {
            hook.on_enqueued();
        }
        debug!("Enqueued chunk {} ({}, {} bytes)", id, metadata, bytesize);
    }
}

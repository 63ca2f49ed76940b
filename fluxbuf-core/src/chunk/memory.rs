//! In-memory chunk

use super::{codec, Checkpoint, Chunk, ChunkCore, ChunkState, Compression};
use crate::{BufferError, Metadata, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Chunk keeping its content in a single growable buffer.
///
/// Committed content is the prefix `data[..committed_bytes]`; pending
/// content is everything after it.
#[derive(Debug)]
pub struct MemoryChunk {
    core: ChunkCore,
    data: BytesMut,
    committed_bytes: usize,
    committed_size: usize,
    adding_size: usize,
}

impl MemoryChunk {
    /// Create an empty, unstaged chunk
    pub fn new(metadata: Metadata, compression: Compression) -> Self {
        Self {
            core: ChunkCore::new(metadata, compression),
            data: BytesMut::new(),
            committed_bytes: 0,
            committed_size: 0,
            adding_size: 0,
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.core.state() == ChunkState::Closed {
            return Err(BufferError::Append(format!(
                "chunk {} is closed",
                self.core.id()
            )));
        }
        Ok(())
    }

    fn stage_payload(&mut self, payload: &[u8], records: usize) {
        match self.core.compression() {
            Compression::Text => self.data.put_slice(payload),
            Compression::Lz4 => codec::encode_frame(&mut self.data, payload),
        }
        self.adding_size += records;
    }
}

impl Chunk for MemoryChunk {
    fn core(&self) -> &ChunkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChunkCore {
        &mut self.core
    }

    fn append(&mut self, records: &[Bytes]) -> Result<()> {
        self.ensure_writable()?;
        match self.core.compression() {
            Compression::Text => {
                for record in records {
                    self.data.put_slice(record);
                }
                self.adding_size += records.len();
            }
            Compression::Lz4 => {
                let joined = records.concat();
                self.stage_payload(&joined, records.len());
            }
        }
        Ok(())
    }

    fn concat(&mut self, bulk: &[u8], records: usize) -> Result<()> {
        self.ensure_writable()?;
        self.stage_payload(bulk, records);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.core.state() == ChunkState::Closed {
            return Err(BufferError::InvalidOperation(format!(
                "closed chunk {} cannot be committed",
                self.core.id()
            )));
        }
        self.committed_bytes = self.data.len();
        self.committed_size += self.adding_size;
        self.adding_size = 0;
        self.core.touch();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.data.truncate(self.committed_bytes);
        self.adding_size = 0;
        Ok(())
    }

    fn revert(&mut self, checkpoint: Checkpoint) -> Result<()> {
        if checkpoint.bytesize > self.committed_bytes || checkpoint.size > self.committed_size {
            return Err(BufferError::InvalidOperation(format!(
                "checkpoint {:?} is ahead of chunk {} ({} bytes, {} records)",
                checkpoint,
                self.core.id(),
                self.committed_bytes,
                self.committed_size
            )));
        }
        self.data.truncate(checkpoint.bytesize);
        self.committed_bytes = checkpoint.bytesize;
        self.committed_size = checkpoint.size;
        self.adding_size = 0;
        Ok(())
    }

    fn bytesize(&self) -> usize {
        self.committed_bytes
    }

    fn size(&self) -> usize {
        self.committed_size
    }

    fn pending_bytesize(&self) -> usize {
        self.data.len() - self.committed_bytes
    }

    fn pending_size(&self) -> usize {
        self.adding_size
    }

    fn raw(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data[..self.committed_bytes])
    }

    fn close(&mut self) -> Result<()> {
        self.core.transition(ChunkState::Closed);
        Ok(())
    }

    fn purge(&mut self) -> Result<()> {
        self.data = BytesMut::new();
        self.committed_bytes = 0;
        self.committed_size = 0;
        self.adding_size = 0;
        self.close()
    }
}

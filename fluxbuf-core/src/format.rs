//! Record formatters
//!
//! A formatter turns a slice of records into the bytes a chunk stores.
//! Writes without a formatter store the records concatenated as given.

use bytes::{BufMut, Bytes, BytesMut};

/// Converts a slice of records into chunk payload
pub trait Formatter: Send + Sync {
    fn format(&self, records: &[Bytes]) -> Bytes;
}

impl<F> Formatter for F
where
    F: Fn(&[Bytes]) -> Bytes + Send + Sync,
{
    fn format(&self, records: &[Bytes]) -> Bytes {
        self(records)
    }
}

/// Frames every record with a 4-byte little-endian length prefix
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixed;

impl LengthPrefixed {
    /// Bytes added to every record
    pub const OVERHEAD: usize = 4;

    /// Split a length-prefixed payload back into records
    pub fn decode(payload: &Bytes) -> Option<Vec<Bytes>> {
        let mut records = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let header = payload.get(offset..offset + Self::OVERHEAD)?;
            let len = u32::from_le_bytes(header.try_into().ok()?) as usize;
            let start = offset + Self::OVERHEAD;
            if start + len > payload.len() {
                return None;
            }
            records.push(payload.slice(start..start + len));
            offset = start + len;
        }
        Some(records)
    }
}

impl Formatter for LengthPrefixed {
    fn format(&self, records: &[Bytes]) -> Bytes {
        let total = records.iter().map(|r| r.len() + Self::OVERHEAD).sum();
        let mut buf = BytesMut::with_capacity(total);
        for record in records {
            buf.put_u32_le(record.len() as u32);
            buf.put_slice(record);
        }
        buf.freeze()
    }
}

/// Terminates every record with a newline
#[derive(Debug, Clone, Copy, Default)]
pub struct NewlineDelimited;

impl Formatter for NewlineDelimited {
    fn format(&self, records: &[Bytes]) -> Bytes {
        let total = records.iter().map(|r| r.len() + 1).sum();
        let mut buf = BytesMut::with_capacity(total);
        for record in records {
            buf.put_slice(record);
            buf.put_u8(b'\n');
        }
        buf.freeze()
    }
}

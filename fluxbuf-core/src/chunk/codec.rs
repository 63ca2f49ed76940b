//! LZ4 framing for compressed chunks
//!
//! Frame format:
//! - 4 bytes: frame length (little endian, excluding this field)
//! - N bytes: LZ4 block with prepended uncompressed size

use crate::{BufferError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Append one compressed frame holding `payload` to `dst`
pub(crate) fn encode_frame(dst: &mut BytesMut, payload: &[u8]) {
    let compressed = lz4_flex::compress_prepend_size(payload);
    dst.put_u32_le(compressed.len() as u32);
    dst.put_slice(&compressed);
}

/// Decompress a run of frames back into the original bytes
pub(crate) fn decode_frames(mut src: &[u8]) -> Result<Bytes> {
    let mut out = BytesMut::new();

    while src.has_remaining() {
        if src.remaining() < 4 {
            return Err(BufferError::Compression("truncated frame header".into()));
        }
        let len = src.get_u32_le() as usize;
        if src.remaining() < len {
            return Err(BufferError::Compression(format!(
                "frame of {} bytes truncated to {}",
                len,
                src.remaining()
            )));
        }

        let block = lz4_flex::decompress_size_prepended(&src[..len])
            .map_err(|e| BufferError::Compression(e.to_string()))?;
        out.put_slice(&block);
        src.advance(len);
    }

    Ok(out.freeze())
}

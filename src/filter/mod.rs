//! Byte-stream transforms applied to file content in either direction:
//! BOM handling, line-ending translation, streaming compression, and the
//! transfer-integrity digest.
//!
//! Filters are small push-style state machines so multi-byte sequences that
//! straddle buffer boundaries are handled without ever buffering a whole
//! file.

pub mod bom;
pub mod compress;
pub mod digest;
pub mod line_ending;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

pub use bom::{BomKind, BomReader};
pub use compress::{Deflater, Inflater};
pub use digest::ContentDigest;
pub use line_ending::{LineEnding, LineEndingReader, LineEndingWriter};

/// Chunk size for streamed filter copies. Bounds memory on large files.
pub const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// A push-style byte transform. `push` may buffer partial state; `finish`
/// flushes whatever remains.
pub trait ByteFilter {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()>;
    fn finish(&mut self, out: &mut BytesMut) -> Result<()>;
}

/// Stream `reader` into `writer` through a filter chain, `chunk_size` bytes
/// at a time. Returns the number of bytes written.
pub async fn copy_filtered<R, W>(
    reader: &mut R,
    writer: &mut W,
    filters: &mut [&mut dyn ByteFilter],
    chunk_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut in_buf = vec![0u8; chunk_size];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut in_buf).await?;
        if n == 0 {
            break;
        }
        let out = run_chain(filters, Some(&in_buf[..n]))?;
        if !out.is_empty() {
            writer.write_all(&out).await?;
            written += out.len() as u64;
        }
    }

    let out = run_chain(filters, None)?;
    if !out.is_empty() {
        writer.write_all(&out).await?;
        written += out.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

/// Feed one chunk (or the finish signal) through every filter in order. On
/// finish, each filter's tail output still flows through the filters after
/// it.
fn run_chain(filters: &mut [&mut dyn ByteFilter], input: Option<&[u8]>) -> Result<BytesMut> {
    let mut current = match input {
        Some(bytes) => BytesMut::from(bytes),
        None => BytesMut::new(),
    };
    let finishing = input.is_none();

    for filter in filters.iter_mut() {
        let mut next = BytesMut::new();
        filter.push(&current, &mut next)?;
        if finishing {
            filter.finish(&mut next)?;
        }
        current = next;
    }
    Ok(current)
}

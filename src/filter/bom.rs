//! Byte-order-mark detection.
//!
//! Classification peeks at most 4 bytes and leaves the stream untouched; the
//! signature is only consumed by an explicit `skip_bom`, which is idempotent.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// The five recognized Unicode signatures, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BomKind {
    #[default]
    None,
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

impl BomKind {
    /// The fixed byte signature for this kind. Empty for `None`.
    pub const fn signature(self) -> &'static [u8] {
        match self {
            BomKind::None => &[],
            BomKind::Utf8 => &[0xEF, 0xBB, 0xBF],
            BomKind::Utf16Le => &[0xFF, 0xFE],
            BomKind::Utf16Be => &[0xFE, 0xFF],
            BomKind::Utf32Le => &[0xFF, 0xFE, 0x00, 0x00],
            BomKind::Utf32Be => &[0x00, 0x00, 0xFE, 0xFF],
        }
    }

    /// Classify a stream prefix. Longest signature wins, so UTF-32LE beats
    /// its UTF-16LE prefix.
    pub fn detect(prefix: &[u8]) -> BomKind {
        const ORDERED: [BomKind; 5] = [
            BomKind::Utf32Le,
            BomKind::Utf32Be,
            BomKind::Utf8,
            BomKind::Utf16Le,
            BomKind::Utf16Be,
        ];
        for kind in ORDERED {
            if prefix.starts_with(kind.signature()) {
                return kind;
            }
        }
        BomKind::None
    }
}

/// Byte source wrapper that peeks for a BOM and pushes the peeked bytes back.
pub struct BomReader<R> {
    inner: R,
    pending: BytesMut,
    kind: Option<BomKind>,
    skipped: bool,
}

impl<R: AsyncRead + Unpin> BomReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
            kind: None,
            skipped: false,
        }
    }

    /// Classify the stream head without consuming it.
    pub async fn detect(&mut self) -> Result<BomKind> {
        if let Some(kind) = self.kind {
            return Ok(kind);
        }
        // Peek up to 4 bytes; a short stream classifies on what it has.
        while self.pending.len() < 4 {
            let mut byte = [0u8; 4];
            let n = self.inner.read(&mut byte[..4 - self.pending.len()]).await?;
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&byte[..n]);
        }
        let kind = BomKind::detect(&self.pending);
        self.kind = Some(kind);
        Ok(kind)
    }

    /// Consume the signature, if any. Calling again is a no-op.
    pub async fn skip_bom(&mut self) -> Result<BomKind> {
        let kind = self.detect().await?;
        if !self.skipped {
            self.pending.advance(kind.signature().len());
            self.skipped = true;
        }
        Ok(kind)
    }

    /// Read, serving pushed-back bytes before touching the source.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }
        Ok(self.inner.read(buf).await?)
    }
}

//! Headerless streaming compression for compressed-mode connections.
//!
//! The peer's frames are raw deflate with no zlib/gzip container header or
//! trailer, so both directions run a persistent raw stream (-15 window).
//! Each `push` ends with a sync flush so the receiver can decode a packet
//! boundary without waiting for end-of-stream.

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Result, WireError};
use crate::filter::ByteFilter;

/// Scratch buffer for one (de)compress call.
const SCRATCH_SIZE: usize = 32 * 1024;

fn compress_err(e: impl std::fmt::Display) -> WireError {
    WireError::Compress(e.to_string())
}

/// Compressing half of the filter pair.
pub struct Deflater {
    raw: Compress,
    scratch: Box<[u8]>,
}

impl Deflater {
    pub fn new() -> Self {
        Self {
            // false = raw deflate, no zlib header.
            raw: Compress::new(Compression::default(), false),
            scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
        }
    }
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteFilter for Deflater {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut input = input;
        while !input.is_empty() {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            self.raw
                .compress(input, &mut self.scratch, FlushCompress::None)
                .map_err(compress_err)?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            input = &input[consumed..];
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        // Sync flush: everything fed so far becomes decodable output.
        loop {
            let before_out = self.raw.total_out();
            self.raw
                .compress(&[], &mut self.scratch, FlushCompress::Sync)
                .map_err(compress_err)?;
            let produced = (self.raw.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            if produced < self.scratch.len() {
                break;
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> Result<()> {
        loop {
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .compress(&[], &mut self.scratch, FlushCompress::Finish)
                .map_err(compress_err)?;
            let produced = (self.raw.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            if status == Status::StreamEnd {
                return Ok(());
            }
            if produced == 0 {
                return Err(WireError::Compress(
                    "deflate finish made no progress".to_string(),
                ));
            }
        }
    }
}

/// Decompressing half of the filter pair.
pub struct Inflater {
    raw: Decompress,
    scratch: Box<[u8]>,
    ended: bool,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            // false = raw deflate, no zlib header expected.
            raw: Decompress::new(false),
            scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
            ended: false,
        }
    }

    /// True once the peer terminated its deflate stream.
    pub fn ended(&self) -> bool {
        self.ended
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteFilter for Inflater {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut input = input;
        while !input.is_empty() && !self.ended {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .decompress(input, &mut self.scratch, FlushDecompress::None)
                .map_err(compress_err)?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            input = &input[consumed..];

            if status == Status::StreamEnd {
                self.ended = true;
            } else if consumed == 0 && produced == 0 {
                // Needs more input than this chunk carries.
                break;
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        loop {
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .decompress(&[], &mut self.scratch, FlushDecompress::Finish)
                .map_err(compress_err)?;
            let produced = (self.raw.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            match status {
                Status::StreamEnd => {
                    self.ended = true;
                    return Ok(());
                }
                // A sync-flushed stream the peer never terminated has
                // nothing left to drain.
                Status::BufError => return Ok(()),
                Status::Ok if produced == 0 => return Ok(()),
                Status::Ok => continue,
            }
        }
    }
}

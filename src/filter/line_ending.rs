//! Line-ending translation between the server's canonical single-LF
//! terminator and the client's configured style.
//!
//! Both directions are instances of one explicit match-state machine
//! ([`Matcher`]) that carries a partial terminator match across buffer
//! boundaries and flushes the held bytes verbatim if the match fails.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filter::ByteFilter;

/// Client line-ending style. `Native` resolves per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    Cr,
    CrLf,
    /// Mixed-use workspaces: files may carry either LF or CRLF. Reads leave
    /// LF alone; writes accept both and normalize to LF.
    LfCrLf,
    #[default]
    Native,
}

impl LineEnding {
    /// Resolve `Native` to the platform style.
    pub fn resolved(self) -> LineEnding {
        match self {
            LineEnding::Native => {
                if cfg!(windows) {
                    LineEnding::CrLf
                } else {
                    LineEnding::Lf
                }
            }
            other => other,
        }
    }

    /// The byte sequence written client-side for one server LF.
    pub fn client_terminator(self) -> &'static [u8] {
        match self.resolved() {
            LineEnding::Lf | LineEnding::LfCrLf => b"\n",
            LineEnding::Cr => b"\r",
            LineEnding::CrLf => b"\r\n",
            LineEnding::Native => unreachable!("resolved() never returns Native"),
        }
    }
}

/// Search/replace over a byte stream with partial-match carry.
///
/// Terminators here are at most two bytes, so a failed partial match holds
/// exactly one byte: emit it and re-run the current byte from the start
/// state.
#[derive(Debug)]
struct Matcher {
    search: &'static [u8],
    replace: &'static [u8],
    matched: usize,
}

impl Matcher {
    fn new(search: &'static [u8], replace: &'static [u8]) -> Self {
        debug_assert!(!search.is_empty() && search.len() <= 2);
        Self {
            search,
            replace,
            matched: 0,
        }
    }

    fn identity(&self) -> bool {
        self.search == self.replace
    }

    fn push(&mut self, input: &[u8], out: &mut BytesMut) {
        if self.identity() {
            out.extend_from_slice(input);
            return;
        }
        out.reserve(input.len());
        for &b in input {
            self.step(b, out);
        }
    }

    fn step(&mut self, b: u8, out: &mut BytesMut) {
        loop {
            if b == self.search[self.matched] {
                self.matched += 1;
                if self.matched == self.search.len() {
                    out.extend_from_slice(self.replace);
                    self.matched = 0;
                }
                return;
            }
            if self.matched == 0 {
                out.put_u8(b);
                return;
            }
            // Failed partial match: release the held prefix, retry this byte.
            out.extend_from_slice(&self.search[..self.matched]);
            self.matched = 0;
        }
    }

    fn finish(&mut self, out: &mut BytesMut) {
        if self.matched > 0 {
            out.extend_from_slice(&self.search[..self.matched]);
            self.matched = 0;
        }
    }
}

/// Server-to-client direction: each canonical LF becomes the configured
/// client terminator.
#[derive(Debug)]
pub struct LineEndingReader {
    matcher: Matcher,
}

impl LineEndingReader {
    pub fn new(mode: LineEnding) -> Self {
        Self {
            matcher: Matcher::new(b"\n", mode.client_terminator()),
        }
    }
}

impl ByteFilter for LineEndingReader {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        self.matcher.push(input, out);
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> Result<()> {
        self.matcher.finish(out);
        Ok(())
    }
}

/// Client-to-server direction: the configured client terminator becomes a
/// canonical LF. Bytes that only look like the start of a terminator are
/// carried across chunk boundaries and flushed verbatim if the match fails.
#[derive(Debug)]
pub struct LineEndingWriter {
    matcher: Matcher,
}

impl LineEndingWriter {
    pub fn new(mode: LineEnding) -> Self {
        let matcher = match mode.resolved() {
            LineEnding::Lf => Matcher::new(b"\n", b"\n"),
            LineEnding::Cr => Matcher::new(b"\r", b"\n"),
            // LfCrLf accepts both: CRLF collapses to LF here and a bare LF
            // is already canonical.
            LineEnding::CrLf | LineEnding::LfCrLf => Matcher::new(b"\r\n", b"\n"),
            LineEnding::Native => unreachable!("resolved() never returns Native"),
        };
        Self { matcher }
    }
}

impl ByteFilter for LineEndingWriter {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        self.matcher.push(input, out);
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> Result<()> {
        self.matcher.finish(out);
        Ok(())
    }
}

//! Error types for the wire-protocol core.
//!
//! Transport and protocol failures are fatal to a connection and never
//! retried here; retry policy belongs to the orchestration layer. Server
//! `error`/`warning` results are NOT errors in this taxonomy - they arrive as
//! well-formed packets and are surfaced as structured data (see
//! [`crate::session::ServerMessage`]).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Error, Debug)]
pub enum WireError {
    /// Socket-level I/O failure. Tears the connection down.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Preamble checksum did not validate. Raised before any field of the
    /// packet is decoded.
    #[error("packet checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// An int4 decode was handed a slice of the wrong width.
    #[error("int4 decode requires exactly 4 bytes, got {len}")]
    BadInt4Length { len: usize },

    /// Declared payload length exceeds the packet cap.
    #[error("packet length {length} exceeds maximum {max}")]
    PacketTooLarge { length: u32, max: u32 },

    /// A field inside the payload could not be decoded. Carries enough
    /// context to diagnose a corrupted stream without a wire capture.
    #[error("malformed field in {packet_len}-byte packet{}: {reason}", field_context(.name))]
    MalformedField {
        packet_len: usize,
        name: Option<String>,
        reason: String,
    },

    /// A field value was not valid in the connection's negotiated charset.
    #[error("field {name:?} is not valid {charset}")]
    BadCharset { name: String, charset: &'static str },

    /// The stream-compression filter rejected its input.
    #[error("compression error: {0}")]
    Compress(String),

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// Handler slot table is full. Existing slots are untouched.
    #[error("handler table full (capacity {capacity})")]
    HandlerCapacity { capacity: usize },

    /// Cooperative cancellation was observed.
    #[error("command cancelled")]
    Cancelled,

    /// Transfer-integrity digest disagreement. Distinct from transport and
    /// protocol errors: the bytes arrived intact but are not the bytes the
    /// server digested.
    #[error("content digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Bad or missing connection configuration.
    #[error("config error: {0}")]
    Config(String),
}

fn field_context(name: &Option<String>) -> String {
    match name {
        Some(n) => format!(" (field {n:?})"),
        None => String::new(),
    }
}

impl From<native_tls::Error> for WireError {
    fn from(err: native_tls::Error) -> Self {
        WireError::Tls(err.to_string())
    }
}

impl WireError {
    /// Reconstruct the error so a session can record it while the original
    /// propagates to the caller.
    pub(crate) fn duplicate(&self) -> WireError {
        match self {
            WireError::Transport(e) => {
                WireError::Transport(std::io::Error::new(e.kind(), e.to_string()))
            }
            WireError::ChecksumMismatch { expected, actual } => WireError::ChecksumMismatch {
                expected: *expected,
                actual: *actual,
            },
            WireError::BadInt4Length { len } => WireError::BadInt4Length { len: *len },
            WireError::PacketTooLarge { length, max } => WireError::PacketTooLarge {
                length: *length,
                max: *max,
            },
            WireError::MalformedField {
                packet_len,
                name,
                reason,
            } => WireError::MalformedField {
                packet_len: *packet_len,
                name: name.clone(),
                reason: reason.clone(),
            },
            WireError::BadCharset { name, charset } => WireError::BadCharset {
                name: name.clone(),
                charset,
            },
            WireError::Compress(s) => WireError::Compress(s.clone()),
            WireError::Tls(s) => WireError::Tls(s.clone()),
            WireError::HandlerCapacity { capacity } => WireError::HandlerCapacity {
                capacity: *capacity,
            },
            WireError::Cancelled => WireError::Cancelled,
            WireError::DigestMismatch { expected, actual } => WireError::DigestMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            WireError::Config(s) => WireError::Config(s.clone()),
        }
    }

    /// True for errors that require tearing down the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::Transport(_)
                | WireError::ChecksumMismatch { .. }
                | WireError::BadInt4Length { .. }
                | WireError::PacketTooLarge { .. }
                | WireError::MalformedField { .. }
                | WireError::Compress(_)
                | WireError::Tls(_)
        )
    }
}

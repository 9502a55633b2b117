//! vcwire - wire-protocol core for a legacy version-control client.
//!
//! Everything needed to speak the server's proprietary RPC over TCP or TLS:
//!
//! - [`protocol`]: int4 integers, the preamble checksum, field
//!   serialization (including the server's duplicate-field quirks), and
//!   packet framing.
//! - [`filter`]: the byte-stream transform pipeline file content flows
//!   through - BOM detection, line-ending translation, headerless streaming
//!   compression, and the transfer-integrity digest.
//! - [`session`]: the per-command execution context spanning multi-packet
//!   exchanges, with buffered or streaming result delivery and cooperative
//!   cancellation.
//! - [`transport`]: connections, TLS channel configuration, shared transfer
//!   statistics, and the command dispatch loop.
//!
//! The wire format is fixed by the deployed server fleet; byte-exact
//! compatibility beats cleanliness everywhere the two conflict.

pub mod config;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::ConnectionConfig;
pub use error::{Result, WireError};
pub use filter::{BomKind, BomReader, ContentDigest, LineEnding, LineEndingReader, LineEndingWriter};
pub use protocol::{Charset, CommandArgs, Environment, FieldMap, Packet, ProtocolCaps};
pub use session::{CancelToken, CommandSession, Outcome, ServerMessage, SessionState, Severity};
pub use transport::{Connection, SecureChannelFactory, TlsSettings};

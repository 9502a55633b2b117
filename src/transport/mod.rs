//! Connection transport: framed packet I/O over TCP or TLS, optional
//! whole-stream compressed mode, shared statistics, and the per-command
//! dispatch loop.
//!
//! One connection serves one in-flight command at a time; reads block until
//! a full packet is available. Duplex commands interleave continued reads
//! with result delivery on the same task.

pub mod stats;
pub mod tls;

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ConnectionConfig;
use crate::error::{Result, WireError};
use crate::filter::{ByteFilter, Deflater, Inflater};
use crate::protocol::field::{
    Charset, Environment, FieldDecoder, FieldEncoder, FieldFilter, FieldMap, ProtocolCaps,
    FIELD_FUNC,
};
use crate::protocol::int4::{decode_int4, encode_int4};
use crate::protocol::packet::Packet;
use crate::session::{CommandSession, Outcome};

pub use stats::{StatsSnapshot, TransportStats};
pub use tls::{SecureChannelFactory, TlsSettings, TlsVersion};

/// Byte streams the connection can own: plain TCP, TLS, or an in-memory
/// duplex in tests.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Both directions of the negotiated compressed mode. The peer's frames are
/// headerless raw deflate wrapping the entire packet stream.
struct CompressedMode {
    deflater: Deflater,
    inflater: Inflater,
}

/// Notified once when a fatal error tears the connection down.
pub type ErrorListener = Box<dyn Fn(&WireError) + Send>;

/// A client connection to the server.
pub struct Connection {
    stream: Box<dyn AsyncStream>,
    read_buf: BytesMut,
    encoder: FieldEncoder,
    decoder: FieldDecoder,
    env: Environment,
    compressed: Option<CompressedMode>,
    peer_caps: ProtocolCaps,
    stats: Arc<TransportStats>,
    error_listener: Option<ErrorListener>,
    broken: bool,
}

impl Connection {
    /// Dial the configured server, wrapping the socket through the TLS
    /// factory when the config asks for TLS.
    pub async fn connect(
        config: &ConnectionConfig,
        tls: Option<&SecureChannelFactory>,
    ) -> Result<Connection> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;

        let stream: Box<dyn AsyncStream> = match (&config.tls, tls) {
            (Some(_), Some(factory)) => Box::new(factory.connect(&config.host, tcp).await?),
            (Some(_), None) => {
                return Err(WireError::Config(
                    "tls requested but no channel factory supplied".to_string(),
                ))
            }
            _ => Box::new(tcp),
        };
        tracing::debug!(host = %config.host, port = config.port, tls = config.tls.is_some(), "connected");

        Ok(Self::from_boxed(stream, config.charset, config.environment()))
    }

    /// Wrap an already-established stream.
    pub fn from_stream(
        stream: impl AsyncStream + 'static,
        charset: Charset,
        env: Environment,
    ) -> Connection {
        Self::from_boxed(Box::new(stream), charset, env)
    }

    fn from_boxed(stream: Box<dyn AsyncStream>, charset: Charset, env: Environment) -> Connection {
        Connection {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            encoder: FieldEncoder::new(charset),
            decoder: FieldDecoder::new(charset),
            env,
            compressed: None,
            peer_caps: ProtocolCaps::empty(),
            stats: Arc::new(TransportStats::new()),
            error_listener: None,
            broken: false,
        }
    }

    /// Register a listener invoked when a fatal error tears this connection
    /// down.
    pub fn on_error(&mut self, listener: ErrorListener) {
        self.error_listener = Some(listener);
    }

    /// Shared counters; clone the `Arc` into reporting paths.
    pub fn stats(&self) -> Arc<TransportStats> {
        self.stats.clone()
    }

    /// Capabilities the server advertised, once seen.
    pub fn peer_caps(&self) -> ProtocolCaps {
        self.peer_caps
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Switch the whole stream to compressed mode. Call only at the agreed
    /// point of the compress exchange; from here on every byte in both
    /// directions runs through raw deflate.
    pub fn enable_compression(&mut self) {
        self.compressed = Some(CompressedMode {
            deflater: Deflater::new(),
            inflater: Inflater::new(),
        });
    }

    /// Advertise this client's capabilities. Sent once, before the first
    /// command.
    pub async fn announce(&mut self) -> Result<()> {
        let mut map = FieldMap::new();
        map.insert(
            Some("caps".to_string()),
            Bytes::copy_from_slice(&encode_int4(self.env.caps.bits())),
        );
        map.insert_text("charset", self.encoder.charset().name());
        map.insert_text(FIELD_FUNC, "protocol");
        self.write_packet(&Packet::from_fields(&self.encoder, &map))
            .await
    }

    /// Run one command to its terminal state.
    ///
    /// A fatal error is recorded on the session, marks the connection
    /// broken, and propagates to the caller.
    pub async fn run_command(&mut self, session: &mut CommandSession) -> Result<Outcome> {
        self.run_command_with_filter(session, None).await
    }

    /// Like [`run_command`](Self::run_command), with a caller-supplied field
    /// skip filter applied to every result packet. Reserved protocol fields
    /// stay visible regardless.
    pub async fn run_command_with_filter(
        &mut self,
        session: &mut CommandSession,
        filter: Option<FieldFilter<'_>>,
    ) -> Result<Outcome> {
        if self.broken {
            return Err(WireError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already torn down",
            )));
        }
        match self.drive(session, filter).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if err.is_fatal() {
                    self.broken = true;
                    if let Some(listener) = &self.error_listener {
                        listener(&err);
                    }
                }
                tracing::debug!(func = %session.func(), %err, "command failed");
                session.fail(err.duplicate());
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        session: &mut CommandSession,
        mut filter: Option<FieldFilter<'_>>,
    ) -> Result<Outcome> {
        session.mark_dispatched();
        self.decoder.reset();

        let payload = self.encoder.encode_request(
            session.func(),
            session.args(),
            session.input(),
            &self.env,
            session.ticket(),
        )?;
        self.write_packet(&Packet::from_payload(payload)).await?;
        session.mark_awaiting();

        loop {
            let packet = self.read_packet().await?;
            let fields =
                packet.decode_fields(&mut self.decoder, filter.as_deref_mut())?;

            match fields.func() {
                Some("release") | Some("release2") => {
                    session.complete();
                    break;
                }
                Some("flush1") => self.echo_flush(&fields).await?,
                Some("protocol") => self.record_peer_caps(&fields)?,
                _ => {
                    if !session.deliver(fields) {
                        // Cooperative stop. The server will keep sending for
                        // this command, so the connection cannot be reused.
                        self.broken = true;
                        break;
                    }
                }
            }
        }

        Ok(session.outcome().unwrap_or(Outcome::Ok))
    }

    /// Keepalive: answer `flush1` with `flush2`, echoing the sequence field.
    async fn echo_flush(&mut self, fields: &FieldMap) -> Result<()> {
        let mut reply = FieldMap::new();
        if let Some(seq) = fields.get("fseq") {
            reply.insert(Some("fseq".to_string()), Bytes::copy_from_slice(seq));
        }
        reply.insert_text(FIELD_FUNC, "flush2");
        self.write_packet(&Packet::from_fields(&self.encoder, &reply))
            .await
    }

    fn record_peer_caps(&mut self, fields: &FieldMap) -> Result<()> {
        if let Some(raw) = fields.get("caps") {
            self.peer_caps = ProtocolCaps::from_bits_truncate(decode_int4(raw)?);
            tracing::debug!(caps = ?self.peer_caps, "server capabilities");
        }
        Ok(())
    }

    /// Frame and send one packet, compressing when the mode is on.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let wire = packet.to_wire();
        let bytes = match &mut self.compressed {
            Some(mode) => {
                let mut out = BytesMut::new();
                mode.deflater.push(&wire, &mut out)?;
                out.freeze()
            }
            None => wire,
        };
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.record_sent(bytes.len() as u64);
        Ok(())
    }

    /// Read one packet, blocking until the full frame is available. Socket
    /// reads do not align with frame boundaries, so bytes accumulate (after
    /// inflation in compressed mode) until a frame extracts.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = Packet::try_extract(&mut self.read_buf)? {
                self.stats.record_packet_received(packet.len() as u64);
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(WireError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
            self.stats.record_read(n as u64);

            match &mut self.compressed {
                Some(mode) => mode.inflater.push(&chunk[..n], &mut self.read_buf)?,
                None => self.read_buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}

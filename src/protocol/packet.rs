//! Packet framing - integrity preamble plus field payload.
//!
//! Wire layout:
//!
//! ```text
//! payload length (int4 LE) | checksum (int4 LE) | payload bytes
//! ```
//!
//! The checksum is validated before the declared length is trusted for
//! anything - a mismatch is fatal and nothing of the packet is decoded. A
//! packet is built per read/write and discarded after decode/encode.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, WireError};
use crate::protocol::field::{FieldDecoder, FieldEncoder, FieldMap, FilterAction};
use crate::protocol::int4::{decode_int4, encode_int4, validate_checksum, preamble_checksum};

/// Length + checksum.
pub const PREAMBLE_SIZE: usize = 8;

/// Hard cap on a declared payload length. Prevents OOM from a corrupted or
/// hostile peer even when the checksum happens to validate.
pub const MAX_PACKET_SIZE: u32 = 64 * 1024 * 1024;

/// One wire unit: a validated payload, framed on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Bytes,
}

impl Packet {
    pub fn from_payload(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Frame a field map with the connection's encoder.
    pub fn from_fields(encoder: &FieldEncoder, fields: &FieldMap) -> Self {
        Self {
            payload: encoder.encode_fields(fields),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Decode the payload into an ordered field map.
    pub fn decode_fields(
        &self,
        decoder: &mut FieldDecoder,
        filter: Option<&mut (dyn FnMut(&str, &[u8]) -> FilterAction + '_)>,
    ) -> Result<FieldMap> {
        decoder.decode(&self.payload, filter)
    }

    /// Serialize preamble + payload.
    pub fn to_wire(&self) -> Bytes {
        let length = self.payload.len() as u32;
        let mut buf = BytesMut::with_capacity(PREAMBLE_SIZE + self.payload.len());
        buf.put_slice(&encode_int4(length));
        buf.put_slice(&encode_int4(preamble_checksum(length)));
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Validate a preamble and return the payload length it declares.
    ///
    /// Checksum first; the length is not trusted (not even for the size cap
    /// check) until it validates.
    pub fn parse_preamble(preamble: &[u8; PREAMBLE_SIZE]) -> Result<u32> {
        let length = decode_int4(&preamble[..4])?;
        let received = decode_int4(&preamble[4..])?;
        validate_checksum(length, received)?;
        if length > MAX_PACKET_SIZE {
            return Err(WireError::PacketTooLarge {
                length,
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(length)
    }

    /// Read one packet, blocking until the full frame is available.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        reader.read_exact(&mut preamble).await?;
        let length = Self::parse_preamble(&preamble)?;

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload).await?;
        Ok(Packet {
            payload: Bytes::from(payload),
        })
    }

    /// Write preamble + payload.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_wire()).await?;
        Ok(())
    }

    /// Try to extract one packet from an accumulation buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Used on streams where
    /// socket reads do not align with frame boundaries (compressed mode
    /// inflates into this buffer).
    pub fn try_extract(buf: &mut BytesMut) -> Result<Option<Packet>> {
        if buf.len() < PREAMBLE_SIZE {
            return Ok(None);
        }
        let mut preamble = [0u8; PREAMBLE_SIZE];
        preamble.copy_from_slice(&buf[..PREAMBLE_SIZE]);
        let length = Self::parse_preamble(&preamble)? as usize;

        if buf.len() < PREAMBLE_SIZE + length {
            return Ok(None);
        }
        buf.advance(PREAMBLE_SIZE);
        let payload = buf.split_to(length).freeze();
        Ok(Some(Packet { payload }))
    }
}

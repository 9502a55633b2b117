//! Wire-protocol codec: int4 integers, the preamble checksum, field
//! serialization, and packet framing.

pub mod field;
pub mod int4;
pub mod packet;

pub use field::{
    Charset, CommandArgs, Environment, Field, FieldDecoder, FieldEncoder, FieldFilter, FieldMap,
    FilterAction, ProtocolCaps, FIELD_FUNC, FIELD_FUNC2, FIELD_TICKET, RESERVED_FIELDS,
};
pub use int4::{decode_int4, encode_int4, preamble_checksum, validate_checksum, INT4_SIZE};
pub use packet::{Packet, MAX_PACKET_SIZE, PREAMBLE_SIZE};

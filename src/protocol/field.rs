//! Field sequence codec - the self-describing packet payload format.
//!
//! A payload is an ordered run of fields. On the wire each field is:
//!
//! ```text
//! name bytes | 0x00 | value length (int4 LE) | value bytes | 0x00
//! ```
//!
//! A zero-length name carries positional/raw content. Field names are always
//! ASCII; values are interpreted in the connection's negotiated charset.
//!
//! Duplicate names within one packet are a server quirk that must be
//! preserved, not fixed: every duplicate except `func2` is retained under an
//! index-suffixed name (`status`, `status0`, `status1`, ...) in original
//! order, while `func2` (the proxy relay function) keeps only its first
//! occurrence and drops the rest.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::protocol::int4::{decode_int4, encode_int4, INT4_SIZE};

/// Function name of the command a packet carries.
pub const FIELD_FUNC: &str = "func";

/// Relay function name set by intermediate proxies. The one field whose
/// duplicates are dropped instead of suffixed.
pub const FIELD_FUNC2: &str = "func2";

/// Authentication ticket.
pub const FIELD_TICKET: &str = "ticket";

/// Protocol-critical names that stay visible to the caller no matter what a
/// skip filter says.
pub const RESERVED_FIELDS: [&str; 3] = [FIELD_FUNC, FIELD_FUNC2, FIELD_TICKET];

/// Value encoding negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    #[default]
    Ascii,
    Utf8,
}

impl Charset {
    pub fn name(self) -> &'static str {
        match self {
            Charset::Ascii => "ascii",
            Charset::Utf8 => "utf-8",
        }
    }

    /// Decode a field value as text in this charset.
    pub fn decode_value(self, field: &str, bytes: &[u8]) -> Result<String> {
        match self {
            Charset::Ascii => {
                if !bytes.is_ascii() {
                    return Err(WireError::BadCharset {
                        name: field.to_string(),
                        charset: self.name(),
                    });
                }
                // ASCII is valid UTF-8.
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadCharset {
                name: field.to_string(),
                charset: self.name(),
            }),
        }
    }

    /// Encode text for the wire, rejecting characters the charset cannot carry.
    pub fn encode_value(self, field: &str, text: &str) -> Result<Bytes> {
        if self == Charset::Ascii && !text.is_ascii() {
            return Err(WireError::BadCharset {
                name: field.to_string(),
                charset: self.name(),
            });
        }
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }
}

bitflags::bitflags! {
    /// Client capabilities advertised in the connection handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtocolCaps: u32 {
        /// Results arrive as tagged field maps rather than message text.
        const TAGGED = 1 << 0;
        /// Client understands multi-packet duplex commands.
        const DUPLEX = 1 << 1;
        /// Client can negotiate compressed mode.
        const COMPRESS = 1 << 2;
        /// Values are UTF-8 rather than ASCII.
        const UNICODE = 1 << 3;
        /// Client tolerates proxy relay bookkeeping (`func2`).
        const RELAY = 1 << 4;
    }
}

/// One decoded field. `name == None` is positional/raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Option<String>,
    pub value: Bytes,
}

/// Ordered field sequence with the duplicate-name policy applied at insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<Field>,
    // Base name -> next duplicate suffix. Presence means the bare name is taken.
    dup_counts: HashMap<String, u32>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, applying the duplicate policy.
    ///
    /// Returns `false` only for a dropped `func2` duplicate.
    pub fn insert(&mut self, name: Option<String>, value: Bytes) -> bool {
        let Some(name) = name else {
            self.entries.push(Field { name: None, value });
            return true;
        };

        if name == FIELD_FUNC2 && self.dup_counts.contains_key(FIELD_FUNC2) {
            return false;
        }
        let stored = match self.dup_counts.entry(name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(0);
                name
            }
            Entry::Occupied(mut slot) => {
                let count = slot.get_mut();
                let suffixed = format!("{name}{count}");
                *count += 1;
                suffixed
            }
        };

        self.entries.push(Field {
            name: Some(stored),
            value,
        });
        true
    }

    pub fn insert_text(&mut self, name: &str, value: &str) -> bool {
        self.insert(
            Some(name.to_string()),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    }

    /// First field stored under exactly this name.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|f| f.name.as_deref() == Some(name))
            .map(|f| f.value.as_ref())
    }

    /// Field value decoded as text in the given charset.
    pub fn get_text(&self, name: &str, charset: Charset) -> Option<Result<String>> {
        self.get(name).map(|v| charset.decode_value(name, v))
    }

    /// The command function name, if present. Always ASCII.
    pub fn func(&self) -> Option<&str> {
        self.get(FIELD_FUNC).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a skip filter wants done with one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Keep,
    Skip,
    /// Skip this field and suppress every later non-reserved field in the
    /// packet without consulting the filter again, until the decoder is
    /// reset.
    SkipRest,
}

/// Caller-supplied per-field skip filter.
pub type FieldFilter<'a> = &'a mut dyn FnMut(&str, &[u8]) -> FilterAction;

/// Payload decoder. Holds the negotiated charset and the sticky
/// skip-subsequent state, so one decoder lives as long as its connection.
#[derive(Debug)]
pub struct FieldDecoder {
    charset: Charset,
    skip_rest: bool,
}

impl FieldDecoder {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            skip_rest: false,
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Clear the skip-subsequent latch.
    pub fn reset(&mut self) {
        self.skip_rest = false;
    }

    /// Decode a payload into an ordered field map, consuming the buffer
    /// exactly.
    pub fn decode(
        &mut self,
        payload: &[u8],
        mut filter: Option<&mut (dyn FnMut(&str, &[u8]) -> FilterAction + '_)>,
    ) -> Result<FieldMap> {
        let packet_len = payload.len();
        let mut map = FieldMap::new();
        let mut pos = 0usize;

        while pos < payload.len() {
            let rest = &payload[pos..];
            let name_end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
                WireError::MalformedField {
                    packet_len,
                    name: None,
                    reason: "unterminated field name".to_string(),
                }
            })?;
            let name_bytes = &rest[..name_end];
            if !name_bytes.is_ascii() {
                return Err(WireError::MalformedField {
                    packet_len,
                    name: None,
                    reason: "non-ascii field name".to_string(),
                });
            }
            let name = if name_bytes.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(name_bytes).into_owned())
            };
            pos += name_end + 1;

            let len_end = pos + INT4_SIZE;
            if len_end > payload.len() {
                return Err(WireError::MalformedField {
                    packet_len,
                    name,
                    reason: "truncated value length".to_string(),
                });
            }
            let value_len = decode_int4(&payload[pos..len_end])? as usize;
            pos = len_end;

            // Value plus its trailing NUL.
            if pos + value_len + 1 > payload.len() {
                return Err(WireError::MalformedField {
                    packet_len,
                    name,
                    reason: format!("value length {value_len} overruns payload"),
                });
            }
            let value = Bytes::copy_from_slice(&payload[pos..pos + value_len]);
            if payload[pos + value_len] != 0 {
                return Err(WireError::MalformedField {
                    packet_len,
                    name,
                    reason: "missing value terminator".to_string(),
                });
            }
            pos += value_len + 1;

            if self.keep_field(name.as_deref(), &value, &mut filter) {
                map.insert(name, value);
            }
        }

        Ok(map)
    }

    fn keep_field(
        &mut self,
        name: Option<&str>,
        value: &[u8],
        filter: &mut Option<&mut (dyn FnMut(&str, &[u8]) -> FilterAction + '_)>,
    ) -> bool {
        // Positional content is never filterable.
        let Some(name) = name else { return true };

        // The allow-list always wins over the filter.
        if RESERVED_FIELDS.contains(&name) {
            return true;
        }
        if self.skip_rest {
            return false;
        }
        match filter.as_mut().map(|f| f(name, value)) {
            None | Some(FilterAction::Keep) => true,
            Some(FilterAction::Skip) => false,
            Some(FilterAction::SkipRest) => {
                self.skip_rest = true;
                false
            }
        }
    }
}

/// Command arguments: positional (anonymous fields) or named.
#[derive(Debug, Clone)]
pub enum CommandArgs {
    Positional(Vec<String>),
    Named(Vec<(String, String)>),
}

impl CommandArgs {
    pub fn none() -> Self {
        CommandArgs::Positional(Vec::new())
    }
}

/// Environment metadata sent with every command.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub host: String,
    pub user: String,
    pub client: String,
    pub cwd: String,
    pub caps: ProtocolCaps,
}

/// Payload encoder - the inverse of [`FieldDecoder`].
#[derive(Debug, Clone, Copy)]
pub struct FieldEncoder {
    charset: Charset,
}

impl FieldEncoder {
    pub fn new(charset: Charset) -> Self {
        Self { charset }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Serialize a field map to payload bytes, order preserved.
    pub fn encode_fields(&self, map: &FieldMap) -> Bytes {
        let mut buf = BytesMut::new();
        for field in map.iter() {
            if let Some(name) = &field.name {
                buf.put_slice(name.as_bytes());
            }
            buf.put_u8(0);
            buf.put_slice(&encode_int4(field.value.len() as u32));
            buf.put_slice(&field.value);
            buf.put_u8(0);
        }
        buf.freeze()
    }

    /// Build the field sequence for one command request.
    ///
    /// Environment first, then arguments, then input payload and ticket, with
    /// `func` last - the server dispatches on the final function field.
    pub fn encode_request(
        &self,
        func: &str,
        args: &CommandArgs,
        input: Option<&[u8]>,
        env: &Environment,
        ticket: Option<&str>,
    ) -> Result<Bytes> {
        let mut map = FieldMap::new();

        map.insert(Some("host".into()), self.charset.encode_value("host", &env.host)?);
        map.insert(Some("user".into()), self.charset.encode_value("user", &env.user)?);
        map.insert(Some("client".into()), self.charset.encode_value("client", &env.client)?);
        map.insert(Some("cwd".into()), self.charset.encode_value("cwd", &env.cwd)?);
        map.insert(
            Some("caps".into()),
            Bytes::copy_from_slice(&encode_int4(env.caps.bits())),
        );

        match args {
            CommandArgs::Positional(values) => {
                for v in values {
                    map.insert(None, self.charset.encode_value("arg", v)?);
                }
            }
            CommandArgs::Named(pairs) => {
                for (k, v) in pairs {
                    map.insert(Some(k.clone()), self.charset.encode_value(k, v)?);
                }
            }
        }

        if let Some(data) = input {
            map.insert(Some("data".into()), Bytes::copy_from_slice(data));
        }
        if let Some(ticket) = ticket {
            map.insert(
                Some(FIELD_TICKET.into()),
                self.charset.encode_value(FIELD_TICKET, ticket)?,
            );
        }
        map.insert(Some(FIELD_FUNC.into()), self.charset.encode_value(FIELD_FUNC, func)?);

        Ok(self.encode_fields(&map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &[u8]) -> FieldMap {
        FieldDecoder::new(Charset::Ascii).decode(payload, None).unwrap()
    }

    fn payload_of(fields: &[(Option<&str>, &[u8])]) -> Bytes {
        let mut map = FieldMap::new();
        for (name, value) in fields {
            map.insert(name.map(String::from), Bytes::copy_from_slice(value));
        }
        FieldEncoder::new(Charset::Ascii).encode_fields(&map)
    }

    #[test]
    fn test_encode_decode_roundtrip_preserves_bytes_and_order() {
        let payload = payload_of(&[
            (Some("depotFile"), b"//depot/main/a.c"),
            (None, b"raw positional content"),
            (Some("rev"), b"42"),
        ]);

        let map = decode(&payload);
        assert_eq!(map.len(), 3);
        let names: Vec<_> = map.iter().map(|f| f.name.clone()).collect();
        assert_eq!(
            names,
            vec![Some("depotFile".to_string()), None, Some("rev".to_string())]
        );

        let reencoded = FieldEncoder::new(Charset::Ascii).encode_fields(&map);
        assert_eq!(reencoded, payload);
    }

    #[test]
    fn test_duplicate_names_get_index_suffixes_in_order() {
        let payload = payload_of(&[
            (Some("status"), b"one".as_ref()),
            (Some("status"), b"two"),
            (Some("status"), b"three"),
        ]);
        let map = decode(&payload);

        let names: Vec<_> = map.iter().map(|f| f.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["status", "status0", "status1"]);
        assert_eq!(map.get("status"), Some(b"one".as_ref()));
        assert_eq!(map.get("status0"), Some(b"two".as_ref()));
        assert_eq!(map.get("status1"), Some(b"three".as_ref()));
    }

    // Server quirk regression: func2 keeps its first occurrence only.
    #[test]
    fn test_relay_function_duplicates_dropped_first_retained() {
        let payload = payload_of(&[
            (Some("func2"), b"client-Message".as_ref()),
            (Some("func2"), b"client-Other"),
            (Some("status"), b"ok"),
        ]);
        let map = decode(&payload);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("func2"), Some(b"client-Message".as_ref()));
        assert!(map.get("func20").is_none());
    }

    #[test]
    fn test_filter_skips_fields_but_not_reserved_names() {
        let payload = payload_of(&[
            (Some("noise"), b"x".as_ref()),
            (Some("func"), b"client-Ack"),
            (Some("keep"), b"y"),
        ]);

        let mut decoder = FieldDecoder::new(Charset::Ascii);
        let mut filter = |name: &str, _value: &[u8]| {
            if name == "noise" {
                FilterAction::Skip
            } else {
                FilterAction::Keep
            }
        };
        let map = decoder.decode(&payload, Some(&mut filter)).unwrap();

        assert!(map.get("noise").is_none());
        assert_eq!(map.func(), Some("client-Ack"));
        assert_eq!(map.get("keep"), Some(b"y".as_ref()));
    }

    #[test]
    fn test_skip_rest_latches_until_reset() {
        let payload = payload_of(&[
            (Some("first"), b"1".as_ref()),
            (Some("second"), b"2"),
            (Some("func"), b"client-Ack"),
            (Some("third"), b"3"),
        ]);

        let mut decoder = FieldDecoder::new(Charset::Ascii);
        let mut calls = 0;
        let mut filter = |_name: &str, _value: &[u8]| {
            calls += 1;
            FilterAction::SkipRest
        };
        let map = decoder.decode(&payload, Some(&mut filter)).unwrap();

        // Filter ran once; everything non-reserved after it was suppressed.
        assert_eq!(calls, 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.func(), Some("client-Ack"));

        // Latch persists across packets until reset.
        let map = decoder.decode(&payload, None).unwrap();
        assert_eq!(map.len(), 1);

        decoder.reset();
        let map = decoder.decode(&payload, None).unwrap();
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_truncated_value_reports_field_name() {
        let mut payload = payload_of(&[(Some("depotFile"), b"//depot/a".as_ref())]).to_vec();
        payload.truncate(payload.len() - 4);

        let err = FieldDecoder::new(Charset::Ascii)
            .decode(&payload, None)
            .unwrap_err();
        match err {
            WireError::MalformedField { name, .. } => {
                assert_eq!(name.as_deref(), Some("depotFile"));
            }
            other => panic!("expected MalformedField, got {other:?}"),
        }
    }

    #[test]
    fn test_ascii_charset_rejects_multibyte_value() {
        let err = Charset::Ascii.encode_value("user", "bjørn").unwrap_err();
        assert!(matches!(err, WireError::BadCharset { .. }));
        assert!(Charset::Utf8.encode_value("user", "bjørn").is_ok());
    }

    #[test]
    fn test_charset_selects_value_decoding() {
        let mut map = FieldMap::new();
        map.insert(
            Some("user".to_string()),
            Bytes::copy_from_slice("bjørn".as_bytes()),
        );

        let text = map.get_text("user", Charset::Utf8).unwrap().unwrap();
        assert_eq!(text, "bjørn");
        assert!(map.get_text("user", Charset::Ascii).unwrap().is_err());
        assert!(map.get_text("missing", Charset::Utf8).is_none());
    }

    #[test]
    fn test_request_ends_with_func_field() {
        let env = Environment {
            host: "wkst01".into(),
            user: "alice".into(),
            client: "alice-main".into(),
            cwd: "/home/alice/src".into(),
            caps: ProtocolCaps::TAGGED | ProtocolCaps::DUPLEX,
        };
        let payload = FieldEncoder::new(Charset::Ascii)
            .encode_request(
                "sync",
                &CommandArgs::Positional(vec!["//depot/main/...".into()]),
                None,
                &env,
                Some("ABCDEF0123"),
            )
            .unwrap();

        let map = decode(&payload);
        assert_eq!(map.func(), Some("sync"));
        assert_eq!(
            map.iter().last().unwrap().name.as_deref(),
            Some(FIELD_FUNC),
            "server dispatches on the final field"
        );
        assert_eq!(map.get("ticket"), Some(b"ABCDEF0123".as_ref()));
        // Positional arg rides as an anonymous field.
        assert!(map.iter().any(|f| f.name.is_none() && f.value.as_ref() == b"//depot/main/..."));
    }
}

/**
 * STUN attribute codecs and the registry that maps attribute ids and names
 * onto them. The packet codec treats every attribute as an opaque TLV and
 * defers the value representation to the codec found here.
 */
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::OnceLock;

use serde::Serialize;

use super::defs::{AddressFamily, StunAddress};
use super::error_reason;
use crate::error::StunError;

/*
   Comprehension-required range (0x0000-0x7FFF):
     0x0001: MAPPED-ADDRESS
     0x0002: RESPONSE-ADDRESS      (RFC 3489)
     0x0003: CHANGE-REQUEST        (RFC 3489)
     0x0004: SOURCE-ADDRESS        (RFC 3489)
     0x0005: CHANGED-ADDRESS       (RFC 3489)
     0x0006: USERNAME
     0x0007: PASSWORD              (RFC 3489)
     0x0008: MESSAGE-INTEGRITY
     0x0009: ERROR-CODE
     0x000A: UNKNOWN-ATTRIBUTES
     0x000B: REFLECTED-FROM        (RFC 3489)
     0x0014: REALM
     0x0015: NONCE
     0x0020: XOR-MAPPED-ADDRESS
     0x0024: PRIORITY              (ICE)
     0x0025: USE-CANDIDATE         (ICE)

   Comprehension-optional range (0x8000-0xFFFF)
     0x8022: SOFTWARE
     0x8023: ALTERNATE-SERVER
     0x8028: FINGERPRINT
     0x8029: ICE-CONTROLLED        (ICE)
     0x802A: ICE-CONTROLLING       (ICE)
*/

// Attribute Types
pub mod attribute_type {
    pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
    pub const ATTR_RESPONSE_ADDRESS: u16 = 0x0002;
    pub const ATTR_CHANGE_REQUEST: u16 = 0x0003;
    pub const ATTR_SOURCE_ADDRESS: u16 = 0x0004;
    pub const ATTR_CHANGED_ADDRESS: u16 = 0x0005;
    pub const ATTR_USERNAME: u16 = 0x0006;
    pub const ATTR_PASSWORD: u16 = 0x0007;

    /// Must be the last attribute before FINGERPRINT. HMAC-SHA1 of everything before it.
    pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ATTR_ERROR_CODE: u16 = 0x0009;
    pub const ATTR_UNKNOWN_ATTRIBUTES: u16 = 0x000A;
    pub const ATTR_REFLECTED_FROM: u16 = 0x000B;
    pub const ATTR_REALM: u16 = 0x0014;
    pub const ATTR_NONCE: u16 = 0x0015;
    pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const ATTR_PRIORITY: u16 = 0x0024;
    pub const ATTR_USE_CANDIDATE: u16 = 0x0025;
    pub const ATTR_SOFTWARE: u16 = 0x8022;
    pub const ATTR_ALTERNATE_SERVER: u16 = 0x8023;

    /// CRC-32 of the message XOR'd with 0x5354554E. Always the last attribute.
    pub const ATTR_FINGERPRINT: u16 = 0x8028;
    pub const ATTR_ICE_CONTROLLED: u16 = 0x8029;
    pub const ATTR_ICE_CONTROLLING: u16 = 0x802A;
}

use attribute_type::*;

/// Byte used to pad variable length values up to a 4-byte boundary.
const PADDING_BYTE: u8 = 0x20;

/**
 * Decoded attribute value. Which variant an attribute holds is decided by
 * the codec registered for its id.
 */
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Address(StunAddress),
    Bytes(Vec<u8>),
    ErrorCode { code: u16, reason: String },
    UnknownAttributes(Vec<u16>),
    Uint32(u32),
    /// 64-bit value as [high word, low word]
    Uint64([u32; 2]),
    /// Attributes with an empty value (USE-CANDIDATE)
    Flag,
}

impl AttributeValue {
    pub fn as_address(&self) -> Option<&StunAddress> {
        match self {
            AttributeValue::Address(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttributeValue::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttributeValue::Uint64([hi, lo]) => Some(((*hi as u64) << 32) | *lo as u64),
            _ => None,
        }
    }
}

pub type DecodeFn = fn(&[u8], usize, usize, &[u32; 4]) -> Option<AttributeValue>;
pub type EncodeFn =
    fn(&mut Cursor<&mut [u8]>, u16, &AttributeValue, &[u32; 4]) -> Result<usize, StunError>;

/**
 * A codec for a single attribute.
 *
 * `decode` receives the whole message buffer, the offset and length of the
 * value, and the transaction id. `encode` writes the complete TLV (header,
 * value and padding) at the cursor position and returns the bytes written.
 */
#[derive(Clone, Copy)]
pub struct AttributeCodec {
    pub name: &'static str,
    pub id: u16,
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

impl std::fmt::Debug for AttributeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeCodec")
            .field("name", &self.name)
            .field("id", &format_args!("0x{:04x}", self.id))
            .finish()
    }
}

/// Attribute lookup key, either the numeric id or the registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKey<'a> {
    Id(u16),
    Name(&'a str),
}

impl From<u16> for AttributeKey<'_> {
    fn from(id: u16) -> Self {
        AttributeKey::Id(id)
    }
}

impl<'a> From<&'a str> for AttributeKey<'a> {
    fn from(name: &'a str) -> Self {
        AttributeKey::Name(name)
    }
}

/**
 * Table of attribute codecs, addressable by id and by (case-sensitive) name.
 */
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    by_id: HashMap<u16, AttributeCodec>,
    by_name: HashMap<&'static str, u16>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Registry pre-populated with every codec this crate knows about.
     */
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (name, id) in [
            ("MAPPED_ADDRESS", ATTR_MAPPED_ADDRESS),
            ("RESPONSE_ADDRESS", ATTR_RESPONSE_ADDRESS),
            ("SOURCE_ADDRESS", ATTR_SOURCE_ADDRESS),
            ("CHANGED_ADDRESS", ATTR_CHANGED_ADDRESS),
            ("REFLECTED_FROM", ATTR_REFLECTED_FROM),
            ("ALTERNATE_SERVER", ATTR_ALTERNATE_SERVER),
        ] {
            registry.register(AttributeCodec {
                name,
                id,
                decode: decode_address,
                encode: encode_address,
            });
        }

        registry.register(AttributeCodec {
            name: "XOR_MAPPED_ADDRESS",
            id: ATTR_XOR_MAPPED_ADDRESS,
            decode: decode_xor_address,
            encode: encode_xor_address,
        });

        for (name, id) in [
            ("USERNAME", ATTR_USERNAME),
            ("PASSWORD", ATTR_PASSWORD),
            ("MESSAGE_INTEGRITY", ATTR_MESSAGE_INTEGRITY),
            ("REALM", ATTR_REALM),
            ("NONCE", ATTR_NONCE),
            ("SOFTWARE", ATTR_SOFTWARE),
        ] {
            registry.register(AttributeCodec {
                name,
                id,
                decode: decode_bytes,
                encode: encode_bytes,
            });
        }

        registry.register(AttributeCodec {
            name: "ERROR_CODE",
            id: ATTR_ERROR_CODE,
            decode: decode_error_code,
            encode: encode_error_code,
        });

        registry.register(AttributeCodec {
            name: "UNKNOWN_ATTRIBUTES",
            id: ATTR_UNKNOWN_ATTRIBUTES,
            decode: decode_unknown_attributes,
            encode: encode_unknown_attributes,
        });

        for (name, id) in [
            ("CHANGE_REQUEST", ATTR_CHANGE_REQUEST),
            ("PRIORITY", ATTR_PRIORITY),
            ("FINGERPRINT", ATTR_FINGERPRINT),
        ] {
            registry.register(AttributeCodec {
                name,
                id,
                decode: decode_u32,
                encode: encode_u32,
            });
        }

        for (name, id) in [
            ("ICE_CONTROLLED", ATTR_ICE_CONTROLLED),
            ("ICE_CONTROLLING", ATTR_ICE_CONTROLLING),
        ] {
            registry.register(AttributeCodec {
                name,
                id,
                decode: decode_u64,
                encode: encode_u64,
            });
        }

        registry.register(AttributeCodec {
            name: "USE_CANDIDATE",
            id: ATTR_USE_CANDIDATE,
            decode: decode_flag,
            encode: encode_flag,
        });

        registry
    }

    /**
     * Store a codec under both its id and its name. Registering the same id
     * or name again replaces the previous entry.
     */
    pub fn register(&mut self, codec: AttributeCodec) {
        self.by_name.insert(codec.name, codec.id);
        self.by_id.insert(codec.id, codec);
    }

    pub fn lookup<'a>(&self, key: impl Into<AttributeKey<'a>>) -> Option<&AttributeCodec> {
        match key.into() {
            AttributeKey::Id(id) => self.by_id.get(&id),
            AttributeKey::Name(name) => self.by_name.get(name).and_then(|id| self.by_id.get(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

static REGISTRY: OnceLock<AttributeRegistry> = OnceLock::new();

/**
 * The process-wide codec table. Built on first use and never mutated.
 */
pub fn registry() -> &'static AttributeRegistry {
    REGISTRY.get_or_init(AttributeRegistry::with_builtin)
}

// write the 4-byte TLV header
fn write_header(cursor: &mut Cursor<&mut [u8]>, id: u16, length: usize) -> Result<(), StunError> {
    cursor.write_all(&id.to_be_bytes())?;
    cursor.write_all(&(length as u16).to_be_bytes())?;
    Ok(())
}

// pad a value of `length` bytes up to the next 4-byte boundary, returns the padding size
fn write_padding(cursor: &mut Cursor<&mut [u8]>, length: usize) -> Result<usize, StunError> {
    let padding = (4 - length % 4) % 4;
    if padding > 0 {
        cursor.write_all(&[PADDING_BYTE; 4][..padding])?;
    }
    Ok(padding)
}

fn value_slice(buffer: &[u8], offset: usize, length: usize) -> Option<&[u8]> {
    buffer.get(offset..offset.checked_add(length)?)
}

fn decode_address(
    buffer: &[u8],
    offset: usize,
    length: usize,
    _tid: &[u32; 4],
) -> Option<AttributeValue> {
    let value = value_slice(buffer, offset, length)?;
    StunAddress::read_from(value, None).map(AttributeValue::Address)
}

fn decode_xor_address(
    buffer: &[u8],
    offset: usize,
    length: usize,
    tid: &[u32; 4],
) -> Option<AttributeValue> {
    let value = value_slice(buffer, offset, length)?;
    StunAddress::read_from(value, Some(tid)).map(AttributeValue::Address)
}

fn write_address(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    xor: Option<&[u32; 4]>,
) -> Result<usize, StunError> {
    let addr = value.as_address().ok_or(StunError::InvalidValue {
        attribute: "address",
        reason: "expected an address",
    })?;
    if addr.family != AddressFamily::of(&addr.address) {
        return Err(StunError::InvalidValue {
            attribute: "address",
            reason: "family does not match the address",
        });
    }
    let length = addr.family.value_length() as usize;
    write_header(cursor, id, length)?;
    addr.write_to(cursor, xor)?;
    Ok(4 + length)
}

fn encode_address(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    write_address(cursor, id, value, None)
}

fn encode_xor_address(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    tid: &[u32; 4],
) -> Result<usize, StunError> {
    write_address(cursor, id, value, Some(tid))
}

fn decode_bytes(
    buffer: &[u8],
    offset: usize,
    length: usize,
    _tid: &[u32; 4],
) -> Option<AttributeValue> {
    value_slice(buffer, offset, length).map(|v| AttributeValue::Bytes(v.to_vec()))
}

fn encode_bytes(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    let bytes = value.as_bytes().ok_or(StunError::InvalidValue {
        attribute: "byte-string",
        reason: "expected raw bytes",
    })?;
    write_header(cursor, id, bytes.len())?;
    cursor.write_all(bytes)?;
    let padding = write_padding(cursor, bytes.len())?;
    Ok(4 + bytes.len() + padding)
}

fn decode_error_code(
    buffer: &[u8],
    offset: usize,
    length: usize,
    _tid: &[u32; 4],
) -> Option<AttributeValue> {
    let value = value_slice(buffer, offset, length)?;
    if value.len() < 4 {
        return None;
    }
    let code = (value[2] & 0x07) as u16 * 100 + value[3] as u16;
    let reason = String::from_utf8_lossy(&value[4..]).to_string();
    Some(AttributeValue::ErrorCode { code, reason })
}

fn encode_error_code(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    let (code, reason) = match value {
        AttributeValue::ErrorCode { code, reason } => (*code, reason.as_str()),
        _ => {
            return Err(StunError::InvalidValue {
                attribute: "ERROR_CODE",
                reason: "expected code and reason",
            })
        }
    };
    let reason = if reason.is_empty() {
        error_reason(code)
    } else {
        reason
    };
    let reason_bytes = reason.as_bytes();
    let length = 4 + reason_bytes.len();

    write_header(cursor, id, length)?;
    cursor.write_all(&[0, 0, ((code / 100) & 0x07) as u8, (code % 100) as u8])?;
    cursor.write_all(reason_bytes)?;
    let padding = write_padding(cursor, length)?;
    Ok(4 + length + padding)
}

fn decode_unknown_attributes(
    buffer: &[u8],
    offset: usize,
    length: usize,
    _tid: &[u32; 4],
) -> Option<AttributeValue> {
    let value = value_slice(buffer, offset, length)?;
    let ids = value
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    Some(AttributeValue::UnknownAttributes(ids))
}

fn encode_unknown_attributes(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    let ids = match value {
        AttributeValue::UnknownAttributes(ids) => ids,
        _ => {
            return Err(StunError::InvalidValue {
                attribute: "UNKNOWN_ATTRIBUTES",
                reason: "expected a list of attribute ids",
            })
        }
    };
    let mut words = ids.clone();
    // RFC 3489 aligns an odd list by repeating the last id
    if words.len() % 2 == 1 {
        words.push(words[words.len() - 1]);
    }
    let length = words.len() * 2;
    write_header(cursor, id, length)?;
    for word in &words {
        cursor.write_all(&word.to_be_bytes())?;
    }
    Ok(4 + length)
}

fn decode_u32(buffer: &[u8], offset: usize, length: usize, _tid: &[u32; 4]) -> Option<AttributeValue> {
    let value = value_slice(buffer, offset, length)?;
    if value.len() != 4 {
        return None;
    }
    Some(AttributeValue::Uint32(u32::from_be_bytes([
        value[0], value[1], value[2], value[3],
    ])))
}

fn encode_u32(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    let v = value.as_u32().ok_or(StunError::InvalidValue {
        attribute: "uint32",
        reason: "expected a 32-bit number",
    })?;
    write_header(cursor, id, 4)?;
    cursor.write_all(&v.to_be_bytes())?;
    Ok(8)
}

fn decode_u64(buffer: &[u8], offset: usize, length: usize, _tid: &[u32; 4]) -> Option<AttributeValue> {
    let value = value_slice(buffer, offset, length)?;
    if value.len() != 8 {
        return None;
    }
    let hi = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
    let lo = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
    Some(AttributeValue::Uint64([hi, lo]))
}

fn encode_u64(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    let [hi, lo] = match value {
        AttributeValue::Uint64(words) => *words,
        _ => {
            return Err(StunError::InvalidValue {
                attribute: "uint64",
                reason: "expected [hi, lo] words",
            })
        }
    };
    write_header(cursor, id, 8)?;
    cursor.write_all(&hi.to_be_bytes())?;
    cursor.write_all(&lo.to_be_bytes())?;
    Ok(12)
}

fn decode_flag(_buffer: &[u8], _offset: usize, _length: usize, _tid: &[u32; 4]) -> Option<AttributeValue> {
    Some(AttributeValue::Flag)
}

fn encode_flag(
    cursor: &mut Cursor<&mut [u8]>,
    id: u16,
    _value: &AttributeValue,
    _tid: &[u32; 4],
) -> Result<usize, StunError> {
    write_header(cursor, id, 0)?;
    Ok(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::MAGIC_COOKIE;

    const TID: [u32; 4] = [MAGIC_COOKIE, 1, 2, 3];

    fn encode(id: u16, value: &AttributeValue) -> Vec<u8> {
        let codec = registry().lookup(id).unwrap();
        let mut buffer = [0u8; 64];
        let mut cursor = Cursor::new(&mut buffer[..]);
        let written = (codec.encode)(&mut cursor, id, value, &TID).unwrap();
        assert_eq!(written as u64, cursor.position());
        buffer[..written].to_vec()
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let reg = registry();
        assert_eq!(reg.lookup(ATTR_XOR_MAPPED_ADDRESS).unwrap().name, "XOR_MAPPED_ADDRESS");
        assert_eq!(reg.lookup("FINGERPRINT").unwrap().id, ATTR_FINGERPRINT);
        assert!(reg.lookup("fingerprint").is_none());
        assert!(reg.lookup(0x7777u16).is_none());
        assert_eq!(reg.len(), 21);
    }

    #[test]
    fn test_register_overwrites() {
        let mut reg = AttributeRegistry::with_builtin();
        let before = reg.len();
        reg.register(AttributeCodec {
            name: "SOFTWARE",
            id: ATTR_SOFTWARE,
            decode: decode_flag,
            encode: encode_flag,
        });
        assert_eq!(reg.len(), before);
        let codec = reg.lookup("SOFTWARE").unwrap();
        assert_eq!((codec.decode)(&[0u8; 0], 0, 0, &TID), Some(AttributeValue::Flag));
    }

    #[test]
    fn test_bytes_padded_with_spaces() {
        let bytes = encode(ATTR_USERNAME, &AttributeValue::Bytes(b"evtj:h6vY".to_vec()));
        assert_eq!(
            bytes,
            vec![
                0x00, 0x06, 0x00, 0x09, 0x65, 0x76, 0x74, 0x6a, 0x3a, 0x68, 0x36, 0x76, 0x59,
                0x20, 0x20, 0x20
            ]
        );
    }

    #[test]
    fn test_error_code_default_reason() {
        let bytes = encode(
            ATTR_ERROR_CODE,
            &AttributeValue::ErrorCode {
                code: 401,
                reason: String::new(),
            },
        );
        assert_eq!(&bytes[..8], &[0x00, 0x09, 0x00, 0x10, 0, 0, 4, 1]);
        assert_eq!(&bytes[8..20], b"Unauthorized");

        let decoded = decode_error_code(&bytes, 4, 16, &TID).unwrap();
        assert_eq!(
            decoded,
            AttributeValue::ErrorCode {
                code: 401,
                reason: "Unauthorized".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_attributes_odd_count() {
        let bytes = encode(
            ATTR_UNKNOWN_ATTRIBUTES,
            &AttributeValue::UnknownAttributes(vec![0x0031, 0x0032, 0x0033]),
        );
        assert_eq!(
            bytes,
            vec![0x00, 0x0a, 0x00, 0x08, 0x00, 0x31, 0x00, 0x32, 0x00, 0x33, 0x00, 0x33]
        );
    }

    #[test]
    fn test_ice_controlling_and_use_candidate() {
        let bytes = encode(
            ATTR_ICE_CONTROLLING,
            &AttributeValue::Uint64([0x932ff9b1, 0x51263b36]),
        );
        assert_eq!(
            bytes,
            vec![0x80, 0x2a, 0x00, 0x08, 0x93, 0x2f, 0xf9, 0xb1, 0x51, 0x26, 0x3b, 0x36]
        );
        let decoded = decode_u64(&bytes, 4, 8, &TID).unwrap();
        assert_eq!(decoded.as_u64(), Some(0x932f_f9b1_5126_3b36));

        let flag = encode(ATTR_USE_CANDIDATE, &AttributeValue::Flag);
        assert_eq!(flag, vec![0x00, 0x25, 0x00, 0x00]);
    }

    #[test]
    fn test_value_shape_mismatch() {
        let codec = registry().lookup(ATTR_PRIORITY).unwrap();
        let mut buffer = [0u8; 16];
        let mut cursor = Cursor::new(&mut buffer[..]);
        let result = (codec.encode)(&mut cursor, ATTR_PRIORITY, &AttributeValue::Flag, &TID);
        assert!(matches!(result, Err(StunError::InvalidValue { .. })));
    }

    #[test]
    fn test_address_family_must_match() {
        let codec = registry().lookup(ATTR_XOR_MAPPED_ADDRESS).unwrap();
        let mut mismatched = StunAddress::new("[2001:db8::1]:3478".parse().unwrap());
        mismatched.family = AddressFamily::IPv4;

        let mut buffer = [0u8; 64];
        let mut cursor = Cursor::new(&mut buffer[..]);
        let result = (codec.encode)(
            &mut cursor,
            ATTR_XOR_MAPPED_ADDRESS,
            &AttributeValue::Address(mismatched),
            &TID,
        );
        assert!(matches!(result, Err(StunError::InvalidValue { attribute: "address", .. })));
        assert_eq!(cursor.position(), 0);

        let bytes = encode(
            ATTR_MAPPED_ADDRESS,
            &AttributeValue::Address(StunAddress::new("[2001:db8::1]:3478".parse().unwrap())),
        );
        assert_eq!(&bytes[..4], &[0x00, 0x01, 0x00, 0x14]);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn test_decode_out_of_bounds() {
        assert_eq!(decode_bytes(&[1, 2, 3], 2, 4, &TID), None);
        assert_eq!(decode_u32(&[1, 2, 3, 4, 5], 0, 5, &TID), None);
    }
}

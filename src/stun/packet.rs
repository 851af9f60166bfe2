/**
 * STUN message encoder/decoder
 * See RFC 5389 Section 6 for the message layout
 * https://datatracker.ietf.org/doc/html/rfc5389#section-6
 *
 */
use std::io::{Cursor, Write};

use rand::Rng;

use super::attributes::{attribute_type::*, registry, AttributeKey, AttributeValue};
use super::integrity::{fingerprint, hmac_sha1};
use super::{MessageClass, StunMessageType, FINGERPRINT_XOR, HEADER_LENGTH, MAGIC_COOKIE, PACKET_SIZE};
use crate::error::StunError;

/**
 * A STUN message: type, 128-bit transaction id (magic cookie included) and
 * the decoded attributes in wire order.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunPacket {
    pub message_type: StunMessageType,
    transaction_id: [u32; 4],
    attributes: Vec<(u16, AttributeValue)>,
}

impl StunPacket {
    /**
     * Create an empty message with a fresh transaction id.
     *
     * @param message_type The message type
     * @param rfc5389 When true the first word is the magic cookie, otherwise
     *                the message is a legacy RFC 3489 one with a random first word
     */
    pub fn new(message_type: StunMessageType, rfc5389: bool) -> Self {
        Self::with_transaction_id(message_type, generate_transaction_id(rfc5389))
    }

    pub fn with_transaction_id(message_type: StunMessageType, transaction_id: [u32; 4]) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn is_rfc5389(&self) -> bool {
        self.transaction_id[0] == MAGIC_COOKIE
    }

    pub fn is_rfc3489(&self) -> bool {
        !self.is_rfc5389()
    }

    pub fn message_class(&self) -> MessageClass {
        self.message_type.class()
    }

    /// The 96-bit transaction id that follows the magic cookie.
    pub fn transaction_id(&self) -> [u32; 3] {
        [
            self.transaction_id[1],
            self.transaction_id[2],
            self.transaction_id[3],
        ]
    }

    /// All four words, including the magic cookie (or the legacy random word).
    pub fn raw_transaction_id(&self) -> &[u32; 4] {
        &self.transaction_id
    }

    /**
     * Set an attribute, replacing any previous value for the same id.
     * Fails when the key names an attribute that is not registered.
     */
    pub fn add_attribute<'a>(
        &mut self,
        key: impl Into<AttributeKey<'a>>,
        value: AttributeValue,
    ) -> Result<(), StunError> {
        let id = resolve_id(key.into())?;
        self.set_attribute(id, value);
        Ok(())
    }

    pub fn get_attribute<'a>(&self, key: impl Into<AttributeKey<'a>>) -> Option<&AttributeValue> {
        let id = resolve_id(key.into()).ok()?;
        self.attributes
            .iter()
            .find(|(attr, _)| *attr == id)
            .map(|(_, value)| value)
    }

    pub fn remove_attribute<'a>(
        &mut self,
        key: impl Into<AttributeKey<'a>>,
    ) -> Option<AttributeValue> {
        let id = resolve_id(key.into()).ok()?;
        let index = self.attributes.iter().position(|(attr, _)| *attr == id)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (u16, &AttributeValue)> {
        self.attributes.iter().map(|(id, value)| (*id, value))
    }

    fn set_attribute(&mut self, id: u16, value: AttributeValue) {
        match self.attributes.iter_mut().find(|(attr, _)| *attr == id) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((id, value)),
        }
    }

    /**
     * Serialize the message.
     *
     * MESSAGE-INTEGRITY and FINGERPRINT values stored on the packet are never
     * written; they are computed here when requested. Both are only added to
     * RFC 5389 messages.
     *
     * @param password Key for MESSAGE-INTEGRITY (the short-term password, or
     *                 the long-term credential hash). Empty means no integrity.
     * @param add_fingerprint Append a FINGERPRINT attribute
     * @return The encoded message
     */
    pub fn encode(&self, password: Option<&[u8]>, add_fingerprint: bool) -> Result<Vec<u8>, StunError> {
        let mut buffer = [0u8; PACKET_SIZE];
        let mut msg_length = self.write_header(&mut buffer)?;

        for (id, value) in &self.attributes {
            if *id == ATTR_MESSAGE_INTEGRITY || *id == ATTR_FINGERPRINT {
                continue;
            }
            let Some(codec) = registry().lookup(*id) else {
                continue;
            };
            let mut cursor = Cursor::new(&mut buffer[..]);
            cursor.set_position(msg_length as u64);
            msg_length += (codec.encode)(&mut cursor, *id, value, &self.transaction_id)
                .map_err(overflow)?;
            write_length(&mut buffer, msg_length);
        }

        if self.is_rfc5389() {
            if let Some(key) = password.filter(|p| !p.is_empty()) {
                let offset = msg_length;
                msg_length = reserve_attribute(&mut buffer, offset, ATTR_MESSAGE_INTEGRITY, 20)?;
                write_length(&mut buffer, msg_length);
                let digest = hmac_sha1(key, &buffer[..offset]).ok_or(StunError::InvalidValue {
                    attribute: "MESSAGE_INTEGRITY",
                    reason: "unusable key",
                })?;
                buffer[offset + 4..offset + 24].copy_from_slice(&digest);
            }

            if add_fingerprint {
                let offset = msg_length;
                msg_length = reserve_attribute(&mut buffer, offset, ATTR_FINGERPRINT, 4)?;
                write_length(&mut buffer, msg_length);
                let crc = fingerprint(&buffer[..offset]) ^ FINGERPRINT_XOR;
                buffer[offset + 4..offset + 8].copy_from_slice(&crc.to_be_bytes());
            }
        }

        Ok(buffer[..msg_length].to_vec())
    }

    // write type, zero length and the transaction id (20 bytes)
    fn write_header(&self, buffer: &mut [u8]) -> Result<usize, StunError> {
        let mut cursor = Cursor::new(buffer);
        cursor.write_all(&self.message_type.as_u16().to_be_bytes())?;
        cursor.write_all(&0u16.to_be_bytes())?;
        for word in &self.transaction_id {
            cursor.write_all(&word.to_be_bytes())?;
        }
        Ok(cursor.position() as usize)
    }
}

fn resolve_id(key: AttributeKey<'_>) -> Result<u16, StunError> {
    match key {
        AttributeKey::Id(id) => Ok(id),
        AttributeKey::Name(name) => registry()
            .lookup(name)
            .map(|codec| codec.id)
            .ok_or_else(|| StunError::UnknownAttribute(name.to_string())),
    }
}

fn overflow(e: StunError) -> StunError {
    match e {
        StunError::Io(_) => StunError::BufferOverflow(PACKET_SIZE),
        other => other,
    }
}

// rewrite the header length field from the running message length
fn write_length(buffer: &mut [u8], msg_length: usize) {
    let length = (msg_length - HEADER_LENGTH) as u16;
    buffer[2..4].copy_from_slice(&length.to_be_bytes());
}

// write a TLV header followed by a zeroed value, returns the new message length
fn reserve_attribute(
    buffer: &mut [u8],
    offset: usize,
    id: u16,
    length: usize,
) -> Result<usize, StunError> {
    let end = offset + 4 + length;
    if end > buffer.len() {
        return Err(StunError::BufferOverflow(PACKET_SIZE));
    }
    buffer[offset..offset + 2].copy_from_slice(&id.to_be_bytes());
    buffer[offset + 2..offset + 4].copy_from_slice(&(length as u16).to_be_bytes());
    buffer[offset + 4..end].fill(0);
    Ok(end)
}

/**
 * Offset of the next attribute header given the current header offset and
 * the declared value length. Values are padded to a 4-byte boundary.
 */
pub(crate) fn next_attribute_offset(offset: usize, length: usize) -> usize {
    if length % 4 == 0 {
        offset + 4 + length
    } else {
        offset + length + (8 - length % 4)
    }
}

/**
 * Decode a STUN message.
 *
 * Returns `None` when the buffer is not a well formed STUN message: wrong
 * size, header length not a multiple of 4, header length disagreeing with
 * the buffer, or an unknown message type. Unknown attributes are skipped.
 */
pub fn decode(buffer: &[u8]) -> Option<StunPacket> {
    if buffer.len() < HEADER_LENGTH || buffer.len() > PACKET_SIZE {
        return None;
    }

    let first = read_u32(buffer, 0)?;
    let length = (first & 0xffff) as usize;
    if length % 4 != 0 || length + HEADER_LENGTH != buffer.len() {
        return None;
    }
    let message_type = StunMessageType::from_u16(((first >> 16) & 0x0fff) as u16)?;

    let transaction_id = [
        read_u32(buffer, 4)?,
        read_u32(buffer, 8)?,
        read_u32(buffer, 12)?,
        read_u32(buffer, 16)?,
    ];

    let mut packet = StunPacket::with_transaction_id(message_type, transaction_id);
    let mut offset = HEADER_LENGTH;
    while offset + 4 <= buffer.len() {
        let tlv = read_u32(buffer, offset)?;
        let id = (tlv >> 16) as u16;
        let value_length = (tlv & 0xffff) as usize;

        if let Some(codec) = registry().lookup(id) {
            if let Some(value) = (codec.decode)(buffer, offset + 4, value_length, &transaction_id) {
                packet.set_attribute(id, value);
            }
        }
        offset = next_attribute_offset(offset, value_length);
    }

    Some(packet)
}

fn read_u32(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/**
 * Generate a transaction id. The random words are limited to 24 significant
 * bits.
 */
pub fn generate_transaction_id(rfc5389: bool) -> [u32; 4] {
    let mut rng = rand::thread_rng();
    let mut word = || rng.gen_range(0..0x00ff_ffff);
    let first = if rfc5389 { MAGIC_COOKIE } else { word() };
    [first, word(), word(), word()]
}

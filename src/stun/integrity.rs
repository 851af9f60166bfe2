/**
 * MESSAGE-INTEGRITY (HMAC-SHA1) and FINGERPRINT (CRC-32) helpers
 * See RFC 5389 Sections 15.4 and 15.5
 * https://datatracker.ietf.org/doc/html/rfc5389#section-15.4
 */
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use super::attributes::attribute_type::{ATTR_FINGERPRINT, ATTR_MESSAGE_INTEGRITY};
use super::packet::{next_attribute_offset, StunPacket};
use super::{FINGERPRINT_XOR, HEADER_LENGTH};

type HmacSha1 = Hmac<Sha1>;

const INTEGRITY_LENGTH: usize = 20;

pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> Option<[u8; 20]> {
    let mut mac = HmacSha1::new_from_slice(key).ok()?;
    mac.update(data);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Some(digest)
}

/**
 * Plain CRC-32 of a byte range. The caller XORs in 0x5354554E.
 */
pub(crate) fn fingerprint(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/**
 * Long-term credential key, MD5(username ":" realm ":" password).
 */
pub fn generate_credential_hash(username: &str, realm: &str, password: &str) -> [u8; 16] {
    let mut digest = Md5::new();
    digest.update(username.as_bytes());
    digest.update(b":");
    digest.update(realm.as_bytes());
    digest.update(b":");
    digest.update(password.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest.finalize());
    key
}

// offset of the MESSAGE-INTEGRITY attribute header, if present and well formed
fn find_message_integrity(message: &[u8]) -> Option<usize> {
    let mut offset = HEADER_LENGTH;
    while offset + 4 <= message.len() {
        let id = u16::from_be_bytes([message[offset], message[offset + 1]]);
        let length = u16::from_be_bytes([message[offset + 2], message[offset + 3]]) as usize;
        if id == ATTR_MESSAGE_INTEGRITY {
            if length != INTEGRITY_LENGTH || offset + 4 + length > message.len() {
                return None;
            }
            return Some(offset);
        }
        offset = next_attribute_offset(offset, length);
    }
    None
}

/**
 * Check the MESSAGE-INTEGRITY attribute of a received message.
 *
 * The HMAC is recomputed over the message as it was when the sender signed
 * it: truncated right after MESSAGE-INTEGRITY, with the header length
 * rewritten accordingly, hashing everything before the attribute.
 *
 * @param packet The decoded message
 * @param raw_message The bytes the packet was decoded from
 * @param password Short-term password or long-term credential hash
 * @return true if the stored HMAC matches
 */
pub fn validate_message_integrity(packet: &StunPacket, raw_message: &[u8], password: &[u8]) -> bool {
    if password.is_empty() || raw_message.len() < HEADER_LENGTH {
        return false;
    }
    let declared = u16::from_be_bytes([raw_message[2], raw_message[3]]) as usize;
    if declared + HEADER_LENGTH != raw_message.len() {
        return false;
    }

    let stored = match packet
        .get_attribute(ATTR_MESSAGE_INTEGRITY)
        .and_then(|v| v.as_bytes())
    {
        Some(bytes) if bytes.len() == INTEGRITY_LENGTH => bytes,
        _ => return false,
    };

    let Some(offset) = find_message_integrity(raw_message) else {
        return false;
    };

    let end = offset + 4 + INTEGRITY_LENGTH;
    let mut signed = raw_message[..end].to_vec();
    let length = (end - HEADER_LENGTH) as u16;
    signed[2..4].copy_from_slice(&length.to_be_bytes());

    match hmac_sha1(password, &signed[..offset]) {
        Some(digest) => digest[..] == *stored,
        None => false,
    }
}

/**
 * Check the FINGERPRINT attribute, which must be the last 8 bytes of the
 * message.
 */
pub fn validate_finger_print(packet: &StunPacket, raw_message: &[u8]) -> bool {
    let Some(stored) = packet.get_attribute(ATTR_FINGERPRINT).and_then(|v| v.as_u32()) else {
        return false;
    };
    if raw_message.len() < HEADER_LENGTH + 8 {
        return false;
    }
    let crc = fingerprint(&raw_message[..raw_message.len() - 8]);
    stored ^ FINGERPRINT_XOR == crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::attributes::attribute_type::{ATTR_NONCE, ATTR_REALM, ATTR_USERNAME};
    use crate::stun::attributes::AttributeValue;
    use crate::stun::{decode, StunMessageType};

    // RFC 5769 section 2.4, request with long-term authentication
    const RFC5769_LONG_TERM: [u8; 116] = [
        0x00, 0x01, 0x00, 0x60, 0x21, 0x12, 0xa4, 0x42, 0x78, 0xad, 0x34, 0x33, 0xc6, 0xad,
        0x72, 0xc0, 0x29, 0xda, 0x41, 0x2e, 0x00, 0x06, 0x00, 0x12, 0xe3, 0x83, 0x9e, 0xe3,
        0x83, 0x88, 0xe3, 0x83, 0xaa, 0xe3, 0x83, 0x83, 0xe3, 0x82, 0xaf, 0xe3, 0x82, 0xb9,
        0x00, 0x00, 0x00, 0x15, 0x00, 0x1c, 0x66, 0x2f, 0x2f, 0x34, 0x39, 0x39, 0x6b, 0x39,
        0x35, 0x34, 0x64, 0x36, 0x4f, 0x4c, 0x33, 0x34, 0x6f, 0x4c, 0x39, 0x46, 0x53, 0x54,
        0x76, 0x79, 0x36, 0x34, 0x73, 0x41, 0x00, 0x14, 0x00, 0x0b, 0x65, 0x78, 0x61, 0x6d,
        0x70, 0x6c, 0x65, 0x2e, 0x6f, 0x72, 0x67, 0x00, 0x00, 0x08, 0x00, 0x14, 0xf6, 0x70,
        0x24, 0x65, 0x6d, 0xd6, 0x4a, 0x3e, 0x02, 0xb8, 0xe0, 0x71, 0x2e, 0x85, 0xc9, 0xa2,
        0x8c, 0xa8, 0x96, 0x66,
    ];

    const USERNAME: &str = "\u{30DE}\u{30C8}\u{30EA}\u{30C3}\u{30AF}\u{30B9}";

    #[test]
    fn test_long_term_credentials() {
        let packet = decode(&RFC5769_LONG_TERM).unwrap();
        assert_eq!(
            packet.get_attribute(ATTR_USERNAME).unwrap().as_bytes().unwrap(),
            USERNAME.as_bytes()
        );
        assert_eq!(
            packet.get_attribute(ATTR_REALM).unwrap().as_bytes().unwrap(),
            b"example.org"
        );
        assert_eq!(
            packet.get_attribute(ATTR_NONCE).unwrap().as_bytes().unwrap(),
            b"f//499k954d6OL34oL9FSTvy64sA"
        );

        let key = generate_credential_hash(USERNAME, "example.org", "TheMatrIX");
        assert!(validate_message_integrity(&packet, &RFC5769_LONG_TERM, &key));
        assert!(!validate_message_integrity(&packet, &RFC5769_LONG_TERM, b"TheMatrIX"));
        // no FINGERPRINT in this vector
        assert!(!validate_finger_print(&packet, &RFC5769_LONG_TERM));

        // padding is re-emitted as 0x20, so only the layout is reproduced; the
        // re-signed message still validates with the same key
        let encoded = packet.encode(Some(&key[..]), false).unwrap();
        assert_eq!(encoded.len(), RFC5769_LONG_TERM.len());
        assert_eq!(&encoded[..20], &RFC5769_LONG_TERM[..20]);
        let reencoded = decode(&encoded).unwrap();
        assert!(validate_message_integrity(&reencoded, &encoded, &key));
    }

    #[test]
    fn test_credential_hash() {
        let key = generate_credential_hash("user", "realm", "pass");
        // md5("user:realm:pass")
        assert_eq!(hex::encode(key), "8493fbc53ba582fb4c044c456bdc40eb");
    }

    #[test]
    fn test_integrity_preconditions() {
        let mut packet = crate::stun::StunPacket::new(StunMessageType::BindingRequest, true);
        packet
            .add_attribute(ATTR_USERNAME, AttributeValue::Bytes(b"user".to_vec()))
            .unwrap();
        let encoded = packet.encode(Some(b"pw".as_slice()), false).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert!(validate_message_integrity(&decoded, &encoded, b"pw"));
        // empty password
        assert!(!validate_message_integrity(&decoded, &encoded, b""));
        // raw message does not match its header length
        assert!(!validate_message_integrity(&decoded, &encoded[..encoded.len() - 4], b"pw"));
        // packet without MESSAGE-INTEGRITY
        assert!(!validate_message_integrity(&packet, &encoded, b"pw"));
    }

    #[test]
    fn test_integrity_with_trailing_fingerprint() {
        let mut packet = crate::stun::StunPacket::new(StunMessageType::BindingResponse, true);
        packet
            .add_attribute("SOFTWARE", AttributeValue::Bytes(b"abc".to_vec()))
            .unwrap();
        let encoded = packet.encode(Some(b"pw".as_slice()), true).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert!(validate_message_integrity(&decoded, &encoded, b"pw"));
        assert!(validate_finger_print(&decoded, &encoded));
    }
}

/**
 * The STUN-specific module, this file contains the constants and message
 * type definitions shared by the attribute codecs and the packet codec.
 */

pub mod attributes;
pub mod defs;
pub mod integrity;
pub mod packet;

pub use attributes::{registry, AttributeCodec, AttributeKey, AttributeRegistry, AttributeValue};
pub use defs::{AddressFamily, StunAddress};
pub use integrity::{generate_credential_hash, validate_finger_print, validate_message_integrity};
pub use packet::{decode, StunPacket};

/// length of a STUN header is 20 bytes
pub const HEADER_LENGTH: usize = 20;

/// Fixed first word of every RFC 5389 transaction id. Legacy RFC 3489
/// messages carry a random word here instead.
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// Largest message the codec will read or write.
pub const PACKET_SIZE: usize = 1280;

/// XOR'd into the CRC-32 of the message to produce FINGERPRINT ("STUN" in ASCII).
pub const FINGERPRINT_XOR: u32 = 0x5354554e;

/// Class of a STUN message, carried in bits 4 and 8 of the message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    Response,
    Error,
}

/**
 * Every message type the codec accepts. Anything else fails to decode.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StunMessageType {
    BindingRequest = 0x0001,
    BindingIndication = 0x0011,
    BindingResponse = 0x0101,
    BindingErrorResponse = 0x0111,

    SharedSecretRequest = 0x0002,
    SharedSecretResponse = 0x0102,
    SharedSecretErrorResponse = 0x0112,

    AllocateRequest = 0x0003,
    AllocateResponse = 0x0103,
    AllocateErrorResponse = 0x0113,

    RefreshRequest = 0x0004,
    RefreshResponse = 0x0104,
    RefreshErrorResponse = 0x0114,

    SendIndication = 0x0016,
    DataIndication = 0x0017,

    CreatePermissionRequest = 0x0008,
    CreatePermissionResponse = 0x0108,
    CreatePermissionErrorResponse = 0x0118,

    ChannelBindRequest = 0x0009,
    ChannelBindResponse = 0x0109,
    ChannelBindErrorResponse = 0x0119,
}

impl StunMessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use StunMessageType::*;
        let t = match value {
            0x0001 => BindingRequest,
            0x0011 => BindingIndication,
            0x0101 => BindingResponse,
            0x0111 => BindingErrorResponse,
            0x0002 => SharedSecretRequest,
            0x0102 => SharedSecretResponse,
            0x0112 => SharedSecretErrorResponse,
            0x0003 => AllocateRequest,
            0x0103 => AllocateResponse,
            0x0113 => AllocateErrorResponse,
            0x0004 => RefreshRequest,
            0x0104 => RefreshResponse,
            0x0114 => RefreshErrorResponse,
            0x0016 => SendIndication,
            0x0017 => DataIndication,
            0x0008 => CreatePermissionRequest,
            0x0108 => CreatePermissionResponse,
            0x0118 => CreatePermissionErrorResponse,
            0x0009 => ChannelBindRequest,
            0x0109 => ChannelBindResponse,
            0x0119 => ChannelBindErrorResponse,
            _ => return None,
        };
        Some(t)
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /**
     * Classify the message using the two class bits (mask 0x0110).
     */
    pub fn class(self) -> MessageClass {
        match self.as_u16() & 0x0110 {
            0x0000 => MessageClass::Request,
            0x0010 => MessageClass::Indication,
            0x0100 => MessageClass::Response,
            _ => MessageClass::Error,
        }
    }

    pub fn is_request(self) -> bool {
        self.class() == MessageClass::Request
    }

    pub fn is_indication(self) -> bool {
        self.class() == MessageClass::Indication
    }

    pub fn is_response(self) -> bool {
        self.class() == MessageClass::Response
    }

    pub fn is_error(self) -> bool {
        self.class() == MessageClass::Error
    }
}

/**
 * Default reason phrase for an ERROR-CODE value, used when the caller
 * leaves the reason empty.
 */
pub fn error_reason(code: u16) -> &'static str {
    match code {
        300 => "Try Alternate",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        420 => "Unknown Attribute",
        437 => "Allocation Mismatch",
        438 => "Stale Nonce",
        441 => "Wrong Credentials",
        442 => "Unsupported Transport Protocol",
        443 => "Peer Address Family Mismatch",
        486 => "Allocation Quota Reached",
        487 => "Role Conflict",
        500 => "Server Error",
        508 => "Insufficient Capacity",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_class() {
        assert_eq!(StunMessageType::BindingRequest.class(), MessageClass::Request);
        assert_eq!(StunMessageType::BindingIndication.class(), MessageClass::Indication);
        assert_eq!(StunMessageType::BindingResponse.class(), MessageClass::Response);
        assert_eq!(StunMessageType::BindingErrorResponse.class(), MessageClass::Error);
        assert_eq!(StunMessageType::SendIndication.class(), MessageClass::Indication);
        assert!(StunMessageType::AllocateErrorResponse.is_error());
        assert!(StunMessageType::ChannelBindRequest.is_request());
    }

    #[test]
    fn test_from_u16() {
        assert_eq!(StunMessageType::from_u16(0x0101), Some(StunMessageType::BindingResponse));
        assert_eq!(StunMessageType::from_u16(0x0fff), None);
        assert_eq!(StunMessageType::from_u16(0x0000), None);
    }

    #[test]
    fn test_error_reason() {
        assert_eq!(error_reason(401), "Unauthorized");
        assert_eq!(error_reason(487), "Role Conflict");
        assert_eq!(error_reason(699), "");
    }
}

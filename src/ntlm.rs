//! Classification of NTLM messages carried in an `Authorization` header.
//!
//! Only the fixed header of the message is inspected. The blob itself is forwarded
//! to the identity provider untouched.

use base64::{Engine, prelude::BASE64_STANDARD};

use crate::error::BridgeError;

/// Scheme prefix expected on the `Authorization` header.
pub const NTLM_PREFIX: &str = "NTLM ";

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const HEADER_LEN: usize = 12;

/// Message type field of an NTLM message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Negotiate,
    Challenge,
    Authenticate,
    /// Any other value found at offset 8, kept as-is.
    Other(u32),
}

impl From<u32> for MessageType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Negotiate,
            2 => Self::Challenge,
            3 => Self::Authenticate,
            other => Self::Other(other),
        }
    }
}

impl MessageType {
    /// Numeric value as it appears on the wire.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Negotiate => 1,
            Self::Challenge => 2,
            Self::Authenticate => 3,
            Self::Other(other) => other,
        }
    }
}

/// A decoded NTLM blob together with its classified type.
///
/// `message_type` is `None` when the buffer does not start with the NTLMSSP signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmMessage {
    bytes: Vec<u8>,
    message_type: Option<MessageType>,
}

impl NtlmMessage {
    /// Decodes and classifies the value of an `Authorization` header.
    pub fn from_authorization(header: &str) -> Result<Self, BridgeError> {
        let encoded = header.strip_prefix(NTLM_PREFIX).ok_or(BridgeError::InvalidHeader)?;
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|_| BridgeError::MalformedMessage)?;
        Self::from_bytes(bytes)
    }

    /// Classifies an already decoded buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BridgeError> {
        if bytes.len() < HEADER_LEN {
            return Err(BridgeError::MalformedMessage);
        }
        let message_type = message_type(&bytes);
        Ok(Self { bytes, message_type })
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type
    }

    pub fn is_ntlm(&self) -> bool {
        self.message_type.is_some()
    }

    pub fn is_negotiate(&self) -> bool {
        self.message_type == Some(MessageType::Negotiate)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reads the message type of `buffer`, or `None` if the signature is missing.
pub fn message_type(buffer: &[u8]) -> Option<MessageType> {
    let signature = buffer.get(..SIGNATURE.len())?;
    if signature != SIGNATURE {
        return None;
    }
    let field: [u8; 4] = buffer.get(8..HEADER_LEN)?.try_into().ok()?;
    Some(MessageType::from(u32::from_le_bytes(field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(bytes: &[u8]) -> String {
        format!("{NTLM_PREFIX}{}", BASE64_STANDARD.encode(bytes))
    }

    fn message_of_type(kind: u32) -> Vec<u8> {
        let mut bytes = SIGNATURE.to_vec();
        bytes.extend_from_slice(&kind.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 20]);
        bytes
    }

    #[test]
    fn classifies_known_types() {
        for (kind, expected) in [
            (1, MessageType::Negotiate),
            (2, MessageType::Challenge),
            (3, MessageType::Authenticate),
        ] {
            let message = NtlmMessage::from_authorization(&header_for(&message_of_type(kind))).unwrap();
            assert_eq!(message.message_type(), Some(expected));
            assert_eq!(expected.as_u32(), kind);
        }
    }

    #[test]
    fn unknown_type_is_passed_through() {
        let message = NtlmMessage::from_authorization(&header_for(&message_of_type(7))).unwrap();
        assert_eq!(message.message_type(), Some(MessageType::Other(7)));
        assert!(!message.is_negotiate());
    }

    #[test]
    fn reads_type_little_endian() {
        let bytes = message_of_type(0x0102_0304);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(message_type(&bytes), Some(MessageType::Other(0x0102_0304)));
    }

    #[test]
    fn missing_signature_is_not_ntlm() {
        let mut bytes = message_of_type(1);
        bytes[0] = b'X';
        let message = NtlmMessage::from_authorization(&header_for(&bytes)).unwrap();
        assert_eq!(message.message_type(), None);
        assert!(!message.is_ntlm());
    }

    #[test]
    fn prefix_is_case_sensitive() {
        let header = header_for(&message_of_type(1)).replacen("NTLM", "ntlm", 1);
        assert!(matches!(
            NtlmMessage::from_authorization(&header),
            Err(BridgeError::InvalidHeader)
        ));
        assert!(matches!(
            NtlmMessage::from_authorization("Negotiate TlRMTVNTUAABAAAA"),
            Err(BridgeError::InvalidHeader)
        ));
    }

    #[test]
    fn bad_base64_is_malformed() {
        assert!(matches!(
            NtlmMessage::from_authorization("NTLM !!not-base64!!"),
            Err(BridgeError::MalformedMessage)
        ));
    }

    #[test]
    fn short_buffer_is_malformed() {
        assert!(matches!(
            NtlmMessage::from_authorization(&header_for(b"NTLMSSP\0\x01")),
            Err(BridgeError::MalformedMessage)
        ));
        assert!(matches!(
            NtlmMessage::from_authorization("NTLM "),
            Err(BridgeError::MalformedMessage)
        ));
    }

    #[test]
    fn exactly_twelve_bytes_is_enough() {
        let bytes = &message_of_type(3)[..12];
        let message = NtlmMessage::from_bytes(bytes.to_vec()).unwrap();
        assert_eq!(message.message_type(), Some(MessageType::Authenticate));
        assert_eq!(message.as_bytes().len(), 12);
    }
}

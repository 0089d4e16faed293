//! ICMP (Internet Control Message Protocol) implementation
//!
//! This module provides ICMP message parsing and construction.
//! Echo Request and Echo Reply are the only message types the stack builds.

use crate::network::{checksum, checksum_skipping};
use byteorder::{BigEndian, ByteOrder};

/// ICMP header length in bytes
pub const ICMP_HEADER_LEN: usize = 8;
const CHECKSUM_FIELD: usize = 2;

/// ICMP message types
pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

/// ICMP packet header structure
///
/// Represents the standard 8-byte ICMP header as defined in RFC 792
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub msg_type: u8,  // ICMP message type
    pub msg_code: u8,  // ICMP message code
    pub checksum: u16, // ICMP checksum
    pub rest: [u8; 4], // Type-specific data (e.g., identifier and sequence for echo)
}

impl IcmpHeader {
    /// Create an echo header with a zero checksum
    pub fn echo(msg_type: u8, msg_code: u8, identifier: u16, sequence: u16) -> Self {
        let mut header = IcmpHeader {
            msg_type,
            msg_code,
            checksum: 0,
            rest: [0; 4],
        };
        header.set_identifier(identifier);
        header.set_sequence(sequence);
        header
    }

    /// Parse ICMP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid ICMP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return None;
        }

        let mut rest = [0u8; 4];
        rest.copy_from_slice(&data[4..8]);

        Some(IcmpHeader {
            msg_type: data[0],
            msg_code: data[1],
            checksum: BigEndian::read_u16(&data[2..4]),
            rest,
        })
    }

    /// Convert ICMP header to bytes
    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0u8; ICMP_HEADER_LEN];
        bytes[0] = self.msg_type;
        bytes[1] = self.msg_code;
        BigEndian::write_u16(&mut bytes[2..4], self.checksum);
        bytes[4..8].copy_from_slice(&self.rest);
        bytes
    }

    /// Serialize header and payload, filling in the checksum over both
    pub fn build_message(&self, payload: &[u8]) -> Vec<u8> {
        let mut header = *self;
        header.checksum = 0;

        let mut message = Vec::with_capacity(ICMP_HEADER_LEN + payload.len());
        message.extend_from_slice(&header.to_bytes());
        message.extend_from_slice(payload);

        let sum = checksum(&message);
        BigEndian::write_u16(&mut message[2..4], sum);
        message
    }

    /// Check the transmitted checksum against the whole message as received
    pub fn has_valid_checksum(&self, message: &[u8]) -> bool {
        checksum_skipping(message, CHECKSUM_FIELD) == self.checksum
    }

    /// Check if this is an Echo Request message
    pub fn is_echo_request(&self) -> bool {
        self.msg_type == ICMP_TYPE_ECHO_REQUEST
    }

    /// Check if this is an Echo Reply message
    pub fn is_echo_reply(&self) -> bool {
        self.msg_type == ICMP_TYPE_ECHO_REPLY
    }

    /// Get the identifier field for Echo Request/Reply messages
    pub fn identifier(&self) -> u16 {
        BigEndian::read_u16(&self.rest[0..2])
    }

    /// Get the sequence number field for Echo Request/Reply messages
    pub fn sequence(&self) -> u16 {
        BigEndian::read_u16(&self.rest[2..4])
    }

    /// Set the identifier field for Echo Request/Reply messages
    pub fn set_identifier(&mut self, id: u16) {
        BigEndian::write_u16(&mut self.rest[0..2], id);
    }

    /// Set the sequence number field for Echo Request/Reply messages
    pub fn set_sequence(&mut self, seq: u16) {
        BigEndian::write_u16(&mut self.rest[2..4], seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_layout() {
        let message = IcmpHeader::echo(ICMP_TYPE_ECHO_REQUEST, 0, 7, 3).build_message(b"PING");
        assert_eq!(message.len(), 12);
        assert_eq!(message[0], 8);
        assert_eq!(message[1], 0);
        assert_eq!(&message[4..8], &[0, 7, 0, 3]);
        assert_eq!(&message[8..], b"PING");
        assert_eq!(checksum(&message), 0);

        let header = IcmpHeader::from_bytes(&message).unwrap();
        assert!(header.is_echo_request());
        assert_eq!(header.identifier(), 7);
        assert_eq!(header.sequence(), 3);
        assert!(header.has_valid_checksum(&message));
    }

    #[test]
    fn test_odd_payload_checksum() {
        let message = IcmpHeader::echo(ICMP_TYPE_ECHO_REPLY, 0, 1, 1).build_message(b"abc");
        let header = IcmpHeader::from_bytes(&message).unwrap();
        assert!(header.is_echo_reply());
        assert!(header.has_valid_checksum(&message));
    }

    #[test]
    fn test_corruption_detected() {
        let mut message = IcmpHeader::echo(ICMP_TYPE_ECHO_REQUEST, 0, 1, 2).build_message(b"data");
        message[9] ^= 0x40;
        let header = IcmpHeader::from_bytes(&message).unwrap();
        assert!(!header.has_valid_checksum(&message));
    }

    #[test]
    fn test_truncated_header() {
        assert!(IcmpHeader::from_bytes(&[8, 0, 0, 0, 0, 0, 0]).is_none());
    }
}

//! IPv4 protocol implementation
//!
//! This module provides IPv4 header parsing, serialization and the
//! fragmentation arithmetic used on the send path.
//!
//! Features:
//! - IPv4 header parsing and serialization, options included
//! - Checksum calculation and validation
//! - Fragment planning for payloads that exceed the MTU

use std::net::Ipv4Addr;

use crate::network::{checksum, checksum_skipping};
use byteorder::{BigEndian, ByteOrder};

/// Length of an IPv4 header without options
pub const IPV4_HEADER_LEN: usize = 20;
/// Largest header the 4-bit IHL field can describe
pub const IPV4_MAX_HEADER_LEN: usize = 60;
const IPV4_VERSION: u8 = 4;
const CHECKSUM_FIELD: usize = 10;

/// IPv4 packet header structure
///
/// Represents the IPv4 header as defined in RFC 791, including any options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length, in 32-bit words
    pub tos: u8, // Type of Service
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // Flags and Fragment Offset
    pub ttl: u8,                // Time to Live
    pub protocol: u8,           // Next Protocol
    pub checksum: u16,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub options: Vec<u8>, // Already padded to a 4-byte multiple
}

impl Ipv4Header {
    /// Create a new IPv4 header for a payload of `payload_len` bytes
    ///
    /// `options` must already be padded to a multiple of 4 bytes (see [`pad_options`]).
    /// The checksum is left at zero; call [`Ipv4Header::update_checksum`] once
    /// every field is final.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tos: u8,
        payload_len: usize,
        id: u16,
        flags_frag_offset: u16,
        ttl: u8,
        protocol: u8,
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        options: &[u8],
    ) -> Self {
        let header_len = IPV4_HEADER_LEN + options.len();
        Ipv4Header {
            version: IPV4_VERSION,
            ihl: (header_len / 4) as u8,
            tos,
            total_len: (header_len + payload_len) as u16,
            id,
            flags_frag_offset,
            ttl,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
            options: options.to_vec(),
        }
    }

    /// Parse IPv4 header from byte slice
    ///
    /// Returns None if the data is too short, the version field is not 4, or
    /// the header length field points outside of `data`.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }

        let version = (data[0] & 0xF0) >> 4;
        if version != IPV4_VERSION {
            return None;
        }

        let ihl = data[0] & 0x0F;
        let header_len = ihl as usize * 4;
        if header_len < IPV4_HEADER_LEN || header_len > data.len() {
            return None;
        }

        Some(Ipv4Header {
            version,
            ihl,
            tos: data[1],
            total_len: BigEndian::read_u16(&data[2..4]),
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst_addr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            options: data[IPV4_HEADER_LEN..header_len].to_vec(),
        })
    }

    /// Convert IPv4 header to bytes
    ///
    /// Serializes the header, options included, ready for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; IPV4_HEADER_LEN];
        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        bytes[12..16].copy_from_slice(&self.src_addr.octets());
        bytes[16..20].copy_from_slice(&self.dst_addr.octets());
        bytes.extend_from_slice(&self.options);

        bytes
    }

    /// Update checksum after modifying header fields
    pub fn update_checksum(&mut self) {
        self.checksum = 0;
        self.checksum = checksum(&self.to_bytes());
    }

    /// Check the transmitted checksum against the raw header bytes as received
    pub fn has_valid_checksum(&self, raw_header: &[u8]) -> bool {
        checksum_skipping(raw_header, CHECKSUM_FIELD) == self.checksum
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    pub fn dont_fragment(&self) -> bool {
        self.flags_frag_offset & flags::DONT_FRAGMENT != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.flags_frag_offset & flags::MORE_FRAGMENTS != 0
    }

    /// Fragment offset in 8-byte units
    pub fn fragment_offset(&self) -> u16 {
        self.flags_frag_offset & flags::FRAGMENT_OFFSET_MASK
    }
}

/// IPv4 protocol constants
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const UDP: u8 = 17;
}

/// IPv4 flags constants
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
    pub const MORE_FRAGMENTS: u16 = 0x2000;
    pub const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;
}

/// Zero pad IP options up to a multiple of 4 bytes
pub fn pad_options(options: &[u8]) -> Vec<u8> {
    let mut padded = options.to_vec();
    let rem = padded.len() % 4;
    if rem != 0 {
        padded.resize(padded.len() + 4 - rem, 0);
    }
    padded
}

/// One slice of a payload that is sent as its own datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Byte offset into the original payload, always a multiple of 8
    pub offset: usize,
    pub len: usize,
    pub more_fragments: bool,
}

impl Fragment {
    /// The flags and fragment offset field for this fragment
    pub fn flags_frag_offset(&self) -> u16 {
        let units = (self.offset / 8) as u16 & flags::FRAGMENT_OFFSET_MASK;
        if self.more_fragments {
            units | flags::MORE_FRAGMENTS
        } else {
            units
        }
    }
}

/// Largest fragment payload that fits the MTU and keeps offsets 8-byte aligned
pub fn fragment_payload_len(mtu: usize, header_len: usize) -> usize {
    (mtu.saturating_sub(header_len) / 8) * 8
}

/// Split a payload of `payload_len` bytes into fragments for the given MTU
///
/// A payload that fits is a single fragment with MF clear. Returns None when the
/// MTU leaves no room for an 8-byte aligned chunk.
pub fn plan_fragments(payload_len: usize, mtu: usize, header_len: usize) -> Option<Vec<Fragment>> {
    if header_len + payload_len <= mtu {
        return Some(vec![Fragment {
            offset: 0,
            len: payload_len,
            more_fragments: false,
        }]);
    }

    let chunk = fragment_payload_len(mtu, header_len);
    if chunk == 0 {
        return None;
    }

    let mut fragments = Vec::with_capacity(payload_len.div_ceil(chunk));
    let mut offset = 0;
    while offset < payload_len {
        let len = chunk.min(payload_len - offset);
        fragments.push(Fragment {
            offset,
            len,
            more_fragments: offset + len < payload_len,
        });
        offset += len;
    }
    Some(fragments)
}

//! Ethernet II framing
//!
//! Destination address, source address and Ethertype, followed by the payload.
//! Frames shorter than [`ETH_FRAME_MIN`] are zero padded on the way out.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Ethernet header length in bytes
pub const ETH_HEADER_LEN: usize = 14;
/// Smallest frame put on the wire (without FCS)
pub const ETH_FRAME_MIN: usize = 60;
/// Largest frame put on the wire (without FCS)
pub const ETH_FRAME_MAX: usize = 1514;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// A 6-byte link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// Error returned when a textual MAC address does not have six hex octets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid link-layer address syntax")]
pub struct ParseMacError;

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(|c: char| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(ParseMacError)?;
            if part.len() != 2 {
                return Err(ParseMacError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError)?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError);
        }
        Ok(MacAddr(octets))
    }
}

/// Ethernet II header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_addr: MacAddr,
    pub src_addr: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    /// Parse Ethernet header from byte slice
    ///
    /// Returns None if the data is too short to contain the header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ETH_HEADER_LEN {
            return None;
        }

        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&data[0..6]);
        src.copy_from_slice(&data[6..12]);

        Some(EthernetHeader {
            dst_addr: MacAddr(dst),
            src_addr: MacAddr(src),
            ethertype: BigEndian::read_u16(&data[12..14]),
        })
    }

    /// Convert Ethernet header to bytes
    pub fn to_bytes(&self) -> [u8; ETH_HEADER_LEN] {
        let mut bytes = [0u8; ETH_HEADER_LEN];
        bytes[0..6].copy_from_slice(&self.dst_addr.0);
        bytes[6..12].copy_from_slice(&self.src_addr.0);
        BigEndian::write_u16(&mut bytes[12..14], self.ethertype);
        bytes
    }

    /// Build a complete frame around `payload`.
    ///
    /// Short frames are zero padded up to [`ETH_FRAME_MIN`]. Returns None when
    /// the frame would exceed [`ETH_FRAME_MAX`].
    pub fn build_frame(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let len = ETH_HEADER_LEN + payload.len();
        if len > ETH_FRAME_MAX {
            return None;
        }

        let mut frame = Vec::with_capacity(len.max(ETH_FRAME_MIN));
        frame.extend_from_slice(&self.to_bytes());
        frame.extend_from_slice(payload);
        if frame.len() < ETH_FRAME_MIN {
            frame.resize(ETH_FRAME_MIN, 0);
        }
        Some(frame)
    }
}

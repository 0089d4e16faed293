//! Wire formats of the protocols the stack speaks
//!
//! This module contains the header layouts and the shared checksum engine:
//! - Ethernet II framing
//! - IPv4: Internet Protocol version 4
//! - ICMP: Internet Control Message Protocol

pub mod ethernet;
pub mod icmp;
pub mod ipv4;

// Re-export commonly used items
pub use ethernet::{EthernetHeader, MacAddr, ETHERTYPE_IPV4};
pub use icmp::{IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use ipv4::{flags, protocol, Ipv4Header};

/// Calculate Internet checksum
///
/// Algorithm: Sum data in 16-bit big-endian chunks, add carry bits to the sum,
/// and return the one's complement of the result.
/// This is used for both IP and ICMP checksums.
pub fn checksum(data: &[u8]) -> u16 {
    !fold(sum_words(data))
}

/// Calculate the Internet checksum of `data` as if the 16-bit field at
/// `field` were zero.
///
/// Both IP and ICMP verify a received checksum this way: recompute with the
/// field zeroed and compare against the transmitted value.
pub fn checksum_skipping(data: &[u8], field: usize) -> u16 {
    let mut sum = sum_words(data);
    if let Some(word) = data.get(field..field + 2) {
        // The field is word aligned in both headers, subtracting it is exact.
        sum -= u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    !fold(sum)
}

fn sum_words(data: &[u8]) -> u32 {
    let mut sum = 0u32;

    // Process data in 2-byte chunks
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    // Handle odd-length data by padding with zero
    if let [last_byte] = chunks.remainder() {
        sum += (*last_byte as u32) << 8;
    }

    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

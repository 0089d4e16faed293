//! Error type shared by every layer's outbound and lifecycle operations.
//!
//! Inbound processing never produces these: a frame that fails validation is
//! discarded by the layer that inspected it.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StackError>;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("layer is already initialized")]
    AlreadyInitialized,
    #[error("layer is not initialized")]
    NotInitialized,
    /// The frame would not fit into a single Ethernet frame.
    #[error("frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    /// No link-layer address could be obtained for the next hop.
    #[error("could not resolve a link-layer address for {0}")]
    Unresolved(Ipv4Addr),
    #[error("ICMP type {0} cannot be sent")]
    UnsupportedIcmpType(u8),
    #[error("MTU {mtu} leaves no room for a fragment after a {header_len} byte header")]
    MtuTooSmall { mtu: usize, header_len: usize },
    #[error("IP options of {len} bytes do not fit into the header")]
    OptionsTooLong { len: usize },
    #[error("payload of {len} bytes does not fit into one IP datagram")]
    PayloadTooLarge { len: usize },
    #[error("interface query failed: {0}")]
    Interface(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

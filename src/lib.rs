//! A user-space Ethernet/IPv4/ICMP stack
//!
//! The stack captures raw Ethernet frames from a link device and injects the
//! frames it builds, bypassing the host's network stack:
//! - Ethernet framing, address filtering and Ethertype dispatch
//! - IPv4 validation, protocol dispatch, next-hop selection and fragmentation
//! - ICMP echo request/reply with round-trip-time measurement

pub mod config;
pub mod dispatch;
pub mod error;
pub mod iface;
pub mod layer;
pub mod network;
pub mod stack;

// Re-export commonly used types
pub use config::StackConfig;
pub use error::{Result, StackError};
pub use iface::{AddressResolver, CaptureMeta, InterfaceInfo, LinkDevice, Loopback};
pub use layer::{EchoRtt, EthernetLayer, IcmpLayer, IpLayer};
pub use network::{EthernetHeader, IcmpHeader, Ipv4Header, MacAddr};
pub use stack::Stack;

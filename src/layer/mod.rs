//! The protocol levels of the stack
//!
//! Inbound frames flow Ethernet → IP → ICMP through each level's handler table;
//! outbound traffic flows ICMP → IP → Ethernet → device.

pub mod ethernet;
pub mod icmp;
pub mod ip;

// Re-export commonly used items
pub use ethernet::{EthernetHandler, EthernetLayer};
pub use icmp::{EchoKey, EchoRtt, IcmpLayer};
pub use ip::{IpConfig, IpHandler, IpLayer};

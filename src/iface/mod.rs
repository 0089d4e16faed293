//! Everything the stack consumes from outside of itself
//!
//! This module provides the boundaries to the host:
//! - Frame capture and injection devices (tap, in-memory loopback)
//! - Interface introspection (addresses, MTU, netmask, gateway)
//! - Link-layer address resolution

pub mod device;
pub mod introspect;
pub mod loopback;
pub mod resolve;

// Re-export commonly used items
pub use device::{CaptureMeta, LinkDevice, TapDevice};
pub use introspect::{InterfaceInfo, StaticInterfaceInfo, SystemInterfaceInfo};
pub use loopback::Loopback;
pub use resolve::{AddressResolver, StaticResolver};

//! Link-layer address resolution
//!
//! The IP layer asks an [`AddressResolver`] for the hardware address of the next
//! hop before every send. A resolver may block while it waits for an answer
//! from the network; that answer arrives through the same capture loop, which
//! is why every received frame is processed on its own thread.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock};

use crate::error::Result;
use crate::network::MacAddr;

pub trait AddressResolver: Send + Sync {
    /// Prepare the resolver for `interface`. Called once by the IP layer's init.
    fn initialize(&self, _interface: &str) -> Result<()> {
        Ok(())
    }

    /// The link-layer address of `ip`, or None if it cannot be obtained.
    fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr>;
}

/// A resolver backed by a fixed neighbor table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<Ipv4Addr, MacAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Ipv4Addr, MacAddr)>,
    {
        StaticResolver {
            table: RwLock::new(entries.into_iter().collect()),
        }
    }

    pub fn insert(&self, ip: Ipv4Addr, mac: MacAddr) -> Option<MacAddr> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ip, mac)
    }

    pub fn remove(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ip)
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ip)
            .copied()
    }
}

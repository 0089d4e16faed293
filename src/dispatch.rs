//! Keyed callback tables used for demultiplexing.
//!
//! The Ethernet layer keys its table by Ethertype and the IP layer by protocol
//! number. Each key maps to at most one handler; registering again for the
//! same key replaces the previous handler.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

/// A concurrent map from a protocol key to its upper-layer handler.
///
/// Lookups hand out a cloned `Arc`, so no lock is held while a handler runs.
pub struct Registry<K, H: ?Sized> {
    table: RwLock<HashMap<K, Arc<H>>>,
}

impl<K, H> Registry<K, H>
where
    K: Eq + Hash + Copy,
    H: ?Sized,
{
    pub fn new() -> Self {
        Registry {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Install `handler` for `key`, returning the handler it replaced.
    pub fn register(&self, key: K, handler: Arc<H>) -> Option<Arc<H>> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, handler)
    }

    pub fn lookup(&self, key: K) -> Option<Arc<H>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }
}

impl<K, H> Default for Registry<K, H>
where
    K: Eq + Hash + Copy,
    H: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

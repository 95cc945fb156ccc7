use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::transport::connection::ConnectionHandle;

type ConnectionMap = FxHashMap<SocketAddr, Arc<ConnectionHandle>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("the connection registry is sealed")]
pub struct RegistrySealed;

/// The registry maps remote addresses to their connections, and it is the single source of
///  truth for whether there is a connection to a given peer.
///
/// Lookups read an immutable snapshot of the map without locking, so they see either the
///  state before or after a concurrent mutation. Mutations are serialized by a lock and
///  publish a modified copy of the map (copy-on-write).
///
/// Once sealed (when the owning channel is closed), the registry is empty and rejects all
///  further inserts. Sealing happens under the write lock, so a connect completing
///  concurrently with the channel's shutdown either gets drained or is rejected - it can never
///  slip in afterwards.
pub struct ConnectionRegistry {
    snapshot: ArcSwap<ConnectionMap>,
    /// `true` once sealed
    write_lock: Mutex<bool>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry {
            snapshot: ArcSwap::from_pointee(ConnectionMap::default()),
            write_lock: Mutex::new(false),
        }
    }

    pub fn get(&self, remote_addr: &SocketAddr) -> Option<Arc<ConnectionHandle>> {
        self.snapshot.load()
            .get(remote_addr)
            .cloned()
    }

    pub fn contains(&self, remote_addr: &SocketAddr) -> bool {
        self.snapshot.load()
            .contains_key(remote_addr)
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    pub fn remote_addrs(&self) -> Vec<SocketAddr> {
        self.snapshot.load()
            .keys()
            .copied()
            .collect()
    }

    fn update<R>(&self, f: impl FnOnce(&mut ConnectionMap) -> R) -> Result<R, RegistrySealed> {
        let sealed = self.write_lock.lock();
        if *sealed {
            return Err(RegistrySealed);
        }

        let mut map = ConnectionMap::clone(&self.snapshot.load());
        let result = f(&mut map);
        self.snapshot.store(Arc::new(map));
        Ok(result)
    }

    /// Registers a connection. If there is a registered connection for the same remote address,
    ///  the new one replaces it: the superseded connection is closed and returned.
    pub fn insert(&self, handle: Arc<ConnectionHandle>) -> Result<Option<Arc<ConnectionHandle>>, RegistrySealed> {
        let remote_addr = handle.remote_addr();
        let superseded = self.update(|map| map.insert(remote_addr, handle))?;

        if let Some(superseded) = &superseded {
            debug!(remote=%remote_addr, id=superseded.id(), "replacing registered connection");
            superseded.close();
        }
        Ok(superseded)
    }

    /// Removes the connection's entry if it is still registered. An entry that was replaced by
    ///  a newer connection for the same address is left alone.
    pub fn remove_if_same(&self, handle: &Arc<ConnectionHandle>) -> bool {
        let remote_addr = handle.remote_addr();
        if !self.snapshot.load().get(&remote_addr).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            return false;
        }

        self.update(|map| {
            match map.get(&remote_addr) {
                Some(registered) if Arc::ptr_eq(registered, handle) => {
                    map.remove(&remote_addr);
                    true
                }
                _ => false,
            }
        })
            .unwrap_or(false)
    }

    /// Seals the registry and removes all entries, returning them for the caller to close.
    ///  Sealing is idempotent; later calls return nothing.
    pub fn seal_and_drain(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut sealed = self.write_lock.lock();
        *sealed = true;

        let drained = self.snapshot.swap(Arc::new(ConnectionMap::default()));
        drained.values()
            .cloned()
            .collect()
    }
}

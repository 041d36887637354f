//! Roster of validated connections
//!
//! The roster holds every connection that passed the handshake, in the order
//! it was validated. Dead connections are not removed when their socket
//! fails; they stay until a send or an explicit sweep discovers them. A pass
//! over the roster nulls out dead slots as it goes and compacts once at the
//! end, so iteration never shifts entries under itself.

use log::info;
use shared::{Connection, MessageKind};
use std::sync::Arc;

/// Validated connections in insertion order, with an optional capacity limit
pub struct Roster<T: MessageKind> {
    slots: Vec<Option<Arc<Connection<T>>>>,
    /// Maximum number of connections allowed; `None` means unbounded
    max_connections: Option<usize>,
}

impl<T: MessageKind> Roster<T> {
    /// Creates an empty roster with the given capacity limit
    pub fn new(max_connections: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            max_connections,
        }
    }

    /// Returns true if another connection would exceed the capacity limit
    pub fn is_full(&self) -> bool {
        self.max_connections
            .is_some_and(|max| self.slots.len() >= max)
    }

    /// Appends a validated connection
    ///
    /// Returns false if the roster is at capacity. Capacity is checked at
    /// accept time as well, but handshakes that were in flight together can
    /// still race for the last slot.
    pub fn add(&mut self, conn: Arc<Connection<T>>) -> bool {
        if self.is_full() {
            return false;
        }

        info!("Client {} added to roster", conn.id());
        self.slots.push(Some(conn));
        true
    }

    /// Removes a specific connection
    ///
    /// Returns true if it was present, false if someone already removed it.
    /// Callers use the return value to fire the disconnect hook exactly once.
    pub fn remove(&mut self, conn: &Arc<Connection<T>>) -> bool {
        let before = self.slots.len();
        self.slots
            .retain(|slot| !matches!(slot, Some(c) if Arc::ptr_eq(c, conn)));

        let removed = self.slots.len() != before;
        if removed {
            info!("Client {} removed from roster", conn.id());
        }
        removed
    }

    /// Visits every connection, dropping the ones `keep` rejects
    ///
    /// Rejected slots are nulled during the pass and compacted once it ends.
    /// The removed connections are returned in roster order so the caller can
    /// fire disconnect hooks after releasing its lock.
    pub fn retain_live<F>(&mut self, mut keep: F) -> Vec<Arc<Connection<T>>>
    where
        F: FnMut(&Arc<Connection<T>>) -> bool,
    {
        let mut removed = Vec::new();

        for slot in self.slots.iter_mut() {
            let alive = match slot {
                Some(conn) => keep(conn),
                None => continue,
            };
            if !alive {
                removed.extend(slot.take());
            }
        }

        if !removed.is_empty() {
            self.slots.retain(Option::is_some);
            for conn in &removed {
                info!("Client {} removed from roster", conn.id());
            }
        }
        removed
    }

    /// Looks a connection up by its server-assigned ID
    pub fn find(&self, id: u32) -> Option<Arc<Connection<T>>> {
        self.slots
            .iter()
            .flatten()
            .find(|conn| conn.id() == id)
            .cloned()
    }

    /// Snapshot of every connection currently held, dead or alive
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// Returns the number of connections currently held
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no connections are held
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

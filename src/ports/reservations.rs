use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tracing::debug;

/// Process-wide table of ports handed out but not yet bound by a running
/// container. Entries are removed when their [`PortHold`] is confirmed or
/// dropped, and ignored once older than the TTL.
#[derive(Debug)]
pub struct Reservations {
    holds: Mutex<HashMap<u16, Entry>>,
    ttl: Duration,
    next_token: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    token: u64,
    since: Instant,
}

impl Reservations {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Reservations {
            holds: Mutex::new(HashMap::new()),
            ttl,
            next_token: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Entry>> {
        // a poisoned table only means a holder panicked; the map is still usable
        self.holds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_held(&self, port: u16) -> bool {
        self.lock()
            .get(&port)
            .is_some_and(|entry| entry.since.elapsed() < self.ttl)
    }

    /// Takes a hold on `port` unless a live hold already exists.
    pub fn try_hold(self: &Arc<Self>, port: u16) -> Option<PortHold> {
        let mut holds = self.lock();
        holds.retain(|_, entry| entry.since.elapsed() < self.ttl);
        if holds.contains_key(&port) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        holds.insert(
            port,
            Entry {
                token,
                since: Instant::now(),
            },
        );
        Some(PortHold {
            port,
            token,
            table: Arc::clone(self),
        })
    }

    pub fn held_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| entry.since.elapsed() < self.ttl)
            .count()
    }

    /// Removes the entry only if it still belongs to the releasing hold; an
    /// expired hold must not clear a newer one on the same port.
    fn release(&self, port: u16, token: u64) {
        let mut holds = self.lock();
        if holds.get(&port).is_some_and(|entry| entry.token == token) {
            holds.remove(&port);
        }
    }
}

/// A provisional claim on one host port. Released on drop.
#[derive(Debug)]
pub struct PortHold {
    port: u16,
    token: u64,
    table: Arc<Reservations>,
}

impl PortHold {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The container holding this port is running; the runtime now reports
    /// the binding itself.
    pub fn confirm(self) {
        debug!(host_port = self.port, "port bind confirmed");
    }
}

impl Drop for PortHold {
    fn drop(&mut self) {
        self.table.release(self.port, self.token);
    }
}

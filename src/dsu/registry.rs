//! Registry of clients subscribed to controller data
//!
//! A client is keyed by its (address, port) pair. It is registered on its
//! first data request, refreshed by every later one, and evicted once it
//! stays silent for longer than the timeout.

use chrono::{DateTime, Local};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Clone, Debug)]
pub struct DsuClient {
    /// Id from the client's first request header
    pub id: u32,
    pub addr: SocketAddr,
    /// Number stamped into the next data response sent to this client
    pub packet_number: u32,
    pub last_seen: Instant,
    pub registered_at: DateTime<Local>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    New,
    Refreshed,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<DsuClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&DsuClient> {
        self.clients.iter().find(|client| client.addr == *addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DsuClient> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DsuClient> {
        self.clients.iter_mut()
    }

    /// Registers `addr`, or refreshes its last-seen time if already known
    pub fn register_or_refresh(&mut self, addr: SocketAddr, id: u32, now: Instant) -> Registration {
        if let Some(client) = self.clients.iter_mut().find(|client| client.addr == addr) {
            client.last_seen = now;
            return Registration::Refreshed;
        }

        info!("Request for data from new client [{}]", addr);
        self.clients.push(DsuClient {
            id,
            addr,
            packet_number: 0,
            last_seen: now,
            registered_at: Local::now(),
        });
        Registration::New
    }

    /// Drops every client silent for longer than `timeout`; returns their addresses
    pub fn evict_expired(&mut self, now: Instant, timeout: Duration) -> Vec<SocketAddr> {
        let mut evicted = Vec::new();
        self.clients.retain(|client| {
            let silent_for = now.saturating_duration_since(client.last_seen);
            if silent_for > timeout {
                info!(
                    "No packet from client [{}] for {}ms, dropping it (registered {})",
                    client.addr,
                    silent_for.as_millis(),
                    client.registered_at.format("%H:%M:%S")
                );
                evicted.push(client.addr);
                false
            } else {
                true
            }
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn first_request_registers_once() {
        let mut registry = ClientRegistry::new();
        let t0 = Instant::now();

        assert_eq!(registry.register_or_refresh(addr(1000), 7, t0), Registration::New);
        let later = t0 + Duration::from_millis(300);
        assert_eq!(
            registry.register_or_refresh(addr(1000), 8, later),
            Registration::Refreshed
        );

        assert_eq!(registry.len(), 1);
        let client = registry.get(&addr(1000)).unwrap();
        assert_eq!(client.id, 7);
        assert_eq!(client.last_seen, later);
        assert_eq!(client.packet_number, 0);
    }

    #[test]
    fn same_address_different_port_is_distinct() {
        let mut registry = ClientRegistry::new();
        let now = Instant::now();
        registry.register_or_refresh(addr(1000), 1, now);
        registry.register_or_refresh(addr(1001), 1, now);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn eviction_is_strictly_after_timeout() {
        let mut registry = ClientRegistry::new();
        let t0 = Instant::now();
        let timeout = Duration::from_millis(5000);
        registry.register_or_refresh(addr(1), 0, t0);
        registry.register_or_refresh(addr(2), 0, t0 + Duration::from_millis(2000));

        assert!(registry.evict_expired(t0 + timeout, timeout).is_empty());
        assert_eq!(registry.len(), 2);

        let evicted = registry.evict_expired(t0 + timeout + Duration::from_millis(1), timeout);
        assert_eq!(evicted, vec![addr(1)]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&addr(2)).is_some());
    }

    #[test]
    fn refresh_postpones_eviction() {
        let mut registry = ClientRegistry::new();
        let t0 = Instant::now();
        let timeout = Duration::from_millis(100);
        registry.register_or_refresh(addr(1), 0, t0);
        registry.register_or_refresh(addr(1), 0, t0 + Duration::from_millis(90));

        assert!(registry
            .evict_expired(t0 + Duration::from_millis(150), timeout)
            .is_empty());
        assert_eq!(
            registry.evict_expired(t0 + Duration::from_millis(191), timeout),
            vec![addr(1)]
        );
        assert!(registry.is_empty());
    }
}

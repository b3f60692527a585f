use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// How far above the preferred port to look before asking the OS for one
const SCAN_WINDOW: u16 = 100;

/// Hands out loopback ports for worker instances.
///
/// Ports stay reserved until the returned [`PortReservation`] is dropped, so two
/// launches racing each other never receive the same port even though neither
/// worker has bound it yet.
#[derive(Debug, Clone, Default)]
pub struct PortAllocator {
    reserved: Arc<Mutex<HashSet<u16>>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a free port, preferring `preferred`
    pub fn allocate(&self, preferred: u16) -> WorkerResult<PortReservation> {
        let mut reserved = self.reserved.lock();

        let candidates = (0..=SCAN_WINDOW).filter_map(|offset| preferred.checked_add(offset));
        for port in candidates {
            if port == 0 || reserved.contains(&port) {
                continue;
            }
            if is_bindable(port) {
                reserved.insert(port);
                debug!("Reserved port {} (preferred {})", port, preferred);
                return Ok(self.reservation(port));
            }
        }

        // Window exhausted, let the OS pick an ephemeral port.
        for _ in 0..8 {
            let port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .and_then(|listener| listener.local_addr())
                .map(|addr| addr.port())?;
            if reserved.insert(port) {
                debug!("Reserved OS-assigned port {} (preferred {})", port, preferred);
                return Ok(self.reservation(port));
            }
        }

        Err(WorkerError::PortExhausted(preferred))
    }

    /// Whether `port` is currently held by a reservation
    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved.lock().contains(&port)
    }

    fn reservation(&self, port: u16) -> PortReservation {
        PortReservation {
            port,
            reserved: Arc::clone(&self.reserved),
        }
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// A port held for one worker; released on drop
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    reserved: Arc<Mutex<HashSet<u16>>>,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.reserved.lock().remove(&self.port);
        debug!("Released port {}", self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_requested_port_when_free() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let free_port = listener.local_addr().unwrap().port();
        drop(listener);

        let allocator = PortAllocator::new();
        let reservation = allocator.allocate(free_port).unwrap();
        assert_eq!(reservation.port(), free_port);
    }

    #[test]
    fn test_skips_bound_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = listener.local_addr().unwrap().port();

        let allocator = PortAllocator::new();
        let reservation = allocator.allocate(busy_port).unwrap();
        assert_ne!(reservation.port(), busy_port);
    }

    #[test]
    fn test_never_hands_out_reserved_port_twice() {
        let allocator = PortAllocator::new();
        let first = allocator.allocate(40123).unwrap();
        let second = allocator.allocate(first.port()).unwrap();
        assert_ne!(first.port(), second.port());
        assert!(allocator.is_reserved(first.port()));
        assert!(allocator.is_reserved(second.port()));
    }

    #[test]
    fn test_drop_releases_port() {
        let allocator = PortAllocator::new();
        let reservation = allocator.allocate(40500).unwrap();
        let port = reservation.port();
        drop(reservation);
        assert!(!allocator.is_reserved(port));
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let allocator = PortAllocator::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.allocate(41000).unwrap())
            })
            .collect();

        let reservations: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ports: HashSet<u16> = reservations.iter().map(|r| r.port()).collect();
        assert_eq!(ports.len(), reservations.len());
    }
}

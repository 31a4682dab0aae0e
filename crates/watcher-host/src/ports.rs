//! Control-channel port allocation.
//!
//! Ports are handed out from a fixed base in strictly increasing order and
//! are never reused while the host runs. The counter is atomic so discovery
//! may allocate from several threads.

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out unique, monotonically increasing TCP ports.
///
/// # Example
///
/// ```
/// use watcher_host::PortAllocator;
///
/// let ports = PortAllocator::new(50051);
/// assert_eq!(ports.next_port(), Some(50051));
/// assert_eq!(ports.next_port(), Some(50052));
/// ```
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    next: AtomicU32,
}

impl PortAllocator {
    /// Creates an allocator whose first port is `base`.
    ///
    /// Port 0 asks the OS for an ephemeral port and can never be dialled,
    /// so a zero base starts at port 1.
    #[must_use]
    pub const fn new(base: u16) -> Self {
        let first = if base == 0 { 1 } else { base };
        Self {
            base: first,
            next: AtomicU32::new(first as u32),
        }
    }

    /// Returns the next unused port, or `None` once `u16::MAX` has been
    /// handed out.
    #[must_use]
    pub fn next_port(&self) -> Option<u16> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current <= u32::from(u16::MAX)).then_some(current + 1)
            })
            .ok()
            .and_then(|port| u16::try_from(port).ok())
    }

    /// Returns the highest port allocated so far, if any.
    #[must_use]
    pub fn last_allocated(&self) -> Option<u16> {
        let next = self.next.load(Ordering::SeqCst);
        if next <= u32::from(self.base) {
            return None;
        }
        u16::try_from(next - 1).ok()
    }

    /// First port this allocator hands out.
    #[must_use]
    pub const fn base(&self) -> u16 {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn allocates_from_base_in_order() {
        let ports = PortAllocator::new(50_051);
        assert_eq!(ports.last_allocated(), None);
        assert_eq!(ports.next_port(), Some(50_051));
        assert_eq!(ports.next_port(), Some(50_052));
        assert_eq!(ports.next_port(), Some(50_053));
        assert_eq!(ports.last_allocated(), Some(50_053));
    }

    #[test]
    fn zero_base_starts_at_port_one() {
        let ports = PortAllocator::new(0);
        assert_eq!(ports.base(), 1);
        assert_eq!(ports.next_port(), Some(1));
        assert_eq!(ports.next_port(), Some(2));
    }

    #[test]
    fn stops_at_the_top_of_the_port_range() {
        let ports = PortAllocator::new(u16::MAX - 1);
        assert_eq!(ports.next_port(), Some(u16::MAX - 1));
        assert_eq!(ports.next_port(), Some(u16::MAX));
        assert_eq!(ports.next_port(), None);
        assert_eq!(ports.next_port(), None);
        assert_eq!(ports.last_allocated(), Some(u16::MAX));
    }

    #[test]
    fn concurrent_allocation_never_repeats_a_port() {
        let ports = Arc::new(PortAllocator::new(40_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&ports);
                thread::spawn(move || {
                    (0..100)
                        .filter_map(|_| shared.next_port())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for port in handle.join().expect("allocator thread") {
                assert!(seen.insert(port), "port {port} handed out twice");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}

//! Single-range IPv4 address bookkeeping.
//!
//! An [`AddressSpace`] is the leaf allocation primitive: one contiguous
//! range of addresses, a reservation set, and a cursor for next-free
//! allocation. All mutation happens while the owning scope's lock is
//! held; the space itself carries no lock.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use berth_common::{BerthError, BerthResult};
use ipnet::Ipv4Net;

/// A single allocatable IPv4 range with reservation bookkeeping.
///
/// Allocation is lowest-free: `reserve_next_ip4` always returns the
/// numerically smallest unreserved address. The cursor is rewound on
/// release; every address below it is reserved at all times.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    /// Human-readable range description, used in error payloads.
    label: String,
    first: u32,
    last: u32,
    reserved: BTreeSet<u32>,
    /// Scan cursor. Invariant: every address below the cursor is reserved.
    next: u32,
}

impl AddressSpace {
    /// Create a space covering the usable hosts of a subnet.
    ///
    /// The network and broadcast addresses are excluded for prefixes
    /// shorter than /31; point-to-point (/31) and host (/32) networks
    /// use the full range per RFC 3021.
    #[must_use]
    pub fn from_network(network: Ipv4Net) -> Self {
        let net = u32::from(network.network());
        let bcast = u32::from(network.broadcast());

        let (first, last) = if network.prefix_len() >= 31 {
            (net, bcast)
        } else {
            (net + 1, bcast - 1)
        };

        Self {
            label: network.to_string(),
            first,
            last,
            reserved: BTreeSet::new(),
            next: first,
        }
    }

    /// Create a space covering an explicit inclusive address range.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if `first` is above `last`.
    pub fn from_range(first: Ipv4Addr, last: Ipv4Addr) -> BerthResult<Self> {
        let lo = u32::from(first);
        let hi = u32::from(last);
        if lo > hi {
            return Err(BerthError::Config {
                message: format!("address range {first}-{last} is inverted"),
            });
        }

        Ok(Self {
            label: format!("{first}-{last}"),
            first: lo,
            last: hi,
            reserved: BTreeSet::new(),
            next: lo,
        })
    }

    /// Whether `ip` falls inside this space's range.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        addr >= self.first && addr <= self.last
    }

    /// First address of the range.
    #[must_use]
    pub fn first(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.first)
    }

    /// Last address of the range.
    #[must_use]
    pub fn last(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.last)
    }

    /// Total number of addresses in the range.
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    /// Number of addresses currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity() - self.reserved.len()
    }

    /// Reserve exactly `ip`.
    ///
    /// # Errors
    ///
    /// Returns `AllocationExhausted` if `ip` is outside the range or
    /// already reserved.
    pub fn reserve_ip4(&mut self, ip: Ipv4Addr) -> BerthResult<()> {
        let addr = u32::from(ip);
        if !self.contains(ip) || !self.reserved.insert(addr) {
            return Err(BerthError::AllocationExhausted {
                pool: self.label.clone(),
            });
        }

        if addr == self.next {
            self.advance_cursor();
        }
        Ok(())
    }

    /// Reserve the lowest free address.
    ///
    /// # Errors
    ///
    /// Returns `AllocationExhausted` when every address is reserved.
    pub fn reserve_next_ip4(&mut self) -> BerthResult<Ipv4Addr> {
        if self.next > self.last {
            return Err(BerthError::AllocationExhausted {
                pool: self.label.clone(),
            });
        }

        let addr = self.next;
        self.reserved.insert(addr);
        self.advance_cursor();
        Ok(Ipv4Addr::from(addr))
    }

    /// Release a held reservation.
    ///
    /// # Errors
    ///
    /// Returns `AllocationInconsistent` if `ip` is outside the range or
    /// not currently reserved.
    pub fn release_ip4(&mut self, ip: Ipv4Addr) -> BerthResult<()> {
        let addr = u32::from(ip);
        if !self.contains(ip) || !self.reserved.remove(&addr) {
            return Err(BerthError::AllocationInconsistent { ip: ip.to_string() });
        }

        if addr < self.next {
            self.next = addr;
        }
        Ok(())
    }

    /// Move the cursor to the lowest free address at or above it.
    fn advance_cursor(&mut self) {
        while self.next <= self.last && self.reserved.contains(&self.next) {
            self.next += 1;
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn space(cidr: &str) -> AddressSpace {
        AddressSpace::from_network(cidr.parse().unwrap())
    }

    #[test]
    fn network_excludes_network_and_broadcast() {
        let s = space("10.0.0.0/24");
        assert_eq!(s.first(), "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s.last(), "10.0.0.254".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s.capacity(), 254);
    }

    #[test]
    fn slash_31_uses_full_range() {
        let s = space("10.0.0.0/31");
        assert_eq!(s.capacity(), 2);
        assert_eq!(s.first(), "10.0.0.0".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn next_is_lowest_free() {
        let mut s = space("10.0.0.0/24");
        assert_eq!(s.reserve_next_ip4().unwrap().to_string(), "10.0.0.1");
        assert_eq!(s.reserve_next_ip4().unwrap().to_string(), "10.0.0.2");

        s.release_ip4("10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(s.reserve_next_ip4().unwrap().to_string(), "10.0.0.1");
    }

    #[test]
    fn static_reservation_is_skipped() {
        let mut s = space("10.0.0.0/24");
        s.reserve_ip4("10.0.0.1".parse().unwrap()).unwrap();
        s.reserve_ip4("10.0.0.3".parse().unwrap()).unwrap();
        assert_eq!(s.reserve_next_ip4().unwrap().to_string(), "10.0.0.2");
        assert_eq!(s.reserve_next_ip4().unwrap().to_string(), "10.0.0.4");
    }

    #[test]
    fn double_reserve_fails() {
        let mut s = space("10.0.0.0/24");
        let ip = "10.0.0.5".parse().unwrap();
        s.reserve_ip4(ip).unwrap();
        assert!(matches!(
            s.reserve_ip4(ip),
            Err(BerthError::AllocationExhausted { .. })
        ));
    }

    #[test]
    fn out_of_range_reserve_fails() {
        let mut s = space("10.0.0.0/24");
        assert!(s.reserve_ip4("10.0.1.5".parse().unwrap()).is_err());
    }

    #[test]
    fn exhaustion() {
        let mut s = AddressSpace::from_range(
            "10.0.0.2".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
        )
        .unwrap();
        s.reserve_next_ip4().unwrap();
        s.reserve_next_ip4().unwrap();
        assert!(matches!(
            s.reserve_next_ip4(),
            Err(BerthError::AllocationExhausted { .. })
        ));
        assert_eq!(s.available(), 0);
    }

    #[test]
    fn release_unreserved_fails() {
        let mut s = space("10.0.0.0/24");
        assert!(matches!(
            s.release_ip4("10.0.0.9".parse().unwrap()),
            Err(BerthError::AllocationInconsistent { .. })
        ));
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(
            AddressSpace::from_range("10.0.0.9".parse().unwrap(), "10.0.0.2".parse().unwrap())
                .is_err()
        );
    }

    proptest! {
        /// Random interleavings of allocate/release never double-allocate
        /// and never hand out an address outside the range.
        #[test]
        fn bookkeeping_stays_consistent(ops in prop::collection::vec(0u8..4, 1..200)) {
            let mut s = space("10.0.0.0/26");
            let mut held: Vec<Ipv4Addr> = Vec::new();

            for op in ops {
                match op {
                    // Allocate.
                    0 | 1 | 2 => {
                        if let Ok(ip) = s.reserve_next_ip4() {
                            prop_assert!(s.contains(ip));
                            prop_assert!(!held.contains(&ip));
                            held.push(ip);
                        } else {
                            prop_assert_eq!(held.len(), s.capacity());
                        }
                    }
                    // Release the oldest held address.
                    _ => {
                        if !held.is_empty() {
                            let ip = held.remove(0);
                            prop_assert!(s.release_ip4(ip).is_ok());
                        }
                    }
                }
                prop_assert_eq!(s.available(), s.capacity() - held.len());
            }
        }
    }
}

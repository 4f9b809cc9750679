//! IP address management for a scope.
//!
//! An [`Ipam`] owns an ordered list of named pools, each backed by an
//! [`AddressSpace`]. Requests are resolved by trying spaces in list
//! order, which keeps the allocator agnostic to how the pools subdivide
//! the subnet and makes assignment order deterministic. The instance is
//! owned by exactly one scope and mutated only inside that scope's
//! critical section.

use std::net::Ipv4Addr;

use berth_common::{BerthError, BerthResult};
use ipnet::Ipv4Net;

use crate::address_space::AddressSpace;

/// Ordered pool allocator owned by a scope.
#[derive(Debug, Clone)]
pub struct Ipam {
    subnet: Ipv4Net,
    pools: Vec<String>,
    spaces: Vec<AddressSpace>,
}

impl Ipam {
    /// Create an allocator with a single space covering the whole subnet.
    #[must_use]
    pub fn from_subnet(subnet: Ipv4Net) -> Self {
        Self {
            subnet,
            pools: vec![subnet.to_string()],
            spaces: vec![AddressSpace::from_network(subnet)],
        }
    }

    /// Create an allocator from explicit pool definitions.
    ///
    /// Each pool is either a CIDR (`10.0.0.0/28`) or an inclusive range
    /// (`10.0.0.2-10.0.0.9`), and must fall within `subnet`. An empty
    /// pool list means the whole subnet is one pool.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for a malformed pool definition or one
    /// outside the subnet.
    pub fn from_pools(subnet: Ipv4Net, pools: &[String]) -> BerthResult<Self> {
        if pools.is_empty() {
            return Ok(Self::from_subnet(subnet));
        }

        let mut spaces = Vec::with_capacity(pools.len());
        for pool in pools {
            let space = parse_pool(pool)?;
            if !subnet.contains(&space.first()) || !subnet.contains(&space.last()) {
                return Err(BerthError::Config {
                    message: format!("pool {pool} is not contained in subnet {subnet}"),
                });
            }
            spaces.push(space);
        }

        Ok(Self {
            subnet,
            pools: pools.to_vec(),
            spaces,
        })
    }

    /// Pool names in selection order.
    #[must_use]
    pub fn pools(&self) -> &[String] {
        &self.pools
    }

    /// Address spaces in allocation order.
    #[must_use]
    pub fn spaces(&self) -> &[AddressSpace] {
        &self.spaces
    }

    /// Reserve exactly `ip` from the first space that can claim it.
    ///
    /// # Errors
    ///
    /// Returns `AllocationExhausted` when no space holds `ip` free.
    pub fn reserve_ip4(&mut self, ip: Ipv4Addr) -> BerthResult<()> {
        for space in &mut self.spaces {
            if space.reserve_ip4(ip).is_ok() {
                return Ok(());
            }
        }

        Err(BerthError::AllocationExhausted {
            pool: ip.to_string(),
        })
    }

    /// Reserve the next free address, trying spaces in order.
    ///
    /// # Errors
    ///
    /// Returns `AllocationExhausted` when every space is full.
    pub fn reserve_next_ip4(&mut self) -> BerthResult<Ipv4Addr> {
        for space in &mut self.spaces {
            if let Ok(ip) = space.reserve_next_ip4() {
                return Ok(ip);
            }
        }

        Err(BerthError::AllocationExhausted {
            pool: self.subnet.to_string(),
        })
    }

    /// Release `ip` back to the first space that recognizes it.
    ///
    /// # Errors
    ///
    /// Returns `AllocationInconsistent` when no space holds the
    /// reservation; that signals a bookkeeping bug in the caller, not a
    /// transient condition.
    pub fn release_ip4(&mut self, ip: Ipv4Addr) -> BerthResult<()> {
        for space in &mut self.spaces {
            if space.release_ip4(ip).is_ok() {
                return Ok(());
            }
        }

        Err(BerthError::AllocationInconsistent { ip: ip.to_string() })
    }
}

/// Parse a pool definition: a CIDR or an inclusive `first-last` range.
fn parse_pool(pool: &str) -> BerthResult<AddressSpace> {
    if let Some((first, last)) = pool.split_once('-') {
        let first: Ipv4Addr = first.trim().parse().map_err(|_| BerthError::Config {
            message: format!("invalid address range '{pool}'"),
        })?;
        let last: Ipv4Addr = last.trim().parse().map_err(|_| BerthError::Config {
            message: format!("invalid address range '{pool}'"),
        })?;
        return AddressSpace::from_range(first, last);
    }

    let network: Ipv4Net = pool.parse().map_err(|_| BerthError::Config {
        message: format!("invalid pool CIDR '{pool}'"),
    })?;
    Ok(AddressSpace::from_network(network))
}

//! Host subnet allocator
//!
//! Carves a cluster network into equally sized host subnets and leases them
//! out round-robin. Released subnets stay in the allocation map marked free,
//! so releasing the same subnet twice is reported instead of ignored.

use super::rotation::BitRotation;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Trait for pools that lease fixed-size subnets
pub trait SubnetPool: Send + Sync {
    /// Allocate the next free subnet
    fn allocate(&self) -> Result<Ipv4Net>;

    /// Release a previously allocated subnet
    fn release(&self, subnet: &Ipv4Net) -> Result<()>;

    /// Mark a specific subnet as allocated
    fn mark_allocated(&self, subnet: &Ipv4Net) -> Result<()>;

    /// Check if a subnet is currently allocated
    fn is_allocated(&self, subnet: &Ipv4Net) -> bool;

    /// Get allocated and total subnet counts
    fn usage(&self) -> SubnetUsage;

    /// Get all currently allocated subnets, ordered by address
    fn allocated_subnets(&self) -> Vec<Ipv4Net>;
}

/// Allocation counters for a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetUsage {
    /// Subnets currently leased
    pub allocated: u64,
    /// Subnets the pool can hold
    pub capacity: u64,
}

impl SubnetUsage {
    /// Subnets still free
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.allocated)
    }
}

impl std::ops::Add for SubnetUsage {
    type Output = SubnetUsage;

    fn add(self, other: SubnetUsage) -> SubnetUsage {
        SubnetUsage {
            allocated: self.allocated + other.allocated,
            capacity: self.capacity + other.capacity,
        }
    }
}

/// An `in_use` entry that was not seeded into the allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSeed {
    /// The entry as given
    pub entry: String,
    /// Why it was skipped
    pub reason: Error,
}

/// Mutable allocator state, always accessed under the lock
#[derive(Debug, Default)]
struct AllocationState {
    /// true = leased, false = released and free again
    allocated: HashMap<Ipv4Net, bool>,
    /// Index the next search starts from
    next: u64,
}

/// Subnet allocator for one cluster network
///
/// Every subnet has `host_bits` host bits, so a `/16` with 8 host bits
/// yields 256 `/24`s. The network and host bits are fixed at construction.
#[derive(Debug)]
pub struct SubnetAllocator {
    network: Ipv4Net,
    host_bits: u32,
    subnet_bits: u32,
    rotation: BitRotation,
    skipped: Vec<SkippedSeed>,
    state: Mutex<AllocationState>,
}

impl SubnetAllocator {
    /// Create an allocator for `network`, pre-marking the subnets in `in_use`
    ///
    /// `in_use` entries that don't parse, fall outside the network, or have
    /// the wrong prefix length are logged and skipped; see
    /// [`SubnetAllocator::skipped_seeds`].
    pub fn new<S: AsRef<str>>(network: &str, host_bits: u32, in_use: &[S]) -> Result<Self> {
        let network = Ipv4Net::from_str(network.trim())?.trunc();
        let mut allocator = Self::for_network(network, host_bits)?;

        let mut seeded = 0usize;
        for entry in in_use {
            let entry = entry.as_ref();
            match allocator.parse_seed(entry) {
                Ok(subnet) => {
                    allocator.state.get_mut().allocated.insert(subnet, true);
                    seeded += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        network = %network,
                        entry = %entry,
                        error = %reason,
                        "Skipping in-use subnet"
                    );
                    allocator.skipped.push(SkippedSeed {
                        entry: entry.to_string(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            network = %network,
            host_bits,
            capacity = allocator.capacity(),
            seeded,
            skipped = allocator.skipped.len(),
            "Created subnet allocator"
        );

        Ok(allocator)
    }

    /// Create an empty allocator from an already parsed network
    pub fn for_network(network: Ipv4Net, host_bits: u32) -> Result<Self> {
        let network = network.trunc();
        let prefix_len = u32::from(network.prefix_len());
        let available = 32 - prefix_len;

        if host_bits == 0 || host_bits > available {
            return Err(Error::InvalidHostBits {
                host_bits,
                available,
            });
        }

        let subnet_bits = available - host_bits;

        Ok(Self {
            network,
            host_bits,
            subnet_bits,
            rotation: BitRotation::new(prefix_len, host_bits, subnet_bits),
            skipped: Vec::new(),
            state: Mutex::new(AllocationState::default()),
        })
    }

    /// Get the cluster network
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Get the number of host bits per subnet
    pub fn host_bits(&self) -> u32 {
        self.host_bits
    }

    /// Get the number of subnet index bits
    pub fn subnet_bits(&self) -> u32 {
        self.subnet_bits
    }

    /// Prefix length of every subnet handed out
    pub fn subnet_prefix_len(&self) -> u8 {
        // prefix + subnet bits never exceeds 32
        self.network.prefix_len() + self.subnet_bits as u8
    }

    /// Total number of subnets in the network
    pub fn capacity(&self) -> u64 {
        1u64 << self.subnet_bits
    }

    /// Seed entries rejected at construction
    pub fn skipped_seeds(&self) -> &[SkippedSeed] {
        &self.skipped
    }

    /// Check if a subnet lies within the cluster network
    pub fn contains(&self, subnet: &Ipv4Net) -> bool {
        self.network.contains(subnet)
    }

    /// Build the subnet for a raw index
    fn subnet_at(&self, index: u64) -> Result<Ipv4Net> {
        let base = u32::from(self.network.network());
        // index < 2^subnet_bits <= 2^31
        let offset = self.rotation.offset(index as u32, self.host_bits);
        Ok(Ipv4Net::new(
            Ipv4Addr::from(base | offset),
            self.subnet_prefix_len(),
        )?)
    }

    fn parse_seed(&self, entry: &str) -> Result<Ipv4Net> {
        let subnet = Ipv4Net::from_str(entry.trim())?.trunc();
        self.check_range(&subnet)?;
        self.check_prefix(&subnet)?;
        Ok(subnet)
    }

    fn check_range(&self, subnet: &Ipv4Net) -> Result<()> {
        if !self.contains(subnet) {
            return Err(Error::SubnetOutOfRange(
                subnet.to_string(),
                self.network.to_string(),
            ));
        }
        Ok(())
    }

    fn check_prefix(&self, subnet: &Ipv4Net) -> Result<()> {
        if subnet.prefix_len() != self.subnet_prefix_len() {
            return Err(Error::InvalidCidr(format!(
                "{} does not have prefix length /{}",
                subnet,
                self.subnet_prefix_len()
            )));
        }
        Ok(())
    }
}

impl SubnetPool for SubnetAllocator {
    fn allocate(&self) -> Result<Ipv4Net> {
        let capacity = self.capacity();
        let mut state = self.state.lock();

        for i in 0..capacity {
            let index = (i + state.next) % capacity;
            let subnet = self.subnet_at(index)?;

            if state.allocated.get(&subnet).copied().unwrap_or(false) {
                continue;
            }

            state.allocated.insert(subnet, true);
            state.next = (index + 1) % capacity;

            tracing::debug!(
                network = %self.network,
                subnet = %subnet,
                "Allocated subnet"
            );
            return Ok(subnet);
        }

        state.next = 0;
        tracing::warn!(network = %self.network, "No subnets available");
        Err(Error::SubnetsExhausted(self.network.to_string()))
    }

    fn release(&self, subnet: &Ipv4Net) -> Result<()> {
        let subnet = subnet.trunc();
        self.check_range(&subnet)?;

        let mut state = self.state.lock();
        match state.allocated.get_mut(&subnet) {
            Some(in_use) if *in_use => {
                *in_use = false;
                tracing::debug!(
                    network = %self.network,
                    subnet = %subnet,
                    "Released subnet"
                );
                Ok(())
            }
            _ => Err(Error::SubnetNotAllocated(subnet.to_string())),
        }
    }

    fn mark_allocated(&self, subnet: &Ipv4Net) -> Result<()> {
        let subnet = subnet.trunc();
        self.check_range(&subnet)?;
        self.check_prefix(&subnet)?;

        let mut state = self.state.lock();
        let in_use = state.allocated.entry(subnet).or_insert(false);
        if *in_use {
            return Err(Error::SubnetAlreadyAllocated(subnet.to_string()));
        }
        *in_use = true;

        tracing::debug!(
            network = %self.network,
            subnet = %subnet,
            "Marked subnet allocated"
        );
        Ok(())
    }

    fn is_allocated(&self, subnet: &Ipv4Net) -> bool {
        let subnet = subnet.trunc();
        self.state
            .lock()
            .allocated
            .get(&subnet)
            .copied()
            .unwrap_or(false)
    }

    fn usage(&self) -> SubnetUsage {
        let state = self.state.lock();
        SubnetUsage {
            allocated: state.allocated.values().filter(|&&in_use| in_use).count() as u64,
            capacity: self.capacity(),
        }
    }

    fn allocated_subnets(&self) -> Vec<Ipv4Net> {
        let state = self.state.lock();
        let mut subnets: Vec<Ipv4Net> = state
            .allocated
            .iter()
            .filter(|&(_, &in_use)| in_use)
            .map(|(subnet, _)| *subnet)
            .collect();
        subnets.sort();
        subnets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_SEEDS: &[&str] = &[];

    fn net(s: &str) -> Ipv4Net {
        Ipv4Net::from_str(s).unwrap()
    }

    #[test]
    fn test_allocator_creation() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();

        assert_eq!(allocator.network(), net("10.1.0.0/16"));
        assert_eq!(allocator.host_bits(), 8);
        assert_eq!(allocator.subnet_bits(), 8);
        assert_eq!(allocator.subnet_prefix_len(), 24);
        assert_eq!(allocator.capacity(), 256);
        assert!(allocator.allocated_subnets().is_empty());
    }

    #[test]
    fn test_network_is_truncated() {
        let allocator = SubnetAllocator::new("10.1.2.3/16", 8, NO_SEEDS).unwrap();
        assert_eq!(allocator.network(), net("10.1.0.0/16"));
    }

    #[test]
    fn test_invalid_network() {
        let result = SubnetAllocator::new("10.1.0.0", 8, NO_SEEDS);
        assert!(matches!(result, Err(Error::InvalidCidr(_))));

        let result = SubnetAllocator::new("not-a-cidr", 8, NO_SEEDS);
        assert!(matches!(result, Err(Error::InvalidCidr(_))));
    }

    #[test]
    fn test_invalid_host_bits() {
        let result = SubnetAllocator::new("10.1.0.0/16", 0, NO_SEEDS);
        assert!(matches!(
            result,
            Err(Error::InvalidHostBits {
                host_bits: 0,
                available: 16
            })
        ));

        let result = SubnetAllocator::new("10.1.0.0/16", 17, NO_SEEDS);
        assert!(matches!(result, Err(Error::InvalidHostBits { .. })));
    }

    #[test]
    fn test_host_bits_consume_whole_network() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 16, NO_SEEDS).unwrap();
        assert_eq!(allocator.capacity(), 1);

        assert_eq!(allocator.allocate().unwrap(), net("10.1.0.0/16"));
        assert!(matches!(
            allocator.allocate(),
            Err(Error::SubnetsExhausted(_))
        ));
    }

    #[test]
    fn test_allocate_sequential() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();

        assert_eq!(allocator.allocate().unwrap(), net("10.1.0.0/24"));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.1.0/24"));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.2.0/24"));
    }

    #[test]
    fn test_release_does_not_rewind() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();

        let first = allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        allocator.release(&first).unwrap();

        // Round-robin continues past the freed subnet
        assert_eq!(allocator.allocate().unwrap(), net("10.1.2.0/24"));
        assert!(!allocator.is_allocated(&first));
    }

    #[test]
    fn test_released_subnet_reused_after_wrap() {
        let allocator = SubnetAllocator::new("10.1.0.0/22", 8, NO_SEEDS).unwrap();

        let subnets: Vec<_> = (0..4).map(|_| allocator.allocate().unwrap()).collect();
        allocator.release(&subnets[1]).unwrap();

        assert_eq!(allocator.allocate().unwrap(), subnets[1]);
        assert!(matches!(
            allocator.allocate(),
            Err(Error::SubnetsExhausted(_))
        ));
    }

    #[test]
    fn test_exhaustion_resets_cursor() {
        let allocator = SubnetAllocator::new("10.1.0.0/22", 8, NO_SEEDS).unwrap();
        for _ in 0..4 {
            allocator.allocate().unwrap();
        }
        assert!(allocator.allocate().is_err());

        allocator.release(&net("10.1.3.0/24")).unwrap();
        allocator.release(&net("10.1.1.0/24")).unwrap();

        // Search restarts from index 0 after exhaustion
        assert_eq!(allocator.allocate().unwrap(), net("10.1.1.0/24"));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.3.0/24"));
    }

    #[test]
    fn test_double_release() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();
        let subnet = allocator.allocate().unwrap();

        allocator.release(&subnet).unwrap();
        let result = allocator.release(&subnet);
        assert!(matches!(result, Err(Error::SubnetNotAllocated(_))));
    }

    #[test]
    fn test_release_never_allocated() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();
        let result = allocator.release(&net("10.1.7.0/24"));
        assert!(matches!(result, Err(Error::SubnetNotAllocated(_))));
    }

    #[test]
    fn test_release_out_of_range() {
        let allocator = SubnetAllocator::new("10.0.0.0/16", 8, NO_SEEDS).unwrap();
        let result = allocator.release(&net("192.168.0.0/24"));
        assert!(matches!(result, Err(Error::SubnetOutOfRange(_, _))));
    }

    #[test]
    fn test_seeded_subnets_are_skipped() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, &["10.1.0.0/24", "10.1.2.0/24"])
            .unwrap();

        assert!(allocator.is_allocated(&net("10.1.0.0/24")));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.1.0/24"));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.3.0/24"));
        assert_eq!(allocator.usage().allocated, 4);
    }

    #[test]
    fn test_bad_seeds_are_recorded() {
        let allocator = SubnetAllocator::new(
            "10.1.0.0/16",
            8,
            &["garbage", "192.168.0.0/24", "10.1.0.0/23", "10.1.5.0/24"],
        )
        .unwrap();

        let skipped: Vec<_> = allocator
            .skipped_seeds()
            .iter()
            .map(|s| s.entry.as_str())
            .collect();
        assert_eq!(skipped, vec!["garbage", "192.168.0.0/24", "10.1.0.0/23"]);
        assert!(matches!(
            allocator.skipped_seeds()[1].reason,
            Error::SubnetOutOfRange(_, _)
        ));
        assert_eq!(allocator.allocated_subnets(), vec![net("10.1.5.0/24")]);
    }

    #[test]
    fn test_mark_allocated() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();

        allocator.mark_allocated(&net("10.1.0.0/24")).unwrap();
        assert_eq!(allocator.allocate().unwrap(), net("10.1.1.0/24"));

        let result = allocator.mark_allocated(&net("10.1.1.0/24"));
        assert!(matches!(result, Err(Error::SubnetAlreadyAllocated(_))));

        let result = allocator.mark_allocated(&net("10.1.0.0/25"));
        assert!(matches!(result, Err(Error::InvalidCidr(_))));

        let result = allocator.mark_allocated(&net("10.2.0.0/24"));
        assert!(matches!(result, Err(Error::SubnetOutOfRange(_, _))));
    }

    #[test]
    fn test_mark_released_subnet() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 8, NO_SEEDS).unwrap();
        let subnet = allocator.allocate().unwrap();
        allocator.release(&subnet).unwrap();

        allocator.mark_allocated(&subnet).unwrap();
        assert!(allocator.is_allocated(&subnet));
    }

    #[test]
    fn test_usage() {
        let allocator = SubnetAllocator::new("192.168.0.0/24", 4, NO_SEEDS).unwrap();
        let a = allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        allocator.release(&a).unwrap();

        let usage = allocator.usage();
        assert_eq!(usage.allocated, 1);
        assert_eq!(usage.capacity, 16);
        assert_eq!(usage.available(), 15);
    }

    #[test]
    fn test_allocated_subnets_sorted() {
        let allocator =
            SubnetAllocator::new("10.1.0.0/16", 8, &["10.1.9.0/24", "10.1.3.0/24"]).unwrap();
        allocator.allocate().unwrap();

        assert_eq!(
            allocator.allocated_subnets(),
            vec![net("10.1.0.0/24"), net("10.1.3.0/24"), net("10.1.9.0/24")]
        );
    }

    #[test]
    fn test_rotated_allocation_order() {
        let allocator = SubnetAllocator::new("10.1.0.0/16", 6, NO_SEEDS).unwrap();

        assert_eq!(allocator.allocate().unwrap(), net("10.1.0.0/26"));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.1.0/26"));
        assert_eq!(allocator.allocate().unwrap(), net("10.1.2.0/26"));
    }
}

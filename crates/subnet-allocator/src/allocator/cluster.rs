//! Multi-network subnet allocator
//!
//! Puts several cluster networks behind one [`SubnetPool`]. Allocation tries
//! the networks in configured order; release and mark are routed to the
//! network that contains the subnet.

use super::subnet_allocator::{SkippedSeed, SubnetAllocator, SubnetPool, SubnetUsage};
use crate::config::ClusterNetworkConfig;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::str::FromStr;

/// Subnet allocator spanning every configured cluster network
#[derive(Debug)]
pub struct ClusterSubnetAllocator {
    ranges: Vec<SubnetAllocator>,
    skipped: Vec<SkippedSeed>,
}

impl ClusterSubnetAllocator {
    /// Create from per-network allocators; networks must not overlap
    pub fn new(ranges: Vec<SubnetAllocator>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one cluster network is required".to_string(),
            ));
        }

        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                if a.contains(&b.network()) || b.contains(&a.network()) {
                    return Err(Error::CidrOverlap(
                        a.network().to_string(),
                        b.network().to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            ranges,
            skipped: Vec::new(),
        })
    }

    /// Build allocators for every configured network, seeding each with the
    /// `in_use` subnets it contains
    pub fn from_config<S: AsRef<str>>(
        config: &ClusterNetworkConfig,
        in_use: &[S],
    ) -> Result<Self> {
        config.validate()?;

        let networks: Vec<Ipv4Net> = config.cluster_networks.iter().map(|e| e.cidr).collect();
        let mut seeds: Vec<Vec<&str>> = vec![Vec::new(); networks.len()];
        let mut skipped = Vec::new();

        for entry in in_use {
            let entry = entry.as_ref();
            let owner = Ipv4Net::from_str(entry.trim())
                .map_err(Error::from)
                .and_then(|subnet| {
                    networks
                        .iter()
                        .position(|network| network.contains(&subnet.trunc()))
                        .ok_or_else(|| {
                            Error::SubnetOutOfRange(subnet.to_string(), join(&networks))
                        })
                });

            match owner {
                Ok(i) => seeds[i].push(entry),
                Err(reason) => {
                    tracing::warn!(
                        entry = %entry,
                        error = %reason,
                        "Skipping in-use subnet"
                    );
                    skipped.push(SkippedSeed {
                        entry: entry.to_string(),
                        reason,
                    });
                }
            }
        }

        let mut ranges = Vec::with_capacity(networks.len());
        for (entry, seeds) in config.cluster_networks.iter().zip(&seeds) {
            let allocator = SubnetAllocator::new(
                &entry.cidr.to_string(),
                entry.host_subnet_length,
                seeds.as_slice(),
            )?;
            skipped.extend_from_slice(allocator.skipped_seeds());
            ranges.push(allocator);
        }

        let mut allocator = Self::new(ranges)?;
        allocator.skipped = skipped;
        Ok(allocator)
    }

    /// Get the per-network allocators, in allocation order
    pub fn ranges(&self) -> &[SubnetAllocator] {
        &self.ranges
    }

    /// Seed entries rejected at construction, across all networks
    pub fn skipped_seeds(&self) -> &[SkippedSeed] {
        &self.skipped
    }

    fn range_for(&self, subnet: &Ipv4Net) -> Result<&SubnetAllocator> {
        self.ranges
            .iter()
            .find(|range| range.contains(subnet))
            .ok_or_else(|| Error::SubnetOutOfRange(subnet.to_string(), self.networks()))
    }

    fn networks(&self) -> String {
        let networks: Vec<Ipv4Net> = self.ranges.iter().map(|r| r.network()).collect();
        join(&networks)
    }
}

fn join(networks: &[Ipv4Net]) -> String {
    networks
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SubnetPool for ClusterSubnetAllocator {
    fn allocate(&self) -> Result<Ipv4Net> {
        for range in &self.ranges {
            match range.allocate() {
                Ok(subnet) => return Ok(subnet),
                Err(Error::SubnetsExhausted(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::SubnetsExhausted(self.networks()))
    }

    fn release(&self, subnet: &Ipv4Net) -> Result<()> {
        self.range_for(&subnet.trunc())?.release(subnet)
    }

    fn mark_allocated(&self, subnet: &Ipv4Net) -> Result<()> {
        self.range_for(&subnet.trunc())?.mark_allocated(subnet)
    }

    fn is_allocated(&self, subnet: &Ipv4Net) -> bool {
        self.range_for(&subnet.trunc())
            .map(|range| range.is_allocated(subnet))
            .unwrap_or(false)
    }

    fn usage(&self) -> SubnetUsage {
        self.ranges
            .iter()
            .fold(SubnetUsage::default(), |total, range| total + range.usage())
    }

    fn allocated_subnets(&self) -> Vec<Ipv4Net> {
        let mut subnets: Vec<Ipv4Net> = self
            .ranges
            .iter()
            .flat_map(|range| range.allocated_subnets())
            .collect();
        subnets.sort();
        subnets
    }
}

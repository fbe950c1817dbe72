//! Cluster network configuration
//!
//! Describes the cluster networks host subnets are carved from. Accepts the
//! camelCase JSON shape SDN master configs use:
//!
//! ```json
//! {
//!   "clusterNetworks": [
//!     { "cidr": "10.128.0.0/14", "hostSubnetLength": 9 }
//!   ]
//! }
//! ```

use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// One cluster network and the size of the host subnets carved from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    /// Cluster network CIDR
    pub cidr: Ipv4Net,
    /// Host bits per node subnet
    pub host_subnet_length: u32,
}

impl ClusterNetworkEntry {
    /// Create a new entry
    pub fn new(cidr: Ipv4Net, host_subnet_length: u32) -> Self {
        Self {
            cidr,
            host_subnet_length,
        }
    }

    /// Validate host subnet length against the CIDR
    pub fn validate(&self) -> Result<()> {
        let available = 32 - u32::from(self.cidr.prefix_len());
        if self.host_subnet_length == 0 || self.host_subnet_length > available {
            return Err(Error::InvalidHostBits {
                host_bits: self.host_subnet_length,
                available,
            });
        }
        Ok(())
    }
}

/// Cluster network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkConfig {
    /// Cluster networks, tried in order when allocating
    pub cluster_networks: Vec<ClusterNetworkEntry>,
}

impl Default for ClusterNetworkConfig {
    fn default() -> Self {
        Self {
            cluster_networks: vec![ClusterNetworkEntry::new(
                Ipv4Net::new_assert(Ipv4Addr::new(10, 128, 0, 0), 14),
                9,
            )],
        }
    }
}

impl ClusterNetworkConfig {
    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    /// Check that the config describes at least one valid, non-overlapping network
    pub fn validate(&self) -> Result<()> {
        if self.cluster_networks.is_empty() {
            return Err(Error::Config(
                "at least one cluster network is required".to_string(),
            ));
        }

        for entry in &self.cluster_networks {
            entry.validate()?;
        }

        for (i, a) in self.cluster_networks.iter().enumerate() {
            for b in &self.cluster_networks[i + 1..] {
                if a.cidr.contains(&b.cidr) || b.cidr.contains(&a.cidr) {
                    return Err(Error::CidrOverlap(a.cidr.to_string(), b.cidr.to_string()));
                }
            }
        }

        Ok(())
    }
}

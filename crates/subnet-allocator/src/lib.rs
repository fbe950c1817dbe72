//! Cluster Subnet Allocator
//!
//! Partitions IPv4 cluster networks into fixed-size host subnets for SDN nodes:
//! - Round-robin allocation so freed subnets aren't reused immediately
//! - Octet-friendly index rotation for host bit counts that aren't multiples of 8
//! - Double-release and out-of-range release detection
//! - Tolerant seeding from previously persisted leases
//! - Multiple cluster networks behind one pool
//!
//! Allocators are plain in-process values guarded by an internal lock; share
//! them as `Arc<SubnetAllocator>`. Persisting leases is the caller's job.
//!
//! ```
//! use subnet_allocator::{SubnetAllocator, SubnetPool};
//!
//! let allocator = SubnetAllocator::new("10.1.0.0/16", 8, &["10.1.0.0/24"]).unwrap();
//! let subnet = allocator.allocate().unwrap();
//! assert_eq!(subnet.to_string(), "10.1.1.0/24");
//! allocator.release(&subnet).unwrap();
//! ```

pub mod allocator;
pub mod config;
pub mod error;

// Re-export core types
pub use allocator::{
    BitRotation, ClusterSubnetAllocator, SkippedSeed, SubnetAllocator, SubnetPool, SubnetUsage,
};
pub use config::{ClusterNetworkConfig, ClusterNetworkEntry};
pub use error::{Error, Result};

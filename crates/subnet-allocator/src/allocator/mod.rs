//! Host subnet allocation
//!
//! Provides:
//! - Round-robin host subnet leases from a single cluster network
//! - A cluster-wide pool spanning several cluster networks

mod cluster;
mod rotation;
mod subnet_allocator;

pub use cluster::ClusterSubnetAllocator;
pub use rotation::BitRotation;
pub use subnet_allocator::{SkippedSeed, SubnetAllocator, SubnetPool, SubnetUsage};

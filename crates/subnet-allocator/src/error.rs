//! Error types for subnet allocation

use thiserror::Error;

/// Result type for subnet allocation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Subnet allocator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid host bits {host_bits}: must be between 1 and {available}")]
    InvalidHostBits { host_bits: u32, available: u32 },

    #[error("CIDR overlap detected: {0} overlaps with {1}")]
    CidrOverlap(String, String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Allocation errors
    #[error("No subnets available in {0}")]
    SubnetsExhausted(String),

    #[error("Subnet {0} doesn't belong to the network {1}")]
    SubnetOutOfRange(String, String),

    #[error("Subnet {0} is not allocated, it is already available")]
    SubnetNotAllocated(String),

    #[error("Subnet {0} is already allocated")]
    SubnetAlreadyAllocated(String),

    // General errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<ipnet::AddrParseError> for Error {
    fn from(e: ipnet::AddrParseError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}

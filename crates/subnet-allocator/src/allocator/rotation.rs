//! Subnet index to address mapping
//!
//! In the simple case a subnet's address is its index shifted left by the
//! host bits. When the host bits are not a multiple of 8 and the subnet field
//! spills past the octet holding the top host bit, the index is rotated so
//! that the low-order index bits land in the next octet up. With a /16 and
//! 6 host bits this yields `x.y.0.0/26`, `x.y.1.0/26`, ... `x.y.255.0/26`
//! before `x.y.0.64/26`, so neighbouring subnets never share a dotted
//! third octet.

/// Precomputed shift and mask constants for a (prefix, host bits) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRotation {
    left_shift: u32,
    left_mask: u32,
    right_shift: u32,
    right_mask: u32,
}

impl BitRotation {
    /// Compute the rotation for a network of `prefix_len` carved into
    /// subnets with `host_bits` host bits and `subnet_bits` index bits.
    ///
    /// Callers guarantee `host_bits > 0` and
    /// `prefix_len + host_bits + subnet_bits == 32`.
    pub fn new(prefix_len: u32, host_bits: u32, subnet_bits: u32) -> Self {
        let spills = (host_bits - 1) / 8 != (host_bits + subnet_bits - 1) / 8;

        if host_bits % 8 != 0 && spills {
            let left_shift = 8 - host_bits % 8;
            Self {
                left_shift,
                left_mask: low_bits(32 - prefix_len),
                right_shift: subnet_bits - left_shift,
                right_mask: low_bits(left_shift) << host_bits,
            }
        } else {
            Self::identity()
        }
    }

    /// Rotation that leaves the shifted index untouched
    pub const fn identity() -> Self {
        Self {
            left_shift: 0,
            left_mask: u32::MAX,
            right_shift: 0,
            right_mask: 0,
        }
    }

    /// Whether this rotation changes anything
    pub fn is_active(&self) -> bool {
        self.left_shift != 0
    }

    /// Map a subnet index onto the offset to OR into the base network address
    pub fn offset(&self, index: u32, host_bits: u32) -> u32 {
        let shifted = index.checked_shl(host_bits).unwrap_or(0);
        ((shifted << self.left_shift) & self.left_mask)
            | ((shifted >> self.right_shift) & self.right_mask)
    }
}

/// Mask with the lowest `n` bits set, `n` in `0..=32`
fn low_bits(n: u32) -> u32 {
    if n >= 32 {
        u32::MAX
    } else {
        (1u32 << n) - 1
    }
}

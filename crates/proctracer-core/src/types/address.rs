//! Target process memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address in the tracee's address space.
///
/// A newtype around `u64` so addresses can't be silently mixed with byte
/// counts, register values, or thread identifiers.
///
/// ## Example
///
/// ```rust
/// use proctracer_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0).
    pub const ZERO: Self = Address(0);

    /// Create a new address from a raw value. Usable in const contexts.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address.
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset, returning `None` on overflow.
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset, returning `None` on underflow.
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset, saturating at `u64::MAX`.
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn checked_add_overflows_to_none()
    {
        assert_eq!(Address::from(u64::MAX).checked_add(1), None);
        assert_eq!(Address::from(0).checked_add(1), Some(Address::from(1)));
    }

    #[test]
    fn checked_sub_underflows_to_none()
    {
        assert_eq!(Address::ZERO.checked_sub(1), None);
        assert_eq!(Address::from(5).checked_sub(5), Some(Address::ZERO));
    }

    #[test]
    fn ordering_matches_raw_value()
    {
        assert!(Address::from(0x100) < Address::from(0x200));
    }

    #[test]
    fn display_is_zero_padded_hex()
    {
        assert_eq!(Address::from(0x1234).to_string(), "0x0000000000001234");
    }
}

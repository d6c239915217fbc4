//! Target address type.

use std::fmt;
use std::ops::{Add, Range, Sub};

/// Strongly typed target address
///
/// Load addresses reported by the loader, section VMAs and code addresses
/// all travel as `Address`, which keeps them from being mixed up with sizes
/// and relocation deltas.
///
/// ## Example
///
/// ```rust
/// use xcoffdb_core::types::Address;
///
/// let text = Address::from(0x1000_0000u32);
/// let next = text + 0x200;
/// assert_eq!(next.value(), 0x1000_0200);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address; usable in const contexts.
    ///
    /// ```rust
    /// use xcoffdb_core::types::Address;
    ///
    /// const TEXT_SEGMENT_BASE: Address = Address::new(0x1000_0000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset, returning `None` on overflow.
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Shift by a signed relocation delta, wrapping like the target's pointer arithmetic.
    #[must_use]
    pub fn offset_by(self, delta: i64) -> Self
    {
        Address(self.0.wrapping_add_signed(delta))
    }

    /// Signed distance from `origin` to `self`.
    ///
    /// ```rust
    /// use xcoffdb_core::types::Address;
    ///
    /// let linked = Address::new(0x1000_0128);
    /// let loaded = Address::new(0xd000_0128);
    /// assert_eq!(loaded.delta_from(linked), 0xc000_0000);
    /// assert_eq!(linked.delta_from(loaded), -0xc000_0000);
    /// ```
    #[allow(clippy::cast_possible_wrap)]
    pub const fn delta_from(self, origin: Address) -> i64
    {
        self.0.wrapping_sub(origin.0) as i64
    }

    /// Whether the address lies in `[start, end)`.
    pub fn within(self, range: &Range<Address>) -> bool
    {
        range.start <= self && self < range.end
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<u32> for Address
{
    fn from(value: u32) -> Self
    {
        Address(u64::from(value))
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
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
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

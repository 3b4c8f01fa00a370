//! Defines the [`Relocatable`] type.

use std::fmt;

use num_traits::ToPrimitive;
use starknet_types_core::felt::Felt;

use crate::error::Error;

/// A pointer within a [`Memory`](super::Memory) segment.
///
/// The segment index can be thought of as the provenance of the pointer: two
/// pointers are only comparable by distance when they share it. Ordering and
/// equality compare the segment first, then the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relocatable {
    /// The index of the segment in the memory.
    pub segment: u32,
    /// The offset within the segment.
    pub offset: u32,
}

impl Relocatable {
    /// Creates a new [`Relocatable`] from a segment index and an offset.
    #[inline(always)]
    pub const fn new(segment: u32, offset: u32) -> Self {
        Self { segment, offset }
    }

    /// Adds a field element to the offset of this pointer.
    ///
    /// The addition is performed in the field, so a "negative" field element
    /// (the additive inverse of a small integer) moves the pointer backwards.
    /// The resulting offset must fit in 32 bits, else [`Error::OffsetOverflow`]
    /// is returned.
    pub fn add_felt(self, value: &Felt) -> Result<Self, Error> {
        let offset = (Felt::from(self.offset) + value)
            .to_u32()
            .ok_or(Error::OffsetOverflow)?;

        Ok(Self {
            segment: self.segment,
            offset,
        })
    }

    /// Subtracts a field element from the offset of this pointer.
    pub fn sub_felt(self, value: &Felt) -> Result<Self, Error> {
        let offset = (Felt::from(self.offset) - value)
            .to_u32()
            .ok_or(Error::OffsetOverflow)?;

        Ok(Self {
            segment: self.segment,
            offset,
        })
    }

    /// Advances the pointer by a fixed number of cells.
    pub fn add_offset(self, offset: u32) -> Result<Self, Error> {
        let offset = self
            .offset
            .checked_add(offset)
            .ok_or(Error::OffsetOverflow)?;

        Ok(Self {
            segment: self.segment,
            offset,
        })
    }

    /// Returns the signed distance between `self` and `other` as a field
    /// element, given that both refer to the same segment.
    pub fn sub(self, other: Self) -> Result<Felt, Error> {
        if self.segment != other.segment {
            Err(Error::CrossSegmentSub)
        } else {
            Ok(Felt::from(self.offset) - Felt::from(other.offset))
        }
    }
}

impl fmt::Display for Relocatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

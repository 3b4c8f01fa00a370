//! Defines the [`Memory`] type, responsible for representing the memory of a
//! Cairo virtual machine.
//!
//! # Immutable Memory
//!
//! The memory of a Cairo virtual machine does not work the way regular
//! computer memory does. It is mathematically immutable: every operation that
//! would normally mutate memory instead *asserts* a previously unknown cell
//! to a specific value. Once asserted, a cell may only ever be rewritten with
//! that same value; anything else is an inconsistency and aborts the step.
//!
//! # Segments
//!
//! The address space of the machine has the size of the field and cannot be
//! represented directly, so programs split their memory into *segments*. Each
//! segment is a contiguous block located *somewhere* in the address space,
//! with its final position only decided after the program has finished
//! running. Segments are created by the surrounding allocator and only ever
//! grow.

mod relocatable;
mod segment;
mod value;

pub use self::relocatable::*;
pub use self::segment::*;
pub use self::value::*;

use crate::error::Error;

/// Represents the memory of the Cairo virtual machine.
///
/// More information on the memory model can be found in the
/// [module-level documentation](self).
#[derive(Default, Debug, Clone)]
pub struct Memory {
    /// The segments that have been initialized in the memory.
    segments: Vec<Segment>,
}

impl Memory {
    /// Creates a new [`Memory`] with no segments.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Returns the number of segments currently allocated.
    #[inline(always)]
    pub fn segment_count(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Appends a new empty segment to the memory and returns its index.
    pub fn add_segment(&mut self) -> u32 {
        self.segments.push(Segment::new());
        (self.segments.len() - 1) as u32
    }

    /// Returns a [`Segment`] of the memory, or [`Error::SegmentOutOfBounds`]
    /// if the index was never allocated.
    pub fn segment(&self, segment: u32) -> Result<&Segment, Error> {
        let segments = self.segment_count();
        self.segments
            .get(segment as usize)
            .ok_or(Error::SegmentOutOfBounds { segment, segments })
    }

    /// Returns the value of the memory cell at `addr`, or `None` if the cell
    /// is still unknown.
    ///
    /// This is a pure read: unknown cells are *not* materialized, and an
    /// unknown cell is distinct from a cell holding zero.
    pub fn get(&self, addr: Relocatable) -> Result<Option<&Value>, Error> {
        Ok(self.segment(addr.segment)?.get(addr.offset))
    }

    /// Returns the value of the memory cell at `addr`, or
    /// [`Error::UndefinedValue`] if the cell is still unknown.
    pub fn get_required(&self, addr: Relocatable) -> Result<&Value, Error> {
        self.get(addr)?.ok_or(Error::UndefinedValue(addr))
    }

    /// Asserts the memory cell at `addr` to `value`.
    ///
    /// If the cell is unknown it takes the provided value. If it was already
    /// asserted, the new value must match the old one exactly, else
    /// [`Error::InconsistentMemory`] is returned. This is the only place in
    /// the crate where that error is raised.
    pub fn insert(&mut self, addr: Relocatable, value: Value) -> Result<(), Error> {
        let segments = self.segment_count();
        let segment = self
            .segments
            .get_mut(addr.segment as usize)
            .ok_or(Error::SegmentOutOfBounds {
                segment: addr.segment,
                segments,
            })?;

        match segment.get(addr.offset) {
            Some(&known) if known != value => Err(Error::InconsistentMemory(addr, known, value)),
            Some(_) => Ok(()),
            None => {
                segment.set(addr.offset, value);
                Ok(())
            }
        }
    }
}

//! Defines the [`Builtin`] trait responsible for executing built-in
//! pre-defined functions, and the [`Bitwise`] implementation.
//!
//! # Blocks
//!
//! A builtin is bound to a memory segment and partitions it into fixed-size
//! blocks. The first cells of a block are *inputs*, written by the running
//! program; the remaining cells are *outputs*, defined as a pure function of
//! the inputs of the same block. Output cells are never written by the
//! program directly: they materialize when first read, and are then asserted
//! into memory through the regular write-once path.

use starknet_types_core::felt::Felt;

use crate::error::Error;
use crate::memory::{Relocatable, Segment};

/// A builtin function that the virtual machine can execute through memory
/// reads.
///
/// Implementations only describe the shape of a block and the pure output
/// function; the machinery that locates the block, gathers its inputs and
/// memoizes the result is shared.
pub trait Builtin {
    /// The number of memory cells in one block of the builtin's segment.
    fn cells_per_block(&self) -> u32;

    /// The number of input cells at the start of each block.
    fn input_cells_per_block(&self) -> u32;

    /// Computes the output cell `output_index` of a block from the block's
    /// input cells.
    fn compute(&self, inputs: &[Felt], output_index: u32) -> Result<Felt, Error>;

    /// Attempts to deduce the value of the memory cell at `addr` from the
    /// other cells of its block in `segment`.
    ///
    /// Returns `Ok(None)` when `addr` is an input cell, which the builtin
    /// never constrains. Input cells of the block must be known field
    /// elements, else [`Error::UndefinedValue`] or [`Error::ExpectedFelt`] is
    /// returned.
    fn deduce(&self, addr: Relocatable, segment: &Segment) -> Result<Option<Felt>, Error> {
        let index = addr.offset % self.cells_per_block();
        let input_cells = self.input_cells_per_block();
        if index < input_cells {
            return Ok(None);
        }

        let base = addr.offset - index;
        let mut inputs = Vec::with_capacity(input_cells as usize);
        for cell in 0..input_cells {
            let cell_addr = Relocatable::new(addr.segment, base + cell);
            let value = segment
                .get(cell_addr.offset)
                .ok_or(Error::UndefinedValue(cell_addr))?;
            inputs.push(*value.scalar().ok_or(Error::ExpectedFelt(*value))?);
        }

        self.compute(&inputs, index - input_cells).map(Some)
    }
}

/// The bitwise builtin.
///
/// Each block holds five cells: the inputs `x` and `y`, followed by
/// `x & y`, `x ^ y` and `x | y`. The operations apply to the canonical
/// representatives of the inputs, which must fit in 251 bits so that every
/// output is itself canonical.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bitwise;

impl Builtin for Bitwise {
    fn cells_per_block(&self) -> u32 {
        5
    }

    fn input_cells_per_block(&self) -> u32 {
        2
    }

    fn compute(&self, inputs: &[Felt], output_index: u32) -> Result<Felt, Error> {
        let x = inputs[0].to_bytes_be();
        let y = inputs[1].to_bytes_be();

        // 2^251 in big-endian bytes is 0x08 followed by zeros, so the bound
        // check only needs the most significant byte.
        for (input, bytes) in inputs.iter().zip([&x, &y]) {
            if bytes[0] >= 0x08 {
                return Err(Error::BitwiseInputTooLarge(*input));
            }
        }

        let mut output = [0u8; 32];
        for (out, (x, y)) in output.iter_mut().zip(x.iter().zip(y.iter())) {
            *out = match output_index {
                0 => x & y,
                1 => x ^ y,
                _ => x | y,
            };
        }

        Ok(Felt::from_bytes_be(&output))
    }
}

//! Defines the [`Error`] type of the crate.

use starknet_types_core::felt::Felt;

use crate::memory::{Relocatable, Value};

/// An error that might occur when executing a Cairo program.
///
/// A single step of the virtual machine either succeeds or returns exactly one
/// of those errors to the caller, leaving memory and registers unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Bit 63 of an instruction word was set, or the word did not fit in 64
    /// bits in the first place.
    #[error("bit 63 of the instruction word is set")]
    HighBitSet,
    /// The `op1_src` flags of an instruction held an invalid value.
    #[error("invalid `op1_src` flag value {0}")]
    InvalidOp1Src(u64),
    /// The `res_logic` flags of an instruction held an invalid value.
    #[error("invalid `res_logic` flag value {0}")]
    InvalidResLogic(u64),
    /// The `pc_update` flags of an instruction held an invalid value.
    #[error("invalid `pc_update` flag value {0}")]
    InvalidPcUpdate(u64),
    /// The `ap_update` flags of an instruction held an invalid value.
    #[error("invalid `ap_update` flag value {0}")]
    InvalidApUpdate(u64),
    /// The `opcode` flags of an instruction held an invalid value.
    #[error("invalid `opcode` flag value {0}")]
    InvalidOpcode(u64),
    /// The `dst_reg` flag of an instruction held an invalid value.
    #[error("invalid `dst_reg` flag value {0}")]
    InvalidDstReg(u64),
    /// The `op0_reg` flag of an instruction held an invalid value.
    #[error("invalid `op0_reg` flag value {0}")]
    InvalidOp0Reg(u64),

    /// A memory cell was rewritten with a value that contradicts the one it
    /// was originally asserted to.
    #[error("memory at {0} was asserted to {1} and cannot be rewritten to {2}")]
    InconsistentMemory(Relocatable, Value, Value),
    /// A read or write referenced a segment that does not exist.
    #[error("segment {segment} does not exist (memory holds {segments} segments)")]
    SegmentOutOfBounds {
        /// The segment index that was accessed.
        segment: u32,
        /// The number of segments currently allocated.
        segments: u32,
    },
    /// A memory cell whose value is required by the current operation is
    /// still unknown.
    #[error("memory at {0} is unknown but its value is required")]
    UndefinedValue(Relocatable),

    /// A field element was expected but a pointer was found.
    #[error("expected a field element, found {0}")]
    ExpectedFelt(Value),
    /// A pointer was expected but a field element was found.
    #[error("expected a pointer, found {0}")]
    ExpectedRelocatable(Value),

    /// Pointer arithmetic produced an offset that does not fit in 32 bits.
    #[error("pointer offset does not fit in 32 bits")]
    OffsetOverflow,
    /// Two pointers with different segments were subtracted.
    #[error("cannot subtract pointers into different segments")]
    CrossSegmentSub,
    /// Attempted to divide by zero while back-solving an assertion.
    #[error("division by zero")]
    DivideByZero,

    /// An `AssertEq` instruction was missing an operand that could not be
    /// deduced from the others.
    #[error("cannot deduce the missing operand of an assertion")]
    UndeducibleOperand,
    /// The result of the instruction is required by a register update but the
    /// instruction does not constrain it.
    #[error("the result of the instruction is unconstrained but its value is required")]
    UnconstrainedRes,
    /// The memory cell referenced by the program counter held a pointer
    /// rather than an encoded instruction word.
    #[error("memory at {0} holds a pointer, not an encoded instruction")]
    InstructionError(Relocatable),

    /// An input of the bitwise builtin did not fit in 251 bits.
    #[error("bitwise builtin input {0} exceeds 251 bits")]
    BitwiseInputTooLarge(Felt),
}

//! Defines the [`Word`] and [`Instruction`] types, responsible for
//! representing a single Cairo bytecode instruction.
//!
//! # Wire format
//!
//! An instruction word is a 63-bit non-negative integer (bit 63 must be
//! zero). From the least significant bit:
//!
//! - bits `0..16` hold the destination offset,
//! - bits `16..32` hold the first operand offset,
//! - bits `32..48` hold the second operand offset,
//! - bits `48..63` hold the flags.
//!
//! Offsets are biased by `2^15`: the encoded 16-bit value `b` denotes the
//! signed offset `b - 2^15`.

use std::fmt;

use crate::error::Error;

/// A register the destination part of an instruction can be relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DstRegister {
    /// The **Allocation Pointer**.
    AP = 0,
    /// The **Frame Pointer**.
    FP = 1,
}

/// A register the first operand of an instruction can be relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op0Register {
    /// The **Allocation Pointer**.
    AP = 0,
    /// The **Frame Pointer**.
    FP = 1,
}

/// A register/object the second operand of an instruction can be relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op1Source {
    /// The pointer stored at the address of the first operand.
    Op0 = 0,
    /// The **Program Counter**. The operand is then the immediate value
    /// stored in the cell following the instruction word.
    PC = 1,
    /// The **Frame Pointer**.
    FP = 2,
    /// The **Allocation Pointer**.
    AP = 4,
}

/// A possible result logic to be applied to the first and second operands of
/// an instruction.
///
/// The discriminants of [`ResultLogic`] and [`OpCode`] occupy disjoint bit
/// ranges, so the union `op_code as u8 | result_logic as u8` is a single
/// unambiguous tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultLogic {
    /// The instruction does not constrain a result. Only decoded for
    /// conditional jumps.
    Unused = 0,
    /// The result is the value of the second operand.
    Op1 = 1,
    /// The result is the addition of the first and second operands.
    Add = 2,
    /// The result is the multiplication of the first and second operands.
    Mul = 4,
}

/// A possible way to update the **Program Counter** after the instruction has
/// been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PcUpdate {
    /// The size of the instruction is added to the **Program Counter**.
    Regular = 0,
    /// The **Program Counter** is set to the result of the instruction.
    AbsoluteJump = 1,
    /// The result of the instruction is added to the **Program Counter**.
    RelativeJump = 2,
    /// If the destination part of the instruction is zero, the **Program
    /// Counter** follows the [`PcUpdate::Regular`] rule. Otherwise, the
    /// second operand is added to it.
    ConditionalJump = 4,
}

/// A possible way to update the **Allocation Pointer** after the instruction
/// has been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApUpdate {
    /// The **Allocation Pointer** remains unchanged.
    None = 0,
    /// The result of the instruction is added to the **Allocation Pointer**.
    AddResult = 1,
    /// The **Allocation Pointer** is incremented by one.
    Increment = 2,
    /// The **Allocation Pointer** is incremented by two. Never encoded
    /// directly: this is what flag value zero decodes to in a `Call`
    /// instruction, which reserves two cells for the saved frame.
    Increment2 = 3,
}

/// A possible way to update the **Frame Pointer** after the instruction has
/// been executed.
///
/// This is not encoded in the instruction word; it is derived from the OP
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FpUpdate {
    /// The **Frame Pointer** remains unchanged.
    None = 0,
    /// The **Frame Pointer** is set to `ap + 2`, the base of the new frame.
    ApPlus2 = 1,
    /// The **Frame Pointer** is set to the destination of the instruction.
    Dst = 2,
}

/// The OP code of an instruction.
///
/// See [`ResultLogic`] for why the discriminants start at 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// The instruction does nothing specific.
    NoOp = 0,
    /// The instruction is calling into a subroutine.
    Call = 8,
    /// The instruction is returning from a subroutine.
    Ret = 16,
    /// The instruction is asserting a specific memory cell to a specific
    /// value.
    AssertEq = 32,
}

/// A single encoded Cairo instruction word, not yet decoded or validated.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Word(pub u64);

impl Word {
    /// Returns the offset applied to the destination part of the instruction.
    #[inline(always)]
    pub fn dst_offset(&self) -> i16 {
        (self.0 as u16).wrapping_sub(1 << 15) as i16
    }

    /// Returns the offset applied to the first operand of the instruction.
    #[inline(always)]
    pub fn op0_offset(&self) -> i16 {
        ((self.0 >> 16) as u16).wrapping_sub(1 << 15) as i16
    }

    /// Returns the offset applied to the second operand of the instruction.
    #[inline(always)]
    pub fn op1_offset(&self) -> i16 {
        ((self.0 >> 32) as u16).wrapping_sub(1 << 15) as i16
    }

    /// The register that the destination part of the instruction is relative
    /// to.
    #[inline(always)]
    pub fn dst_register(&self) -> Result<DstRegister, Error> {
        match (self.0 >> 48) & 0b1 {
            0 => Ok(DstRegister::AP),
            1 => Ok(DstRegister::FP),
            bits => Err(Error::InvalidDstReg(bits)),
        }
    }

    /// The register that the first operand of the instruction is relative to.
    #[inline(always)]
    pub fn op0_register(&self) -> Result<Op0Register, Error> {
        match (self.0 >> 49) & 0b1 {
            0 => Ok(Op0Register::AP),
            1 => Ok(Op0Register::FP),
            bits => Err(Error::InvalidOp0Reg(bits)),
        }
    }

    /// The source of the second operand of the instruction.
    #[inline(always)]
    pub fn op1_source(&self) -> Result<Op1Source, Error> {
        match (self.0 >> 50) & 0b111 {
            0 => Ok(Op1Source::Op0),
            1 => Ok(Op1Source::PC),
            2 => Ok(Op1Source::FP),
            4 => Ok(Op1Source::AP),
            bits => Err(Error::InvalidOp1Src(bits)),
        }
    }

    /// The result logic to be applied to the first and second operands of the
    /// instruction.
    ///
    /// Flag value zero always decodes to [`ResultLogic::Op1`] here; decoding
    /// it to [`ResultLogic::Unused`] under a conditional jump is the business
    /// of [`Instruction::decode`].
    #[inline(always)]
    pub fn result_logic(&self) -> Result<ResultLogic, Error> {
        match (self.0 >> 53) & 0b11 {
            0 => Ok(ResultLogic::Op1),
            1 => Ok(ResultLogic::Add),
            2 => Ok(ResultLogic::Mul),
            bits => Err(Error::InvalidResLogic(bits)),
        }
    }

    /// Returns the update rule to be applied to the **Program Counter** after
    /// the instruction has been executed.
    #[inline(always)]
    pub fn pc_update(&self) -> Result<PcUpdate, Error> {
        match (self.0 >> 55) & 0b111 {
            0 => Ok(PcUpdate::Regular),
            1 => Ok(PcUpdate::AbsoluteJump),
            2 => Ok(PcUpdate::RelativeJump),
            4 => Ok(PcUpdate::ConditionalJump),
            bits => Err(Error::InvalidPcUpdate(bits)),
        }
    }

    /// Returns the update rule to be applied to the **Allocation Pointer**
    /// after the instruction has been executed.
    ///
    /// Flag value zero always decodes to [`ApUpdate::None`] here; a `Call`
    /// instruction turns it into [`ApUpdate::Increment2`] during
    /// [`Instruction::decode`].
    #[inline(always)]
    pub fn ap_update(&self) -> Result<ApUpdate, Error> {
        match (self.0 >> 58) & 0b11 {
            0 => Ok(ApUpdate::None),
            1 => Ok(ApUpdate::AddResult),
            2 => Ok(ApUpdate::Increment),
            bits => Err(Error::InvalidApUpdate(bits)),
        }
    }

    /// Returns the OP code of the instruction.
    #[inline(always)]
    pub fn op_code(&self) -> Result<OpCode, Error> {
        match (self.0 >> 60) & 0b111 {
            0 => Ok(OpCode::NoOp),
            1 => Ok(OpCode::Call),
            2 => Ok(OpCode::Ret),
            4 => Ok(OpCode::AssertEq),
            bits => Err(Error::InvalidOpcode(bits)),
        }
    }

    /// Returns whether bit 63 of the word is set. A valid instruction word
    /// always has it cleared.
    #[inline(always)]
    pub const fn is_high_bit_set(&self) -> bool {
        self.0 >> 63 != 0
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Word")
            .field(&format_args!("{:#018x}", self.0))
            .finish()
    }
}

/// A fully decoded Cairo instruction.
///
/// Every field needed to execute one step is disambiguated here; the
/// cross-field legality rules of the whitepaper (such as the specific
/// offsets a `Call` must use) are enforced at execution time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The offset applied to the destination register.
    pub dst_offset: i16,
    /// The offset applied to the first operand register.
    pub op0_offset: i16,
    /// The offset applied to the second operand base.
    pub op1_offset: i16,
    /// The register the destination is relative to.
    pub dst_register: DstRegister,
    /// The register the first operand is relative to.
    pub op0_register: Op0Register,
    /// The base the second operand is relative to.
    pub op1_source: Op1Source,
    /// How the result of the instruction is computed.
    pub result_logic: ResultLogic,
    /// How the **Program Counter** is updated.
    pub pc_update: PcUpdate,
    /// How the **Allocation Pointer** is updated.
    pub ap_update: ApUpdate,
    /// How the **Frame Pointer** is updated. Derived from the OP code.
    pub fp_update: FpUpdate,
    /// The OP code of the instruction.
    pub op_code: OpCode,
}

impl Instruction {
    /// Decodes and validates an instruction [`Word`].
    pub fn decode(word: Word) -> Result<Self, Error> {
        if word.is_high_bit_set() {
            return Err(Error::HighBitSet);
        }

        let op_code = word.op_code()?;
        let pc_update = word.pc_update()?;

        // A conditional jump does not constrain a result; flag value zero
        // then means "unused" rather than "op1".
        let result_logic = match word.result_logic()? {
            ResultLogic::Op1 if pc_update == PcUpdate::ConditionalJump => ResultLogic::Unused,
            logic => logic,
        };

        // A `Call` reserves two cells for the saved frame pointer and return
        // address; flag value zero then means "increment by two".
        let ap_update = match word.ap_update()? {
            ApUpdate::None if op_code == OpCode::Call => ApUpdate::Increment2,
            update => update,
        };

        let fp_update = match op_code {
            OpCode::Call => FpUpdate::ApPlus2,
            OpCode::Ret => FpUpdate::Dst,
            _ => FpUpdate::None,
        };

        Ok(Self {
            dst_offset: word.dst_offset(),
            op0_offset: word.op0_offset(),
            op1_offset: word.op1_offset(),
            dst_register: word.dst_register()?,
            op0_register: word.op0_register()?,
            op1_source: word.op1_source()?,
            result_logic,
            pc_update,
            ap_update,
            fp_update,
            op_code,
        })
    }

    /// Returns the size of the instruction in memory cells: 2 when an
    /// immediate value follows the instruction word, 1 otherwise.
    #[inline(always)]
    pub const fn size(&self) -> u32 {
        match self.op1_source {
            Op1Source::PC => 2,
            _ => 1,
        }
    }
}

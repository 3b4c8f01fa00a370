//! # Groudon
//!
//! The execution core of a Cairo virtual machine.
//!
//! # Documentation
//!
//! - [The Cairo Whitepaper](https://www.cairo-lang.org/cairo-whitepaper/).

#![warn(missing_docs, missing_debug_implementations)]

use std::fmt;

use bitflags::bitflags;
use num_traits::ToPrimitive;
use starknet_types_core::felt::Felt;

use builtin::Builtin;
use cpu::Cpu;
use error::Error;
use instr::{
    ApUpdate, DstRegister, FpUpdate, Instruction, Op0Register, Op1Source, OpCode, PcUpdate,
    ResultLogic, Word,
};
use memory::{Memory, Relocatable, Value};
use trace::Trace;

pub mod builtin;
pub mod cpu;
pub mod error;
pub mod instr;
pub mod memory;
pub mod trace;

/// Contains the full state of a Cairo virtual machine.
///
/// This includes memory, registers and builtins. It can be used to execute a
/// Cairo program one step at a time and to gather execution information
/// through a [`Trace`] implementation.
///
/// # Field
///
/// Technically, the Cairo language allows any prime field to be used as the
/// underlying field for the virtual machine. In practice, the only field this
/// crate is meant to be used with is the Starknet field element [`Felt`],
/// whose prime is `2^251 + 17 * 2^192 + 1`. For this reason, it is not
/// possible to change the underlying field of the virtual machine.
///
/// # Components
///
/// The [`CairoVM`] is composed of two main components:
///
/// - [`Cpu`]: the register file of the machine, holding `pc`, `ap` and `fp`.
///
/// - [`Memory`]: the segmented, write-once memory. Instructions and working
///   memory are stored here.
///
/// Additionally, specific segments may be bound to [`Builtin`]s, turning the
/// output cells of those segments into pure functions of their input cells.
#[derive(Debug)]
pub struct CairoVM {
    /// The register file of the virtual machine.
    cpu: Cpu,
    /// The memory associated with the virtual machine.
    memory: Memory,
    /// The built-in functions that the virtual machine can execute.
    builtins: BuiltinManager,
}

impl CairoVM {
    /// Creates a new [`CairoVM`] from an initial register file and a
    /// populated memory.
    pub const fn new(cpu: Cpu, memory: Memory) -> Self {
        Self {
            cpu,
            memory,
            builtins: BuiltinManager::new(),
        }
    }

    /// Returns the current state of the [`Cpu`].
    #[inline(always)]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Returns the current state of the [`Memory`].
    #[inline(always)]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Returns a mutable reference to the [`Memory`], letting the surrounding
    /// allocator create segments and populate cells.
    #[inline(always)]
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Binds a [`Builtin`] to a memory segment.
    ///
    /// Unknown output cells of that segment now materialize when read,
    /// either through [`CairoVM::read`] or while resolving the operands of an
    /// instruction.
    pub fn register_builtin(&mut self, segment: u32, builtin: Box<dyn Builtin>) {
        self.builtins.bind(segment, builtin);
    }

    /// Reads the memory cell at `addr`, materializing builtin output cells
    /// on demand.
    ///
    /// A known cell is returned as-is. An unknown cell within a segment bound
    /// to a builtin is computed from the input cells of its block, asserted
    /// into memory through the write-once path (so later direct writes must
    /// match it), and returned. Anything else is [`Error::UndefinedValue`].
    pub fn read(&mut self, addr: Relocatable) -> Result<Value, Error> {
        if let Some(value) = self.memory.get(addr)? {
            return Ok(*value);
        }

        if let Some(value) = deduce_with_builtin(addr, self)? {
            self.memory.insert(addr, value)?;
            return Ok(value);
        }

        Err(Error::UndefinedValue(addr))
    }

    /// Advances the virtual machine by a single step, tracing events using
    /// the provided [`Trace`] implementation.
    ///
    /// A step either commits entirely, or fails with an [`Error`] and leaves
    /// registers and memory exactly as they were.
    pub fn step<T>(&mut self, trace: &mut T) -> Result<(), Error>
    where
        T: ?Sized + Trace,
    {
        let word = fetch_instruction(&self.cpu, &self.memory)?;
        let instruction = Instruction::decode(word)?;

        let mut ctx = StepContext::initial(instruction);
        compute_dst(&mut ctx, self)?;
        compute_op0(&mut ctx, self)?;
        compute_op1(&mut ctx, self)?;
        run_builtins(&mut ctx, self)?;
        deduce_from_op_code(&mut ctx, self)?;

        let res = compute_res(&ctx)?;
        apply_assertion(&mut ctx, res)?;
        require_operands(&ctx)?;
        update_registers(&mut ctx, self, res)?;

        // Deduced cells were unknown when they were deduced, so the only way
        // a commit could fail halfway through is two deductions targeting the
        // same cell with different values. Check for that before touching
        // memory, keeping failed steps free of partial effects.
        let inserts = ctx.pending_inserts();
        for (index, &(flag, addr, value)) in inserts.iter().enumerate() {
            if !ctx.flags.contains(flag) {
                continue;
            }
            for &(other_flag, other_addr, other_value) in &inserts[index + 1..] {
                if ctx.flags.contains(other_flag) && addr == other_addr && value != other_value {
                    return Err(Error::InconsistentMemory(addr, value, other_value));
                }
            }
        }

        // Everything has been validated against the pre-step state; make the
        // step's effects visible.
        for (flag, addr, value) in inserts {
            if ctx.flags.contains(flag) {
                self.memory.insert(addr, value)?;
                trace.memory_insert(addr, &value);
            }
        }

        self.cpu.pc = ctx.next_pc;
        self.cpu.ap = ctx.next_ap;
        self.cpu.fp = ctx.next_fp;
        trace.step_committed(&self.cpu);

        Ok(())
    }
}

/// The builtin manager is responsible for holding a collection of [`Builtin`]
/// implementations and running them when necessary.
///
/// # Segments
///
/// Each builtin is bound to one segment, which stores the mapped I/O data of
/// its blocks. The manager keeps track of which segment belongs to which
/// builtin.
struct BuiltinManager {
    /// The `(segment, builtin)` bindings established by the surrounding
    /// allocator.
    bindings: Vec<(u32, Box<dyn Builtin>)>,
}

impl BuiltinManager {
    /// Creates a new [`BuiltinManager`] with no bindings.
    const fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Binds a [`Builtin`] to a segment, replacing any previous binding for
    /// that segment.
    fn bind(&mut self, segment: u32, builtin: Box<dyn Builtin>) {
        match self.bindings.iter_mut().find(|(s, _)| *s == segment) {
            Some(binding) => binding.1 = builtin,
            None => self.bindings.push((segment, builtin)),
        }
    }

    /// Attempts to get the [`Builtin`] suitable for deducing memory cells of
    /// the provided segment.
    fn get_runner(&self, segment: u32) -> Option<&dyn Builtin> {
        self.bindings
            .iter()
            .find(|(s, _)| *s == segment)
            .map(|(_, builtin)| &**builtin)
    }
}

impl fmt::Debug for BuiltinManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinManager")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Attempts to fetch the instruction word referenced by the program counter.
///
/// The cell must be a known field element that fits in 64 bits: a pointer is
/// an [`Error::InstructionError`] and an oversized scalar falls under
/// [`Error::HighBitSet`].
fn fetch_instruction(cpu: &Cpu, memory: &Memory) -> Result<Word, Error> {
    let value = memory.get_required(cpu.pc)?;
    let scalar = value.scalar().ok_or(Error::InstructionError(cpu.pc))?;
    let word = scalar.to_u64().ok_or(Error::HighBitSet)?;
    Ok(Word(word))
}

/// Resolves the destination address of an instruction and fetches its value
/// if it is already known.
fn compute_dst(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    let base = match ctx.instruction.dst_register {
        DstRegister::AP => vm.cpu.ap,
        DstRegister::FP => vm.cpu.fp,
    };
    ctx.dst_addr = base.add_felt(&Felt::from(ctx.instruction.dst_offset))?;

    if let Some(value) = vm.memory.get(ctx.dst_addr)? {
        ctx.dst = *value;
        ctx.flags.insert(StepContextFlags::DST_ASSERTED);
    }

    Ok(())
}

/// Resolves the address of the first operand of an instruction and fetches
/// its value if it is already known.
fn compute_op0(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    let base = match ctx.instruction.op0_register {
        Op0Register::AP => vm.cpu.ap,
        Op0Register::FP => vm.cpu.fp,
    };
    ctx.op0_addr = base.add_felt(&Felt::from(ctx.instruction.op0_offset))?;

    if let Some(value) = vm.memory.get(ctx.op0_addr)? {
        ctx.op0 = *value;
        ctx.flags.insert(StepContextFlags::OP0_ASSERTED);
    }

    Ok(())
}

/// Resolves the address of the second operand of an instruction and fetches
/// its value if it is already known.
///
/// When the second operand is relative to the first one, the value of `op0`
/// must already be known and must be a pointer.
fn compute_op1(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    let base = match ctx.instruction.op1_source {
        Op1Source::Op0 => {
            if !ctx.flags.has_op0() {
                return Err(Error::UndefinedValue(ctx.op0_addr));
            }
            *ctx.op0
                .pointer()
                .ok_or(Error::ExpectedRelocatable(ctx.op0))?
        }
        Op1Source::PC => vm.cpu.pc,
        Op1Source::FP => vm.cpu.fp,
        Op1Source::AP => vm.cpu.ap,
    };
    ctx.op1_addr = base.add_felt(&Felt::from(ctx.instruction.op1_offset))?;

    if let Some(value) = vm.memory.get(ctx.op1_addr)? {
        ctx.op1 = *value;
        ctx.flags.insert(StepContextFlags::OP1_ASSERTED);
    }

    Ok(())
}

/// Attempts to deduce the value of the memory cell at `addr` using one of the
/// registered builtins.
///
/// Returns `Ok(None)` when no builtin is bound to the segment of `addr`, or
/// when the builtin does not constrain that cell.
fn deduce_with_builtin(addr: Relocatable, vm: &CairoVM) -> Result<Option<Value>, Error> {
    let Some(runner) = vm.builtins.get_runner(addr.segment) else {
        return Ok(None);
    };

    let segment = vm.memory.segment(addr.segment)?;
    Ok(runner.deduce(addr, segment)?.map(Value::Scalar))
}

/// Runs the builtins when applicable to deduce the missing operands of an
/// instruction.
fn run_builtins(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    if !ctx.flags.has_op0() {
        if let Some(value) = deduce_with_builtin(ctx.op0_addr, vm)? {
            ctx.op0 = value;
            ctx.flags.insert(StepContextFlags::OP0_DEDUCED);
        }
    }

    if !ctx.flags.has_op1() {
        if let Some(value) = deduce_with_builtin(ctx.op1_addr, vm)? {
            ctx.op1 = value;
            ctx.flags.insert(StepContextFlags::OP1_DEDUCED);
        }
    }

    Ok(())
}

/// Attempts to deduce the value of `op1` given a result logic and the values
/// of `op0` and `dst`.
fn deduce_op1_from_op0(
    res_logic: ResultLogic,
    op0: Option<&Value>,
    dst: &Value,
    op1: &mut Value,
) -> Result<bool, Error> {
    match res_logic {
        ResultLogic::Unused => Ok(false),
        ResultLogic::Op1 => {
            //    dst = op1
            *op1 = *dst;
            Ok(true)
        }
        ResultLogic::Add => {
            let Some(op0) = op0 else { return Ok(false) };

            //     dst = op0 + op1
            // =>  op1 = dst - op0
            *op1 = dst.subtract(op0)?;
            Ok(true)
        }
        ResultLogic::Mul => {
            let Some(op0) = op0 else { return Ok(false) };

            //     dst = op0 * op1
            // =>  op1 = dst / op0
            *op1 = dst.divide(op0)?;
            Ok(true)
        }
    }
}

/// Attempts to deduce the value of `op0` given a result logic and the values
/// of `op1` and `dst`.
fn deduce_op0_from_op1(
    res_logic: ResultLogic,
    op1: &Value,
    dst: &Value,
    op0: &mut Value,
) -> Result<bool, Error> {
    match res_logic {
        ResultLogic::Unused | ResultLogic::Op1 => Ok(false),
        ResultLogic::Add => {
            //     dst = op0 + op1
            // =>  op0 = dst - op1
            *op0 = dst.subtract(op1)?;
            Ok(true)
        }
        ResultLogic::Mul => {
            //     dst = op0 * op1
            // =>  op0 = dst / op1
            *op0 = dst.divide(op1)?;
            Ok(true)
        }
    }
}

/// Attempts to deduce missing operands from the OP code of the instruction.
fn deduce_from_op_code(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    match ctx.instruction.op_code {
        OpCode::Call => {
            // A `Call` asserts `op0` to the return address, the cell right
            // after the instruction and its eventual immediate.
            let return_pc = Value::Pointer(vm.cpu.pc.add_offset(ctx.instruction.size())?);
            if ctx.flags.has_op0() {
                if ctx.op0 != return_pc {
                    return Err(Error::InconsistentMemory(ctx.op0_addr, ctx.op0, return_pc));
                }
            } else {
                ctx.op0 = return_pc;
                ctx.flags.insert(StepContextFlags::OP0_DEDUCED);
            }

            // A `Call` asserts `dst` to the current frame pointer.
            let frame = Value::Pointer(vm.cpu.fp);
            if ctx.flags.has_dst() {
                if ctx.dst != frame {
                    return Err(Error::InconsistentMemory(ctx.dst_addr, ctx.dst, frame));
                }
            } else {
                ctx.dst = frame;
                ctx.flags.insert(StepContextFlags::DST_DEDUCED);
            }
        }
        OpCode::AssertEq => {
            // With this OP code, the result of the instruction is asserted
            // to equal `dst`, which lets us back-solve a missing operand as
            // long as `dst` is known.
            if ctx.flags.has_dst() {
                let res_logic = ctx.instruction.result_logic;

                if !ctx.flags.has_op1() {
                    let op0 = ctx.flags.has_op0().then_some(&ctx.op0);

                    let mut op1 = ctx.op1;
                    if deduce_op1_from_op0(res_logic, op0, &ctx.dst, &mut op1)? {
                        ctx.op1 = op1;
                        ctx.flags.insert(StepContextFlags::OP1_DEDUCED);
                    }
                }

                if ctx.flags.has_op1() && !ctx.flags.has_op0() {
                    let mut op0 = ctx.op0;
                    if deduce_op0_from_op1(res_logic, &ctx.op1, &ctx.dst, &mut op0)? {
                        ctx.op0 = op0;
                        ctx.flags.insert(StepContextFlags::OP0_DEDUCED);
                    }
                }
            }
        }
        _ => (),
    }

    Ok(())
}

/// Computes the result of the instruction from its operands.
///
/// Returns `None` when the instruction does not constrain a result. A missing
/// operand is an [`Error::UndeducibleOperand`] under `AssertEq` (the
/// deduction engine already gave up on it) and an [`Error::UndefinedValue`]
/// otherwise.
fn compute_res(ctx: &StepContext) -> Result<Option<Value>, Error> {
    let missing = |addr: Relocatable| {
        if ctx.instruction.op_code == OpCode::AssertEq {
            Error::UndeducibleOperand
        } else {
            Error::UndefinedValue(addr)
        }
    };

    match ctx.instruction.result_logic {
        ResultLogic::Unused => Ok(None),
        ResultLogic::Op1 => {
            if !ctx.flags.has_op1() {
                return Err(missing(ctx.op1_addr));
            }
            Ok(Some(ctx.op1))
        }
        ResultLogic::Add => {
            if !ctx.flags.has_op0() {
                return Err(missing(ctx.op0_addr));
            }
            if !ctx.flags.has_op1() {
                return Err(missing(ctx.op1_addr));
            }
            ctx.op0.add(&ctx.op1).map(Some)
        }
        ResultLogic::Mul => {
            if !ctx.flags.has_op0() {
                return Err(missing(ctx.op0_addr));
            }
            if !ctx.flags.has_op1() {
                return Err(missing(ctx.op1_addr));
            }
            ctx.op0.multiply(&ctx.op1).map(Some)
        }
    }
}

/// Enforces the `AssertEq` contract: the destination must equal the result
/// of the instruction, and takes its value when still unknown.
fn apply_assertion(ctx: &mut StepContext, res: Option<Value>) -> Result<(), Error> {
    if ctx.instruction.op_code != OpCode::AssertEq {
        return Ok(());
    }

    let res = res.ok_or(Error::UndeducibleOperand)?;
    if ctx.flags.has_dst() {
        if ctx.dst != res {
            return Err(Error::InconsistentMemory(ctx.dst_addr, ctx.dst, res));
        }
    } else {
        ctx.dst = res;
        ctx.flags.insert(StepContextFlags::DST_DEDUCED);
    }

    Ok(())
}

/// Requires all three operands of the instruction to be known once deduction
/// is over, so that the step is fully materialized.
fn require_operands(ctx: &StepContext) -> Result<(), Error> {
    if !ctx.flags.has_dst() {
        return Err(Error::UndefinedValue(ctx.dst_addr));
    }
    if !ctx.flags.has_op0() {
        return Err(Error::UndefinedValue(ctx.op0_addr));
    }
    if !ctx.flags.has_op1() {
        return Err(Error::UndefinedValue(ctx.op1_addr));
    }
    Ok(())
}

/// Computes the next register file from the pre-step snapshot.
fn update_registers(
    ctx: &mut StepContext,
    vm: &CairoVM,
    res: Option<Value>,
) -> Result<(), Error> {
    let instruction = &ctx.instruction;
    let cpu = &vm.cpu;

    ctx.next_pc = match instruction.pc_update {
        PcUpdate::Regular => cpu.pc.add_offset(instruction.size())?,
        PcUpdate::AbsoluteJump => {
            let res = res.ok_or(Error::UnconstrainedRes)?;
            *res.pointer().ok_or(Error::ExpectedRelocatable(res))?
        }
        PcUpdate::RelativeJump => {
            let res = res.ok_or(Error::UnconstrainedRes)?;
            let delta = *res.scalar().ok_or(Error::ExpectedFelt(res))?;
            cpu.pc.add_felt(&delta)?
        }
        PcUpdate::ConditionalJump => {
            if ctx.dst.is_zero() {
                cpu.pc.add_offset(instruction.size())?
            } else {
                let delta = *ctx.op1.scalar().ok_or(Error::ExpectedFelt(ctx.op1))?;
                cpu.pc.add_felt(&delta)?
            }
        }
    };

    ctx.next_ap = match instruction.ap_update {
        ApUpdate::None => cpu.ap,
        ApUpdate::AddResult => {
            let res = res.ok_or(Error::UnconstrainedRes)?;
            let delta = *res.scalar().ok_or(Error::ExpectedFelt(res))?;
            cpu.ap.add_felt(&delta)?
        }
        ApUpdate::Increment => cpu.ap.add_offset(1)?,
        ApUpdate::Increment2 => cpu.ap.add_offset(2)?,
    };

    // `fp` updates read the pre-step `ap`, not the one just computed.
    ctx.next_fp = match instruction.fp_update {
        FpUpdate::None => cpu.fp,
        FpUpdate::ApPlus2 => cpu.ap.add_offset(2)?,
        FpUpdate::Dst => *ctx.dst
            .pointer()
            .ok_or(Error::ExpectedRelocatable(ctx.dst))?,
    };

    Ok(())
}

bitflags! {
    /// Some flags associated with a [`StepContext`].
    #[derive(Clone, Copy)]
    struct StepContextFlags: u8 {
        /// The destination of the instruction was deduced from the other
        /// operands, a builtin, or the OP code.
        const DST_DEDUCED = 1 << 0;
        /// The destination of the instruction was read from an already
        /// existing memory cell.
        const DST_ASSERTED = 1 << 1;
        /// The first operand of the instruction was deduced.
        const OP0_DEDUCED = 1 << 2;
        /// The first operand of the instruction was read from an already
        /// existing memory cell.
        const OP0_ASSERTED = 1 << 3;
        /// The second operand of the instruction was deduced.
        const OP1_DEDUCED = 1 << 4;
        /// The second operand of the instruction was read from an already
        /// existing memory cell.
        const OP1_ASSERTED = 1 << 5;
    }
}

impl StepContextFlags {
    /// Returns whether the destination of the instruction is known.
    #[inline(always)]
    const fn has_dst(self) -> bool {
        self.intersects(Self::DST_ASSERTED.union(Self::DST_DEDUCED))
    }

    /// Returns whether the first operand of the instruction is known.
    #[inline(always)]
    const fn has_op0(self) -> bool {
        self.intersects(Self::OP0_ASSERTED.union(Self::OP0_DEDUCED))
    }

    /// Returns whether the second operand of the instruction is known.
    #[inline(always)]
    const fn has_op1(self) -> bool {
        self.intersects(Self::OP1_ASSERTED.union(Self::OP1_DEDUCED))
    }
}

/// Stores the state that must be kept around while executing a single
/// instruction.
struct StepContext {
    /// The instruction being executed.
    instruction: Instruction,
    /// The destination address of the instruction.
    dst_addr: Relocatable,
    /// The value of the destination, if known.
    ///
    /// Only meaningful when the `DST_ASSERTED` or `DST_DEDUCED` flag is set.
    dst: Value,
    /// The address of the first operand of the instruction.
    op0_addr: Relocatable,
    /// The value of the first operand, if known.
    ///
    /// Only meaningful when the `OP0_ASSERTED` or `OP0_DEDUCED` flag is set.
    op0: Value,
    /// The address of the second operand of the instruction.
    op1_addr: Relocatable,
    /// The value of the second operand, if known.
    ///
    /// Only meaningful when the `OP1_ASSERTED` or `OP1_DEDUCED` flag is set.
    op1: Value,
    /// Some flags associated with the context.
    flags: StepContextFlags,
    /// The next value of the **Program Counter**.
    next_pc: Relocatable,
    /// The next value of the **Allocation Pointer**.
    next_ap: Relocatable,
    /// The next value of the **Frame Pointer**.
    next_fp: Relocatable,
}

impl StepContext {
    /// Creates a new [`StepContext`] with the provided instruction.
    ///
    /// All other fields are initialized to dummy values and are properly set
    /// while the step progresses.
    const fn initial(instruction: Instruction) -> Self {
        Self {
            instruction,
            dst_addr: Relocatable::new(0, 0),
            dst: Value::Scalar(Felt::ZERO),
            op0_addr: Relocatable::new(0, 0),
            op0: Value::Scalar(Felt::ZERO),
            op1_addr: Relocatable::new(0, 0),
            op1: Value::Scalar(Felt::ZERO),
            flags: StepContextFlags::empty(),
            next_pc: Relocatable::new(0, 0),
            next_ap: Relocatable::new(0, 0),
            next_fp: Relocatable::new(0, 0),
        }
    }

    /// The deduced cells this step will assert into memory when it commits.
    ///
    /// Cells that were merely read (`*_ASSERTED`) are already in memory and
    /// are not part of this list.
    fn pending_inserts(&self) -> [(StepContextFlags, Relocatable, Value); 3] {
        [
            (StepContextFlags::DST_DEDUCED, self.dst_addr, self.dst),
            (StepContextFlags::OP0_DEDUCED, self.op0_addr, self.op0),
            (StepContextFlags::OP1_DEDUCED, self.op1_addr, self.op1),
        ]
    }
}

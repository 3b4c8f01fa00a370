//! Defines the [`Trace`] trait, used to gather information about the
//! execution of a Cairo program within the virtual machine.

use crate::cpu::Cpu;
use crate::memory::{Relocatable, Value};

/// A collection of callbacks to be called during the execution of a Cairo
/// program.
///
/// The virtual machine itself never logs or prints; everything a host wants
/// to observe about an execution flows through this trait.
#[allow(unused_variables)]
pub trait Trace {
    /// Called for every memory cell asserted while a step commits, in the
    /// order the assertions happen.
    fn memory_insert(&mut self, addr: Relocatable, value: &Value) {}

    /// Called once a step has committed, with the updated CPU registers.
    fn step_committed(&mut self, cpu: &Cpu) {}
}

/// An implementation of [`Trace`] that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;
impl Trace for NoopTrace {}

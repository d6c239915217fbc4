//! # Target Collaborators
//!
//! Narrow interfaces to the traced process and its loader.
//!
//! The relocation core never issues `ptrace` requests itself. A platform
//! backend implements [`ProcessControl`] and [`LoaderQuery`]; tests provide
//! scripted implementations that record every call.

use std::io;

use crate::breakpoints::BreakpointShadow;
use crate::error::XcoffResult;
use crate::types::{Address, ProcessId};

/// Register, breakpoint and execution control over one traced process.
///
/// Register identifiers are machine identifiers, not logical indices:
/// general registers are `0..32`, floating-point registers start at
/// [`MACHINE_FPR0`](crate::types::registers::MACHINE_FPR0), and special
/// registers use [`SpecialRegister::machine_id`](crate::types::SpecialRegister::machine_id).
/// Special registers are read and written through the general-register
/// calls, as the kernel interface does.
pub trait ProcessControl
{
    fn read_gpr(&mut self, pid: ProcessId, machine_reg: u32) -> XcoffResult<u32>;

    fn write_gpr(&mut self, pid: ProcessId, machine_reg: u32, value: u32) -> XcoffResult<()>;

    fn read_fpr(&mut self, pid: ProcessId, machine_reg: u32) -> XcoffResult<[u8; 8]>;

    fn write_fpr(&mut self, pid: ProcessId, machine_reg: u32, value: [u8; 8]) -> XcoffResult<()>;

    fn read_pc(&mut self, pid: ProcessId) -> XcoffResult<Address>;

    fn write_pc(&mut self, pid: ProcessId, pc: Address) -> XcoffResult<()>;

    /// Plant a trap at `address`, returning the bytes it replaced.
    fn insert_breakpoint(&mut self, pid: ProcessId, address: Address) -> XcoffResult<BreakpointShadow>;

    /// Restore the bytes saved by [`ProcessControl::insert_breakpoint`].
    fn remove_breakpoint(&mut self, pid: ProcessId, shadow: &BreakpointShadow) -> XcoffResult<()>;

    /// Continue `pid` from its current program counter.
    fn resume(&mut self, pid: ProcessId) -> XcoffResult<()>;

    /// Block until some traced process stops and return its id.
    ///
    /// The reported process need not be the one last resumed.
    fn wait_for_stop(&mut self) -> XcoffResult<ProcessId>;
}

/// Why a loader-info query did not produce a snapshot.
#[derive(Debug)]
pub enum LoaderQueryError
{
    /// The buffer cannot hold every record; retry with a larger one.
    BufferTooSmall,
    /// Any other failure. Fatal for the stop event being handled.
    Failed(io::Error),
}

impl From<io::Error> for LoaderQueryError
{
    fn from(err: io::Error) -> Self
    {
        if err.raw_os_error() == Some(libc::ENOMEM) {
            LoaderQueryError::BufferTooSmall
        } else {
            LoaderQueryError::Failed(err)
        }
    }
}

/// Source of live loader-info snapshots.
pub trait LoaderQuery
{
    /// Fill `buf` with the loader-info records of `pid`.
    fn query(&mut self, pid: ProcessId, buf: &mut [u8]) -> Result<(), LoaderQueryError>;
}

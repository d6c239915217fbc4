//! # Register Transfer
//!
//! Moves registers between a traced process and a [`RegisterCache`].
//!
//! Logical indices are translated to machine identifiers here: general
//! registers map one to one, floating-point registers start at
//! [`MACHINE_FPR0`], and special registers go through
//! [`SpecialRegister::machine_id`].
//!
//! Before storing every register, or the stack pointer alone, the process is
//! made to execute one trap at a scratch address. Without that round-trip the
//! kernel has not caught up with its own view of the stack, and writing the
//! registers corrupts the user stack.

pub mod core_image;

use tracing::{debug, trace, warn};

pub use self::core_image::{fetch_core_registers, CoreRegisterSource, CORE_REGISTER_SOURCE};
use crate::config::SessionConfig;
use crate::error::XcoffResult;
use crate::target::ProcessControl;
use crate::types::registers::{DOUBLE_SIZE, FPR_COUNT, GPR_COUNT, MACHINE_FPR0, SP_REGNUM, WORD_SIZE};
use crate::types::{Address, ProcessId, RegisterCache, RegisterIndex, RegisterSelection, SpecialRegister};

/// Registers a store could not write. The rest were written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport
{
    /// Logical indices of the registers whose write failed, in write order.
    pub failed: Vec<usize>,
}

impl StoreReport
{
    /// Whether every register was written.
    pub fn is_clean(&self) -> bool
    {
        self.failed.is_empty()
    }
}

/// Register access to one traced process.
pub struct RegisterTransfer<'p>
{
    process: &'p mut dyn ProcessControl,
    pid: ProcessId,
    scratch: Address,
    register_count: usize,
}

impl<'p> RegisterTransfer<'p>
{
    /// Register access to `pid`, using the scratch address and register
    /// count from `config`.
    pub fn new(process: &'p mut dyn ProcessControl, pid: ProcessId, config: &SessionConfig) -> Self
    {
        Self {
            process,
            pid,
            scratch: config.scratch_address,
            register_count: config.register_count,
        }
    }

    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Read registers from the process into `cache`.
    ///
    /// Fetching everything reads general, then floating-point, then special
    /// registers and marks the whole cache valid. Fetching one register marks
    /// only that slot; an index that is not a readable register is reported
    /// and left alone.
    ///
    /// ## Errors
    ///
    /// Propagates the first failed read. Fetching everything stops there: the
    /// registers after it are not read and the cache is not marked valid, so
    /// a partial register set is never presented as complete. Stores behave
    /// the other way and write as many registers as they can (see
    /// [`RegisterTransfer::store`]).
    pub fn fetch(&mut self, cache: &mut dyn RegisterCache, which: RegisterSelection) -> XcoffResult<()>
    {
        match which {
            RegisterSelection::All => {
                for n in 0..GPR_COUNT {
                    self.fetch_one(cache, RegisterIndex::General(n as u8))?;
                }
                for n in 0..FPR_COUNT {
                    self.fetch_one(cache, RegisterIndex::Float(n as u8))?;
                }
                for reg in SpecialRegister::ALL {
                    self.fetch_one(cache, RegisterIndex::Special(reg))?;
                }
                cache.mark_all_valid();
                trace!(pid = %self.pid, "all registers fetched");
            }
            RegisterSelection::One(regnum) => {
                let index = RegisterIndex::classify(regnum, self.register_count);
                if self.fetch_one(cache, index)? {
                    cache.mark_valid(regnum);
                }
            }
        }
        Ok(())
    }

    /// Returns whether `index` named a readable register.
    fn fetch_one(&mut self, cache: &mut dyn RegisterCache, index: RegisterIndex) -> XcoffResult<bool>
    {
        let regnum = index.regnum();
        match index {
            RegisterIndex::General(n) => {
                let value = self.process.read_gpr(self.pid, u32::from(n))?;
                cache.supply(regnum, &value.to_be_bytes());
            }
            RegisterIndex::Float(n) => {
                let value = self.process.read_fpr(self.pid, MACHINE_FPR0 + u32::from(n))?;
                cache.supply(regnum, &value);
            }
            RegisterIndex::Special(reg) => {
                let value = self.process.read_gpr(self.pid, reg.machine_id())?;
                cache.supply(regnum, &value.to_be_bytes());
            }
            RegisterIndex::Variant(_) | RegisterIndex::Unknown(_) => {
                warn!(pid = %self.pid, regnum, "register no {regnum} not implemented");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write registers from `cache` to the process.
    ///
    /// Storing everything flushes kernel state first, then writes general,
    /// floating-point and special registers in that order. A failed write is
    /// reported and recorded; the remaining registers are still written.
    /// Variant registers are accepted and ignored.
    ///
    /// ## Errors
    ///
    /// Only a failed kernel-state flush is an error.
    pub fn store(&mut self, cache: &dyn RegisterCache, which: RegisterSelection) -> XcoffResult<StoreReport>
    {
        let mut report = StoreReport::default();
        match which {
            RegisterSelection::All => {
                self.flush_kernel_state()?;
                for n in 0..GPR_COUNT {
                    self.store_one(cache, RegisterIndex::General(n as u8), &mut report);
                }
                for n in 0..FPR_COUNT {
                    self.store_one(cache, RegisterIndex::Float(n as u8), &mut report);
                }
                for reg in SpecialRegister::ALL {
                    self.store_one(cache, RegisterIndex::Special(reg), &mut report);
                }
            }
            RegisterSelection::One(regnum) => {
                if regnum == SP_REGNUM {
                    self.flush_kernel_state()?;
                }
                let index = RegisterIndex::classify(regnum, self.register_count);
                self.store_one(cache, index, &mut report);
            }
        }
        if !report.is_clean() {
            debug!(pid = %self.pid, failed = ?report.failed, "register store incomplete");
        }
        Ok(report)
    }

    fn store_one(&mut self, cache: &dyn RegisterCache, index: RegisterIndex, report: &mut StoreReport)
    {
        let regnum = index.regnum();
        let written = match index {
            RegisterIndex::General(n) => self.process.write_gpr(self.pid, u32::from(n), word(cache.raw(regnum))),
            RegisterIndex::Float(n) => self.process.write_fpr(self.pid, MACHINE_FPR0 + u32::from(n), double(cache.raw(regnum))),
            RegisterIndex::Special(reg) => self.process.write_gpr(self.pid, reg.machine_id(), word(cache.raw(regnum))),
            RegisterIndex::Variant(_) => return,
            RegisterIndex::Unknown(_) => {
                warn!(pid = %self.pid, regnum, "register no {regnum} not implemented");
                return;
            }
        };
        if let Err(err) = written {
            warn!(pid = %self.pid, regnum, "register write failed: {err}");
            report.failed.push(regnum);
        }
    }

    /// Run one trap at the scratch address so the kernel updates its
    /// internal view of the process.
    ///
    /// Saves the program counter, plants a breakpoint at the scratch address,
    /// jumps there and resumes, waits for this process to stop (other stops
    /// are ignored), then puts the program counter and the original bytes
    /// back. Restoration runs even if the round-trip fails.
    ///
    /// ## Errors
    ///
    /// The first failing process-control call.
    pub fn flush_kernel_state(&mut self) -> XcoffResult<()>
    {
        let saved_pc = self.process.read_pc(self.pid)?;
        let shadow = self.process.insert_breakpoint(self.pid, self.scratch)?;

        let stepped = self.step_through_scratch();
        let restored = self.process.write_pc(self.pid, saved_pc);
        let removed = self.process.remove_breakpoint(self.pid, &shadow);

        trace!(pid = %self.pid, scratch = %self.scratch, %saved_pc, "kernel state flushed");
        stepped.and(restored).and(removed)
    }

    fn step_through_scratch(&mut self) -> XcoffResult<()>
    {
        self.process.write_pc(self.pid, self.scratch)?;
        self.process.resume(self.pid)?;
        loop {
            let stopped = self.process.wait_for_stop()?;
            if stopped == self.pid {
                return Ok(());
            }
            trace!(expected = %self.pid, %stopped, "ignoring stop of another process");
        }
    }
}

fn word(raw: &[u8]) -> u32
{
    let mut bytes = [0u8; WORD_SIZE];
    let len = raw.len().min(WORD_SIZE);
    bytes[..len].copy_from_slice(&raw[..len]);
    u32::from_be_bytes(bytes)
}

fn double(raw: &[u8]) -> [u8; DOUBLE_SIZE]
{
    let mut bytes = [0u8; DOUBLE_SIZE];
    let len = raw.len().min(DOUBLE_SIZE);
    bytes[..len].copy_from_slice(&raw[..len]);
    bytes
}

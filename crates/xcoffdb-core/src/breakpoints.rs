//! Breakpoint bookkeeping that depends on module placement.
//!
//! Two concerns live here. [`BreakpointShadow`] carries the instruction bytes
//! a planted trap replaced, so the backend can restore them. The
//! [`BreakpointTable`] remembers user breakpoints relative to a module's text
//! start and re-resolves them whenever reconciliation moves modules around.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::types::Address;
use crate::vmap::ModuleMap;

/// Instruction bytes saved when a trap was planted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointShadow
{
    /// Where the trap was planted.
    pub address: Address,
    /// Instruction bytes the trap replaced.
    pub original_bytes: Vec<u8>,
}

/// Re-applies breakpoint placement once module mappings are final.
pub trait BreakpointResetter
{
    /// Move every breakpoint to the current address of its module. Called
    /// once at the end of each reconciliation or core scan.
    fn re_set(&mut self, modules: &ModuleMap);
}

/// Unique identifier for a breakpoint in a [`BreakpointTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// A breakpoint pinned to an offset inside a module's text section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBreakpoint
{
    pub id: BreakpointId,
    /// Image file of the module the breakpoint is in.
    pub module: PathBuf,
    /// Archive member, for modules loaded out of an archive.
    pub member: Option<String>,
    /// Distance from the module's text start.
    pub text_offset: u64,
    /// Current absolute address, `None` while the module is not mapped.
    pub address: Option<Address>,
}

/// Module-relative breakpoints, re-resolved on every re-set.
#[derive(Debug, Default)]
pub struct BreakpointTable
{
    next_id: u64,
    by_id: HashMap<BreakpointId, ModuleBreakpoint>,
}

impl BreakpointTable
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Record a breakpoint at `text_offset` bytes into `module`'s text.
    pub fn insert(&mut self, module: impl Into<PathBuf>, member: Option<String>, text_offset: u64) -> BreakpointId
    {
        let id = self.allocate_id();
        self.by_id.insert(
            id,
            ModuleBreakpoint {
                id,
                module: module.into(),
                member,
                text_offset,
                address: None,
            },
        );
        id
    }

    /// Look up a breakpoint by id.
    pub fn get(&self, id: BreakpointId) -> Option<&ModuleBreakpoint>
    {
        self.by_id.get(&id)
    }

    /// Forget a breakpoint, returning it.
    pub fn remove(&mut self, id: BreakpointId) -> Option<ModuleBreakpoint>
    {
        self.by_id.remove(&id)
    }

    pub fn len(&self) -> usize
    {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.by_id.is_empty()
    }

    /// Breakpoints whose module is currently mapped, by resolved address.
    pub fn resolved(&self) -> Vec<(BreakpointId, Address)>
    {
        let mut resolved: Vec<_> = self
            .by_id
            .values()
            .filter_map(|bp| bp.address.map(|address| (bp.id, address)))
            .collect();
        resolved.sort_by_key(|(_, address)| *address);
        resolved
    }

    fn resolve(modules: &ModuleMap, module: &Path, member: Option<&str>, text_offset: u64) -> Option<Address>
    {
        modules
            .iter()
            .map(|(_, record)| record)
            .find(|record| record.name() == module && record.member() == member)
            .map(|record| record.text_start + text_offset)
    }
}

impl BreakpointResetter for BreakpointTable
{
    fn re_set(&mut self, modules: &ModuleMap)
    {
        for bp in self.by_id.values_mut() {
            let address = Self::resolve(modules, &bp.module, bp.member.as_deref(), bp.text_offset);
            if address != bp.address {
                debug!(
                    id = bp.id.raw(),
                    module = %bp.module.display(),
                    from = ?bp.address,
                    to = ?address,
                    "breakpoint moved"
                );
            }
            bp.address = address;
        }
        trace!(count = self.by_id.len(), "breakpoints re-set");
    }
}

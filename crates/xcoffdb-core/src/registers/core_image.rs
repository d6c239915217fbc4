//! Registers from a core image.
//!
//! The core carries two register sections: the first holds the general
//! registers followed by the special registers, in the same order as the
//! logical layout; the second holds the floating-point registers.

use tracing::warn;

use crate::types::registers::{DOUBLE_SIZE, FP0_REGNUM, FPR_COUNT, GPR_COUNT, WORD_SIZE};
use crate::types::{RegisterCache, SpecialRegister};

/// Discriminator of the general-plus-special register section.
pub const GENERAL_SECTION: u32 = 0;

/// Discriminator of the floating-point register section.
pub const FLOAT_SECTION: u32 = 2;

/// A core-register reader, keyed by the object-file flavour it handles.
#[derive(Debug, Clone, Copy)]
pub struct CoreRegisterSource
{
    /// Object-file flavour whose cores this reader understands.
    pub flavour: &'static str,
    /// Copies one register section into a cache; see [`fetch_core_registers`].
    pub fetch: fn(&mut dyn RegisterCache, &[u8], u32) -> usize,
}

/// Reader for cores of XCOFF executables.
pub static CORE_REGISTER_SOURCE: CoreRegisterSource = CoreRegisterSource {
    flavour: "coff",
    fetch: fetch_core_registers,
};

/// Copy registers out of the core register section `which`.
///
/// Returns how many registers were supplied. Registers the section is too
/// short to contain are left untouched; an unknown discriminator supplies
/// nothing.
pub fn fetch_core_registers(cache: &mut dyn RegisterCache, section: &[u8], which: u32) -> usize
{
    let regs: Vec<(usize, usize)> = match which {
        GENERAL_SECTION => (0..GPR_COUNT)
            .map(|n| (n, WORD_SIZE))
            .chain(SpecialRegister::ALL.iter().map(|reg| (reg.regnum(), WORD_SIZE)))
            .collect(),
        FLOAT_SECTION => (0..FPR_COUNT).map(|n| (FP0_REGNUM + n, DOUBLE_SIZE)).collect(),
        other => {
            warn!(which = other, "unknown core register section {other}");
            return 0;
        }
    };

    let mut supplied = 0;
    let mut offset = 0;
    for (regnum, size) in regs {
        let Some(bytes) = section.get(offset..offset + size) else {
            warn!(which, len = section.len(), "core register section truncated at register {regnum}");
            break;
        };
        cache.supply(regnum, bytes);
        cache.mark_valid(regnum);
        supplied += 1;
        offset += size;
    }
    supplied
}

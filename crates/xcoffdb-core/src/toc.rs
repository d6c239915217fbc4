//! TOC base resolution for inferior function calls.
//!
//! A called function expects its module's TOC pointer in r2. The pointer is
//! the module's current data address plus the TOC anchor's offset into the
//! data section, so it moves with every relocation.

use tracing::trace;

use crate::error::{XcoffError, XcoffResult};
use crate::symbols::SymbolSession;
use crate::types::Address;
use crate::vmap::ModuleMap;

/// TOC pointer for a call to code at `pc`.
///
/// The first module whose text range contains `pc` wins. The primary
/// executable's offset comes from the session's primary symbol table; a
/// module with no table to ask uses an offset of zero.
///
/// ## Errors
///
/// `TocNotFound` if no module's text contains `pc`. The call cannot be set
/// up, but nothing else is affected.
///
/// ## Example
///
/// ```rust
/// use xcoffdb_core::symbols::SymbolSession;
/// use xcoffdb_core::toc::find_toc_address;
/// use xcoffdb_core::types::Address;
/// use xcoffdb_core::vmap::ModuleMap;
///
/// let err = find_toc_address(&ModuleMap::new(), &SymbolSession::new(), Address::new(0xd000_1000));
/// assert!(err.is_err());
/// ```
pub fn find_toc_address(modules: &ModuleMap, symbols: &SymbolSession, pc: Address) -> XcoffResult<Address>
{
    let (id, record) = modules.find_by_text(pc).ok_or(XcoffError::TocNotFound(pc))?;
    let toc_offset = record
        .objfile()
        .or_else(|| symbols.primary())
        .map_or(0, |table| table.toc_offset());

    let toc = record.data_start + toc_offset;
    trace!(%pc, module = %id, %toc, "TOC resolved");
    Ok(toc)
}

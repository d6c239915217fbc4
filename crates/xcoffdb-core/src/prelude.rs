//! Common module for library exports

pub use crate::breakpoints::{BreakpointResetter, BreakpointTable};
pub use crate::config::SessionConfig;
pub use crate::error::{XcoffError, XcoffResult};
pub use crate::ldinfo::{LoaderInfoEntry, LoaderSnapshot};
pub use crate::registers::{RegisterTransfer, StoreReport};
pub use crate::session::Session;
pub use crate::symbols::{BinaryImage, ImageProvider, SymbolLoader, SymbolSession, SymbolTable};
pub use crate::target::{LoaderQuery, LoaderQueryError, ProcessControl};
pub use crate::types::{Address, FileIdentity, ProcessId, RegisterBuffer, RegisterCache, RegisterSelection};
pub use crate::vmap::{ModuleId, ModuleMap, ModuleRecord, ReconcileReport};

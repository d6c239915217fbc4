//! # xcoffdb-core
//!
//! Register access and module relocation for debugging XCOFF programs on
//! AIX/RS6000.
//!
//! This crate keeps the debugger's picture of a process in step with the
//! process itself:
//! - Register transfer between a traced process (or a core image) and a
//!   register cache
//! - The module map, one record per loaded executable or shared library
//! - Reconciliation of the module map against loader-info snapshots, live or
//!   frozen in a core image
//! - TOC pointer resolution for inferior function calls
//!
//! ## Collaborators
//!
//! Process control, the loader query and breakpoint re-setting are traits
//! ([`target::ProcessControl`], [`target::LoaderQuery`],
//! [`breakpoints::BreakpointResetter`]). Images are opened through
//! [`symbols::ImageProvider`]; [`symbols::ObjectImageProvider`] reads them
//! from disk with the `object` crate.
//!
//! ## Why unsafe code is needed
//!
//! Loader descriptors are raw file descriptors owned by the kernel's loader
//! report. Inspecting (`fstat`), closing and adopting them goes through
//! `libc` and `FromRawFd`.

#![allow(unsafe_code)] // Loader descriptors (fstat, close, FromRawFd)

pub mod breakpoints;
pub mod config;
pub mod error;
pub mod ldinfo;
pub mod prelude;
pub mod registers;
pub mod session;
pub mod symbols;
pub mod target;
pub mod toc;
pub mod types;
pub mod vmap;

pub use config::SessionConfig;
// Re-export commonly used types
pub use error::{XcoffError, XcoffResult};
pub use session::Session;
pub use types::{Address, ProcessId};

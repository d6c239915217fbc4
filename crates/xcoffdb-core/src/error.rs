//! # Error Types
//!
//! Hard and fatal failures of the relocation core.
//!
//! Only conditions that abort the current operation are errors. Transient
//! problems (a single register write failing, a loader entry whose file has
//! vanished, an unreadable stat) are logged through `tracing` and counted in
//! the operation's report instead; they never surface here.
//!
//! ## Error Categories
//!
//! 1. **Image errors**: ImageOpen, NotExecutable, MemberMissing
//! 2. **Loader-info errors**: LoaderQueryFailed, LoaderBufferOverflow, LoaderInfoDecode,
//!    LoaderSectionMissing
//! 3. **Session errors**: NoExecutable, DuplicatePrimary, ExecSectionsMissing
//! 4. **Call setup errors**: TocNotFound
//! 5. **Process errors**: ProcessControl
//! 6. **I/O errors**: Io

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Address;

/// Main error type for relocation and register-transfer operations
#[derive(Error, Debug)]
pub enum XcoffError
{
    /// A module's file could not be opened as a binary image.
    #[error("Could not open `{path}' as an executable file: {source}")]
    ImageOpen
    {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file (or the archive member inside it) is not an object file.
    #[error("\"{path}\": not in executable format: {reason}")]
    NotExecutable
    {
        path: PathBuf, reason: String
    },

    /// The loader named an archive member that the archive does not contain.
    ///
    /// Module creation reports this as a warning and creates nothing; the
    /// variant exists for callers that open members directly.
    #[error("\"{path}\": member \"{member}\" missing")]
    MemberMissing
    {
        path: PathBuf, member: String
    },

    /// The live loader-info query failed for a reason other than a short
    /// buffer. Fatal for the stop event being processed.
    #[error("loader info query for pid {pid} failed: {source}")]
    LoaderQueryFailed
    {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// The query buffer kept coming back too small until its size no longer
    /// fits in memory.
    #[error("loader info for pid {pid} does not fit in a buffer of {segments} records")]
    LoaderBufferOverflow
    {
        pid: u32, segments: usize
    },

    /// A loader-info buffer or section could not be decoded.
    #[error("malformed loader info at offset {offset:#x}: {reason}")]
    LoaderInfoDecode
    {
        offset: usize, reason: String
    },

    /// The core image carries no loader-info section.
    #[error("Couldn't get ldinfo from core file: no `{section}' section")]
    LoaderSectionMissing
    {
        section: &'static str
    },

    /// Core relocation needs the executable's module record to exist first.
    #[error("Can't debug a core file without an executable file")]
    NoExecutable,

    /// A second primary-executable record was requested.
    #[error("primary executable `{existing}' is already mapped")]
    DuplicatePrimary
    {
        existing: PathBuf
    },

    /// Executable section relocation ran with no module map or no section table.
    #[error("cannot relocate executable sections: {0}")]
    ExecSectionsMissing(&'static str),

    /// No loaded module contains the code address of a call being set up.
    #[error("Unable to find TOC entry for pc {0}")]
    TocNotFound(Address),

    /// A process-control primitive failed.
    #[error("{operation} failed for pid {pid}: {source}")]
    ProcessControl
    {
        operation: &'static str,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while reading an image or a core section
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl XcoffError
{
    /// Wrap an OS error from a process-control primitive.
    pub fn process(operation: &'static str, pid: crate::types::ProcessId, source: std::io::Error) -> Self
    {
        XcoffError::ProcessControl {
            operation,
            pid: pid.0,
            source,
        }
    }

    /// Build a decode error for a loader-info record.
    pub fn decode(offset: usize, reason: impl Into<String>) -> Self
    {
        XcoffError::LoaderInfoDecode {
            offset,
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for `Result<T, XcoffError>`
///
/// ```rust
/// use xcoffdb_core::error::XcoffResult;
/// fn foo() -> XcoffResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type XcoffResult<T> = std::result::Result<T, XcoffError>;

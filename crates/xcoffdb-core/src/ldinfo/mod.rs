//! # Loader Info
//!
//! Decoding of loader-info records and the live query loop.
//!
//! The loader describes every mapped module with one variable-length record.
//! Records are chained by a self-relative byte offset; an offset of zero marks
//! the last one. All fields are big-endian:
//!
//! ```text
//! 0   next         u32   bytes from this record to the next, 0 = last
//! 4   fd           i32   open descriptor for the file, -1 if none
//! 8   text_origin  u32   where the loader mapped the file (header first)
//! 12  text_size    u32
//! 16  data_origin  u32
//! 20  data_size    u32
//! 24  path\0member\0
//! ```

pub mod core_image;

pub use self::core_image::{read_core_record, relocate_core, CoreReport, LOADER_SECTION};

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{XcoffError, XcoffResult};
use crate::target::{LoaderQuery, LoaderQueryError};
use crate::types::{Address, ProcessId};

/// Size of the fixed part of a record, before the names.
pub const LD_INFO_HEADER_SIZE: usize = 24;

/// Nominal record size used to size query buffers.
pub const LD_INFO_SIZE: usize = 28;

/// Descriptor value meaning "no open descriptor, reopen by path".
pub const NO_DESCRIPTOR: i32 = -1;

/// One module as reported by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderInfoEntry
{
    /// Byte offset from this record to the next; 0 for the last record.
    pub next: u32,
    /// Descriptor of the module's file, [`NO_DESCRIPTOR`] when there is none.
    pub fd: i32,
    /// Where the loader mapped the file; the text section follows the file
    /// header.
    pub text_origin: Address,
    /// Length of the text mapping from `text_origin`.
    pub text_size: u64,
    /// Where the data section was mapped.
    pub data_origin: Address,
    /// Length of the data mapping.
    pub data_size: u64,
    /// Path of the module's file as the loader reports it.
    pub path: PathBuf,
    /// Archive member name; empty for plain object files.
    pub member: String,
}

/// The fixed-size part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LoaderInfoHeader
{
    pub next: u32,
    pub fd: i32,
    pub text_origin: u32,
    pub text_size: u32,
    pub data_origin: u32,
    pub data_size: u32,
}

impl LoaderInfoHeader
{
    pub(crate) fn decode(bytes: &[u8; LD_INFO_HEADER_SIZE]) -> Self
    {
        let word = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Self {
            next: word(0),
            fd: i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            text_origin: word(8),
            text_size: word(12),
            data_origin: word(16),
            data_size: word(20),
        }
    }
}

impl LoaderInfoEntry
{
    /// Build an entry from a decoded header and the raw `path\0member\0` bytes.
    pub(crate) fn from_parts(header: LoaderInfoHeader, names: &[u8]) -> Self
    {
        let mut parts = names.split(|&b| b == 0);
        let path = parts.next().unwrap_or_default();
        let member = parts.next().unwrap_or_default();

        Self {
            next: header.next,
            fd: header.fd,
            text_origin: Address::from(header.text_origin),
            text_size: u64::from(header.text_size),
            data_origin: Address::from(header.data_origin),
            data_size: u64::from(header.data_size),
            path: PathBuf::from(OsStr::from_bytes(path)),
            member: String::from_utf8_lossy(member).into_owned(),
        }
    }

    /// Decode the record starting at `offset` in `buf`.
    pub fn decode(buf: &[u8], offset: usize) -> XcoffResult<Self>
    {
        let header_end = offset
            .checked_add(LD_INFO_HEADER_SIZE)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| XcoffError::decode(offset, format!("record header runs past {} bytes", buf.len())))?;
        let mut header = [0u8; LD_INFO_HEADER_SIZE];
        header.copy_from_slice(&buf[offset..header_end]);
        let header = LoaderInfoHeader::decode(&header);

        let tail = &buf[header_end..];
        let path_end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| XcoffError::decode(offset, "unterminated path"))?;
        let member_end = tail[path_end + 1..]
            .iter()
            .position(|&b| b == 0)
            .map(|len| path_end + 1 + len)
            .ok_or_else(|| XcoffError::decode(offset, "unterminated member name"))?;

        Ok(Self::from_parts(header, &tail[..=member_end]))
    }

    /// Whether this record ends the chain.
    pub fn is_last(&self) -> bool
    {
        self.next == 0
    }

    /// The descriptor, unless the record carries none.
    pub fn descriptor(&self) -> Option<i32>
    {
        (self.fd >= 0).then_some(self.fd)
    }

    /// The member name, unless the record names a plain object file.
    pub fn member_name(&self) -> Option<&str>
    {
        (!self.member.is_empty()).then_some(self.member.as_str())
    }

    /// Path with the member appended in parentheses, for messages.
    pub fn display_name(&self) -> String
    {
        display_name(&self.path, self.member_name())
    }
}

pub(crate) fn display_name(path: &Path, member: Option<&str>) -> String
{
    match member {
        Some(member) => format!("{}({member})", path.display()),
        None => path.display().to_string(),
    }
}

/// Every record of one loader-info report, in loader order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderSnapshot
{
    entries: Vec<LoaderInfoEntry>,
}

impl LoaderSnapshot
{
    /// Snapshot over already decoded entries, in loader order.
    pub fn new(entries: Vec<LoaderInfoEntry>) -> Self
    {
        Self { entries }
    }

    /// Walk the record chain in `buf`.
    ///
    /// ## Errors
    ///
    /// `LoaderInfoDecode` if a record is truncated or a `next` offset points
    /// outside the buffer.
    pub fn parse(buf: &[u8]) -> XcoffResult<Self>
    {
        let mut entries = Vec::new();
        let mut offset = 0usize;
        loop {
            let entry = LoaderInfoEntry::decode(buf, offset)?;
            trace!(offset, path = %entry.display_name(), next = entry.next, "loader record");
            let next = entry.next as usize;
            entries.push(entry);
            if next == 0 {
                break;
            }
            offset = offset
                .checked_add(next)
                .filter(|&at| at < buf.len())
                .ok_or_else(|| XcoffError::decode(offset, format!("next record offset {next:#x} leaves the buffer")))?;
        }
        Ok(Self { entries })
    }

    /// Entries in loader order; the executable comes first.
    pub fn entries(&self) -> &[LoaderInfoEntry]
    {
        &self.entries
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoaderInfoEntry>
    {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a LoaderSnapshot
{
    type Item = &'a LoaderInfoEntry;
    type IntoIter = std::slice::Iter<'a, LoaderInfoEntry>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.entries.iter()
    }
}

/// Bytes needed for a query buffer of `segments` records, or `None` when
/// no buffer that large can exist.
///
/// ```rust
/// use xcoffdb_core::ldinfo::{query_buffer_len, LD_INFO_SIZE};
///
/// assert_eq!(query_buffer_len(64), Some(64 * LD_INFO_SIZE));
/// assert_eq!(query_buffer_len(usize::MAX), None);
/// ```
pub fn query_buffer_len(segments: usize) -> Option<usize>
{
    segments
        .checked_mul(LD_INFO_SIZE)
        .filter(|&len| isize::try_from(len).is_ok())
}

/// Fetch the current loader-info snapshot of `pid`.
///
/// Each attempt first sleeps for `config.settle_delay`. A short buffer is
/// retried with twice the room; any other failure is fatal for this stop.
///
/// ## Errors
///
/// - `LoaderQueryFailed` when the query fails for a reason other than buffer
///   size
/// - `LoaderBufferOverflow` when the buffer would have to grow past what can
///   be allocated
/// - `LoaderInfoDecode` if the returned records are malformed
pub fn query_snapshot(query: &mut dyn LoaderQuery, pid: ProcessId, config: &SessionConfig) -> XcoffResult<LoaderSnapshot>
{
    let mut segments = config.initial_load_segments.max(1);
    loop {
        if !config.settle_delay.is_zero() {
            thread::sleep(config.settle_delay);
        }

        let len = query_buffer_len(segments).ok_or(XcoffError::LoaderBufferOverflow { pid: pid.0, segments })?;
        let mut buf = vec![0u8; len];
        match query.query(pid, &mut buf) {
            Ok(()) => return LoaderSnapshot::parse(&buf),
            Err(LoaderQueryError::BufferTooSmall) => {
                segments = segments.saturating_mul(2);
                debug!(%pid, segments, "loader info buffer too small, growing");
            }
            Err(LoaderQueryError::Failed(source)) => {
                return Err(XcoffError::LoaderQueryFailed { pid: pid.0, source });
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn record(next: u32, fd: i32, names: &[u8]) -> Vec<u8>
    {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&next.to_be_bytes());
        bytes.extend_from_slice(&fd.to_be_bytes());
        bytes.extend_from_slice(&0x1000_0000u32.to_be_bytes());
        bytes.extend_from_slice(&0x1000u32.to_be_bytes());
        bytes.extend_from_slice(&0x2000_0000u32.to_be_bytes());
        bytes.extend_from_slice(&0x400u32.to_be_bytes());
        bytes.extend_from_slice(names);
        bytes
    }

    #[test]
    fn decodes_path_and_member()
    {
        let buf = record(0, 5, b"/usr/lib/libc.a\0shr.o\0");
        let entry = LoaderInfoEntry::decode(&buf, 0).unwrap();
        assert_eq!(entry.path, PathBuf::from("/usr/lib/libc.a"));
        assert_eq!(entry.member_name(), Some("shr.o"));
        assert_eq!(entry.descriptor(), Some(5));
        assert_eq!(entry.text_origin, Address::new(0x1000_0000));
        assert_eq!(entry.data_size, 0x400);
        assert_eq!(entry.display_name(), "/usr/lib/libc.a(shr.o)");
    }

    #[test]
    fn empty_member_is_none()
    {
        let buf = record(0, NO_DESCRIPTOR, b"a.out\0\0");
        let entry = LoaderInfoEntry::decode(&buf, 0).unwrap();
        assert_eq!(entry.member_name(), None);
        assert_eq!(entry.descriptor(), None);
        assert!(entry.is_last());
    }

    #[test]
    fn unterminated_names_are_rejected()
    {
        let buf = record(0, 3, b"/unix\0shr");
        let err = LoaderInfoEntry::decode(&buf, 0).unwrap_err();
        assert!(err.to_string().contains("member"));
    }

    #[test]
    fn truncated_header_is_rejected()
    {
        let buf = record(0, 3, b"x\0\0");
        assert!(LoaderInfoEntry::decode(&buf[..10], 0).is_err());
    }
}

//! Process and file identity types.

use std::fmt;

/// Process ID of a traced process.
///
/// ## Example
///
/// ```rust
/// use xcoffdb_core::types::ProcessId;
///
/// let pid = ProcessId::from(4242);
/// assert_eq!(pid.0, 4242);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Content identity of an open file: device and inode.
///
/// Two module records that name the same file through different paths share
/// an identity, and a file replaced on disk under the same path gets a new
/// one. Module matching compares identities rather than names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity
{
    /// Device the file lives on.
    pub device: u64,
    /// Inode number on that device.
    pub inode: u64,
}

impl FileIdentity
{
    pub const fn new(device: u64, inode: u64) -> Self
    {
        Self { device, inode }
    }
}

impl fmt::Display for FileIdentity
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "dev {} ino {}", self.device, self.inode)
    }
}

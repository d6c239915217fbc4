//! Binary image seam.
//!
//! A binary image is an opened object file (or an object member of an
//! archive). The relocation core needs little from it: its identity, its
//! section headers, section contents by byte range, and the value of a named
//! symbol.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::{Address, FileIdentity};

/// One section of a binary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader
{
    /// Section name, such as `.text`.
    pub name: String,
    /// Virtual address the section was linked at.
    pub vma: Address,
    /// Size in bytes.
    pub size: u64,
    /// Position of the section's contents in the file; zero when it has none.
    pub file_offset: u64,
}

/// An opened object file.
pub trait BinaryImage: fmt::Debug
{
    /// Path the image was opened from; for an archive member, the archive.
    fn path(&self) -> &Path;

    /// Archive member name, if this image is an archive member.
    fn member(&self) -> Option<&str>;

    /// Device and inode of the open file.
    fn identity(&self) -> io::Result<FileIdentity>;

    fn sections(&self) -> Vec<SectionHeader>;

    fn section(&self, name: &str) -> Option<SectionHeader>
    {
        self.sections().into_iter().find(|section| section.name == name)
    }

    /// Fill `buf` from section `name` starting `offset` bytes into it.
    ///
    /// Fails with `UnexpectedEof` if the range runs past the section.
    fn read_section(&self, name: &str, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Linked value of the symbol called `name`.
    fn symbol_value(&self, name: &str) -> Option<Address>;
}

/// Result of probing an archive for a member.
#[derive(Debug)]
pub enum ArchiveMember
{
    Object(Box<dyn BinaryImage>),
    /// The member exists but is not an object file.
    NotObject(String),
    Missing,
}

/// An opened archive of objects.
pub trait ArchiveImage: fmt::Debug
{
    fn path(&self) -> &Path;

    fn member_names(&self) -> Vec<String>;

    fn open_member(&self, name: &str) -> ArchiveMember;
}

/// What a path turned out to be once opened.
#[derive(Debug)]
pub enum OpenedImage
{
    Object(Box<dyn BinaryImage>),
    Archive(Box<dyn ArchiveImage>),
    /// Neither an object nor an archive; carries the reader's reason.
    Unrecognized(String),
}

/// Opens files as binary images and inspects loader descriptors.
pub trait ImageProvider
{
    /// Identity of the file behind a loader descriptor.
    ///
    /// Fails when the descriptor is invalid, which is how the loader reports
    /// a module whose file was removed while still mapped.
    fn descriptor_identity(&self, fd: i32) -> io::Result<FileIdentity>;

    /// Close a loader descriptor that will not be handed to [`ImageProvider::open`].
    fn release_descriptor(&mut self, fd: i32);

    /// Open `path`, reading through `fd` when the loader supplied one.
    /// Opening through a descriptor takes ownership of it.
    fn open(&mut self, path: &Path, fd: Option<i32>) -> io::Result<OpenedImage>;

    /// Absolute form of `path`, with symlinks and `.`/`..` resolved.
    ///
    /// The loader reports absolute paths, so a module named any other way
    /// never matches its loader entry by name.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>
    {
        std::fs::canonicalize(path)
    }
}

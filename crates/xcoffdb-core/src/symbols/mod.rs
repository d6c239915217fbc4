//! # Symbols
//!
//! Seams to the binary-image reader and the symbol loader, plus the
//! session-wide primary symbol table.
//!
//! Symbol tables are owned: a shared-library module record owns its table
//! outright, and the primary executable's table lives in [`SymbolSession`].
//! Freeing a table is dropping it.

pub mod image;
pub mod loader;
pub mod object;

use std::fmt;

use smallvec::{smallvec, SmallVec};

pub use self::image::{ArchiveImage, ArchiveMember, BinaryImage, ImageProvider, OpenedImage, SectionHeader};
pub use self::loader::{ImageSymbolLoader, ImageSymbols};
pub use self::object::ObjectImageProvider;
use crate::error::XcoffResult;
use crate::types::FileIdentity;

/// Per-section relocation offsets of a symbol table.
///
/// Slots [`SectionOffsets::TEXT`], [`SectionOffsets::DATA`] and
/// [`SectionOffsets::BSS`] always exist; loaders may track more.
///
/// ```rust
/// use xcoffdb_core::symbols::SectionOffsets;
///
/// let offsets = SectionOffsets::new(3).relocated(0x2000, -0x100);
/// assert_eq!(offsets.text(), 0x2000);
/// assert_eq!(offsets.data(), -0x100);
/// assert_eq!(offsets.bss(), -0x100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionOffsets
{
    offsets: SmallVec<[i64; 4]>,
}

impl SectionOffsets
{
    /// Slot of the text section offset.
    pub const TEXT: usize = 0;
    /// Slot of the data section offset.
    pub const DATA: usize = 1;
    /// Slot of the bss section offset; bss moves with data.
    pub const BSS: usize = 2;

    /// Zeroed offsets for `count` sections (at least text, data and bss).
    pub fn new(count: usize) -> Self
    {
        Self {
            offsets: smallvec![0; count.max(Self::BSS + 1)],
        }
    }

    pub fn len(&self) -> usize
    {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.offsets.is_empty()
    }

    /// Offset in slot `index`, if the table tracks that many sections.
    pub fn get(&self, index: usize) -> Option<i64>
    {
        self.offsets.get(index).copied()
    }

    pub fn text(&self) -> i64
    {
        self.offsets[Self::TEXT]
    }

    pub fn data(&self) -> i64
    {
        self.offsets[Self::DATA]
    }

    pub fn bss(&self) -> i64
    {
        self.offsets[Self::BSS]
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_
    {
        self.offsets.iter().copied()
    }

    /// A copy with text moved by `text_delta` and data and bss by `data_delta`.
    /// Every other slot keeps its current offset.
    #[must_use]
    pub fn relocated(&self, text_delta: i64, data_delta: i64) -> Self
    {
        let mut next = self.clone();
        next.offsets[Self::TEXT] = text_delta;
        next.offsets[Self::DATA] = data_delta;
        next.offsets[Self::BSS] = data_delta;
        next
    }
}

/// A loaded (or allocated-but-unread) symbol table.
pub trait SymbolTable: fmt::Debug
{
    /// Name used in diagnostics, normally the image path.
    fn name(&self) -> &str;

    /// Identity of the image this table currently reads from.
    ///
    /// Symbol re-reading may replace the image, so this can differ from the
    /// identity the owning module record was created with.
    fn identity(&self) -> std::io::Result<FileIdentity>;

    /// Populate the table from `image`.
    fn read_symbols(&mut self, image: &dyn BinaryImage) -> XcoffResult<()>;

    fn section_offsets(&self) -> &SectionOffsets;

    /// Move every tracked symbol to `offsets`, in place.
    fn relocate(&mut self, offsets: &SectionOffsets);

    /// Offset of the TOC anchor from the start of the data section.
    fn toc_offset(&self) -> u64;
}

/// Creates symbol tables for freshly opened images.
pub trait SymbolLoader
{
    /// Allocate an empty table bound to `image`. Reading symbols is a separate,
    /// fallible step ([`SymbolTable::read_symbols`]).
    fn allocate(&mut self, image: &dyn BinaryImage) -> Box<dyn SymbolTable>;
}

/// Session-wide symbol state: the primary executable's table.
#[derive(Debug, Default)]
pub struct SymbolSession
{
    primary: Option<Box<dyn SymbolTable>>,
}

impl SymbolSession
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// The primary executable's symbol table, if one is loaded.
    pub fn primary(&self) -> Option<&dyn SymbolTable>
    {
        self.primary.as_deref()
    }

    pub fn primary_mut(&mut self) -> Option<&mut (dyn SymbolTable + 'static)>
    {
        self.primary.as_deref_mut()
    }

    /// Install `table` as the primary table, dropping any previous one.
    pub fn set_primary(&mut self, table: Box<dyn SymbolTable>)
    {
        self.primary = Some(table);
    }

    /// Drop the primary table, returning it.
    pub fn discard_primary(&mut self) -> Option<Box<dyn SymbolTable>>
    {
        self.primary.take()
    }
}

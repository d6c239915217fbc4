//! # Module Map
//!
//! The authoritative table of loaded modules and their current addresses.
//!
//! Records live in an arena addressed by [`ModuleId`]; ids are stable for the
//! life of the map and iteration follows discovery order. The first record is
//! normally the primary executable, the only record that owns no symbol
//! table of its own (its symbols are the session's primary table).

pub mod reconcile;
pub mod sections;

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub use self::reconcile::{ReconcileReport, Reconciler};
pub use self::sections::{ExecTarget, SectionTable, TargetSection};
use crate::error::{XcoffError, XcoffResult};
use crate::ldinfo::{display_name, LoaderInfoEntry};
use crate::symbols::{BinaryImage, SymbolTable};
use crate::types::Address;

/// Stable handle to a record in a [`ModuleMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(usize);

impl ModuleId
{
    /// Position of the record in discovery order.
    pub const fn index(self) -> usize
    {
        self.0
    }
}

impl fmt::Display for ModuleId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// One loaded executable or library image.
pub struct ModuleRecord
{
    name: PathBuf,
    member: Option<String>,
    /// Where the text section currently starts.
    pub text_start: Address,
    /// End of the mapped text, exclusive.
    pub text_end: Address,
    /// Where the data section currently starts.
    pub data_start: Address,
    /// End of the mapped data, exclusive.
    pub data_end: Address,
    /// Distance from the loader's text origin to the real text section; the
    /// loader maps the file header just before it.
    pub text_offset: u64,
    /// Address `.text` was linked at.
    pub text_vma: Address,
    /// Address `.data` was linked at.
    pub data_vma: Address,
    image: Box<dyn BinaryImage>,
    objfile: Option<Box<dyn SymbolTable>>,
    /// Whether symbol reading succeeded for this module.
    pub loaded: bool,
}

impl ModuleRecord
{
    /// Build a record from an opened image, at its linked addresses.
    ///
    /// Missing `.text` or `.data` sections leave the corresponding fields zero.
    pub fn from_image(image: Box<dyn BinaryImage>, objfile: Option<Box<dyn SymbolTable>>) -> Self
    {
        let text = image.section(".text");
        let data = image.section(".data");

        let text_vma = text.as_ref().map_or(Address::ZERO, |s| s.vma);
        let text_size = text.as_ref().map_or(0, |s| s.size);
        let text_offset = text.as_ref().map_or(0, |s| s.file_offset);
        let data_vma = data.as_ref().map_or(Address::ZERO, |s| s.vma);
        let data_size = data.as_ref().map_or(0, |s| s.size);

        Self {
            name: image.path().to_path_buf(),
            member: image.member().map(str::to_string),
            text_start: text_vma,
            text_end: text_vma + text_size,
            data_start: data_vma,
            data_end: data_vma + data_size,
            text_offset,
            text_vma,
            data_vma,
            image,
            objfile,
            loaded: false,
        }
    }

    /// Path of the image file; for an archive member, the archive.
    pub fn name(&self) -> &Path
    {
        &self.name
    }

    /// Archive member name, for modules loaded out of an archive.
    pub fn member(&self) -> Option<&str>
    {
        self.member.as_deref()
    }

    /// Name for messages, as `path(member)` for archive members.
    pub fn display_name(&self) -> String
    {
        display_name(&self.name, self.member())
    }

    /// The binary image the record was created from.
    pub fn image(&self) -> &dyn BinaryImage
    {
        &*self.image
    }

    /// The module's own symbol table; `None` for the primary executable.
    pub fn objfile(&self) -> Option<&dyn SymbolTable>
    {
        self.objfile.as_deref()
    }

    /// Mutable access to the module's own symbol table.
    pub fn objfile_mut(&mut self) -> Option<&mut (dyn SymbolTable + 'static)>
    {
        self.objfile.as_deref_mut()
    }

    /// Whether this is the primary executable, the one record without a
    /// symbol table of its own.
    pub fn is_primary(&self) -> bool
    {
        self.objfile.is_none()
    }

    /// Current text addresses, half open.
    pub fn text_range(&self) -> Range<Address>
    {
        self.text_start..self.text_end
    }

    /// Current data addresses, half open.
    pub fn data_range(&self) -> Range<Address>
    {
        self.data_start..self.data_end
    }

    /// Take the addresses the loader reported for this module.
    ///
    /// The text end is measured from the reported origin; only the start
    /// skips the file header.
    pub fn apply_placement(&mut self, entry: &LoaderInfoEntry)
    {
        self.text_start = entry.text_origin;
        self.text_end = self.text_start + entry.text_size;
        self.data_start = entry.data_origin;
        self.data_end = self.data_start + entry.data_size;
        self.text_start = self.text_start + self.text_offset;
    }

    /// Relocation deltas of text and data against the linked addresses.
    pub fn deltas(&self) -> (i64, i64)
    {
        (self.text_start.delta_from(self.text_vma), self.data_start.delta_from(self.data_vma))
    }
}

impl fmt::Debug for ModuleRecord
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("member", &self.member)
            .field("text", &format_args!("{}..{}", self.text_start, self.text_end))
            .field("data", &format_args!("{}..{}", self.data_start, self.data_end))
            .field("text_offset", &self.text_offset)
            .field("primary", &self.is_primary())
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

/// Ordered arena of module records.
#[derive(Debug, Default)]
pub struct ModuleMap
{
    records: Vec<ModuleRecord>,
}

impl ModuleMap
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Append a record, returning its id.
    ///
    /// ## Errors
    ///
    /// `DuplicatePrimary` if `record` has no symbol table and a primary
    /// record already exists.
    pub fn insert(&mut self, record: ModuleRecord) -> XcoffResult<ModuleId>
    {
        if record.is_primary() {
            if let Some((_, existing)) = self.primary() {
                return Err(XcoffError::DuplicatePrimary {
                    existing: existing.name().to_path_buf(),
                });
            }
        }
        self.records.push(record);
        Ok(ModuleId(self.records.len() - 1))
    }

    /// Record for `id`, if the map has one.
    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord>
    {
        self.records.get(id.0)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut ModuleRecord>
    {
        self.records.get_mut(id.0)
    }

    /// The first record, which the loader always reports first too.
    pub fn first(&self) -> Option<(ModuleId, &ModuleRecord)>
    {
        self.records.first().map(|record| (ModuleId(0), record))
    }

    /// The record without a symbol table of its own.
    pub fn primary(&self) -> Option<(ModuleId, &ModuleRecord)>
    {
        self.iter().find(|(_, record)| record.is_primary())
    }

    /// Records in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &ModuleRecord)>
    {
        self.records.iter().enumerate().map(|(index, record)| (ModuleId(index), record))
    }

    /// Ids of every record, in discovery order.
    pub fn ids(&self) -> impl Iterator<Item = ModuleId>
    {
        (0..self.records.len()).map(ModuleId)
    }

    /// First record whose text range contains `address`.
    pub fn find_by_text(&self, address: Address) -> Option<(ModuleId, &ModuleRecord)>
    {
        self.iter().find(|(_, record)| address.within(&record.text_range()))
    }

    pub fn len(&self) -> usize
    {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.records.is_empty()
    }

    /// Drop every record together with the images and symbol tables it owns.
    pub fn clear(&mut self)
    {
        self.records.clear();
    }
}

//! Target section tables.
//!
//! A section table maps address ranges to the module whose section occupies
//! them. The executable target keeps one built from the executable's own
//! sections, which must follow the executable when it is mapped somewhere
//! other than its link address. A core target keeps another, extended with a
//! text and a data entry per shared library found in the core's loader info.

use tracing::debug;

use super::{ModuleId, ModuleMap};
use crate::error::{XcoffError, XcoffResult};
use crate::symbols::BinaryImage;
use crate::types::{Address, FileIdentity};

/// One address range of a target's section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSection
{
    /// Module the section belongs to.
    pub module: ModuleId,
    /// Section name, such as `.text`.
    pub name: String,
    /// First address of the range.
    pub start: Address,
    /// End of the range, exclusive.
    pub end: Address,
}

impl TargetSection
{
    /// Whether `address` falls in `start..end`.
    pub fn contains(&self, address: Address) -> bool
    {
        self.start <= address && address < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionTable
{
    sections: Vec<TargetSection>,
}

impl SectionTable
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// One entry per loaded section of `image`, at its linked address.
    ///
    /// Sections linked at address zero or with no size (`.loader`, `.debug`
    /// and the like) are never mapped and are left out, so they cannot
    /// answer [`SectionTable::find`] for low addresses.
    pub fn from_image(image: &dyn BinaryImage, module: ModuleId) -> Self
    {
        let sections = image
            .sections()
            .into_iter()
            .filter(|section| section.vma != Address::ZERO && section.size > 0)
            .map(|section| TargetSection {
                module,
                start: section.vma,
                end: section.vma + section.size,
                name: section.name,
            })
            .collect();
        Self { sections }
    }

    /// Append a section; later sections never shadow earlier ones in
    /// [`SectionTable::find`].
    pub fn push(&mut self, section: TargetSection)
    {
        self.sections.push(section);
    }

    /// Sections in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, TargetSection>
    {
        self.sections.iter()
    }

    pub fn len(&self) -> usize
    {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.sections.is_empty()
    }

    /// Section containing `address`.
    pub fn find(&self, address: Address) -> Option<&TargetSection>
    {
        self.sections.iter().find(|section| section.contains(address))
    }

    fn shift(&mut self, name: &str, delta: i64)
    {
        for section in self.sections.iter_mut().filter(|section| section.name == name) {
            section.start = section.start.offset_by(delta);
            section.end = section.end.offset_by(delta);
        }
    }
}

/// The executable target: its section table and the image it was last
/// relocated for.
#[derive(Debug, Default)]
pub struct ExecTarget
{
    /// Sections of the executable image, moved along with it.
    pub sections: SectionTable,
    relocated_for: Option<FileIdentity>,
}

impl ExecTarget
{
    /// Executable target over `sections`, not yet relocated for any image.
    pub fn new(sections: SectionTable) -> Self
    {
        Self {
            sections,
            relocated_for: None,
        }
    }

    /// Identity of the executable image the sections were last moved for.
    pub fn relocated_for(&self) -> Option<FileIdentity>
    {
        self.relocated_for
    }

    /// Move `.text`, `.data` and `.bss` to where the primary record says the
    /// executable is mapped.
    ///
    /// Runs once per distinct executable image; later calls for the same
    /// image return `Ok(false)` without touching anything.
    ///
    /// ## Errors
    ///
    /// `ExecSectionsMissing` if the module map or the section table is empty.
    pub fn sync_sections(&mut self, modules: &ModuleMap) -> XcoffResult<bool>
    {
        let (_, primary) = modules.first().ok_or(XcoffError::ExecSectionsMissing("module map is empty"))?;
        let identity = primary.image().identity()?;
        if self.relocated_for == Some(identity) {
            return Ok(false);
        }
        if self.sections.is_empty() {
            return Err(XcoffError::ExecSectionsMissing("executable has no section table"));
        }
        self.relocated_for = Some(identity);

        let (text_delta, data_delta) = primary.deltas();
        self.sections.shift(".text", text_delta);
        self.sections.shift(".data", data_delta);
        self.sections.shift(".bss", data_delta);
        debug!(%identity, text_delta, data_delta, "executable sections relocated");
        Ok(true)
    }
}

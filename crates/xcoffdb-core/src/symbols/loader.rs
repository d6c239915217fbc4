//! Minimal symbol loader over a binary image.
//!
//! Full symbol reading belongs to the symbol-table reader proper. This loader
//! keeps what relocation and inferior calls depend on: the section layout,
//! the current section offsets, and the TOC anchor.

use std::io;

use tracing::debug;

use super::image::BinaryImage;
use super::{SectionOffsets, SymbolLoader, SymbolTable};
use crate::error::{XcoffError, XcoffResult};
use crate::types::{Address, FileIdentity};

/// Name of the TOC anchor symbol emitted by the linker.
pub const TOC_ANCHOR: &str = "TOC";

/// Allocates [`ImageSymbols`] tables.
#[derive(Debug, Default)]
pub struct ImageSymbolLoader;

impl ImageSymbolLoader
{
    #[must_use]
    pub fn new() -> Self
    {
        Self
    }
}

impl SymbolLoader for ImageSymbolLoader
{
    fn allocate(&mut self, image: &dyn BinaryImage) -> Box<dyn SymbolTable>
    {
        Box::new(ImageSymbols::allocate(image))
    }
}

/// Section layout and TOC anchor of one image.
#[derive(Debug, Clone)]
pub struct ImageSymbols
{
    name: String,
    identity: Option<FileIdentity>,
    offsets: SectionOffsets,
    data_vma: Address,
    toc_anchor: Option<Address>,
    loaded: bool,
}

impl ImageSymbols
{
    fn allocate(image: &dyn BinaryImage) -> Self
    {
        let name = match image.member() {
            Some(member) => format!("{}({member})", image.path().display()),
            None => image.path().display().to_string(),
        };
        Self {
            name,
            identity: image.identity().ok(),
            offsets: SectionOffsets::new(3),
            data_vma: Address::ZERO,
            toc_anchor: None,
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool
    {
        self.loaded
    }

    /// Linked address of the TOC anchor, if the image has one.
    pub fn toc_anchor(&self) -> Option<Address>
    {
        self.toc_anchor
    }
}

impl SymbolTable for ImageSymbols
{
    fn name(&self) -> &str
    {
        &self.name
    }

    fn identity(&self) -> io::Result<FileIdentity>
    {
        self.identity
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} has no open image", self.name)))
    }

    fn read_symbols(&mut self, image: &dyn BinaryImage) -> XcoffResult<()>
    {
        let sections = image.sections();
        if !sections.iter().any(|section| section.name == ".text") {
            return Err(XcoffError::NotExecutable {
                path: image.path().to_path_buf(),
                reason: "no .text section".to_string(),
            });
        }

        self.offsets = SectionOffsets::new(sections.len());
        self.data_vma = image.section(".data").map_or(Address::ZERO, |data| data.vma);
        self.toc_anchor = image.symbol_value(TOC_ANCHOR);
        self.identity = image.identity().ok();
        self.loaded = true;
        debug!(name = %self.name, sections = sections.len(), toc = ?self.toc_anchor, "symbols read");
        Ok(())
    }

    fn section_offsets(&self) -> &SectionOffsets
    {
        &self.offsets
    }

    fn relocate(&mut self, offsets: &SectionOffsets)
    {
        self.offsets = offsets.clone();
    }

    fn toc_offset(&self) -> u64
    {
        self.toc_anchor
            .map_or(0, |anchor| anchor.value().wrapping_sub(self.data_vma.value()))
    }
}

#[cfg(test)]
mod tests
{
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::symbols::SectionHeader;

    #[derive(Debug)]
    struct Stub
    {
        path: PathBuf,
        sections: Vec<SectionHeader>,
        toc: Option<Address>,
    }

    impl BinaryImage for Stub
    {
        fn path(&self) -> &Path
        {
            &self.path
        }

        fn member(&self) -> Option<&str>
        {
            Some("shr.o")
        }

        fn identity(&self) -> io::Result<FileIdentity>
        {
            Ok(FileIdentity::new(4, 44))
        }

        fn sections(&self) -> Vec<SectionHeader>
        {
            self.sections.clone()
        }

        fn read_section(&self, _name: &str, _offset: u64, _buf: &mut [u8]) -> io::Result<()>
        {
            Err(io::ErrorKind::Unsupported.into())
        }

        fn symbol_value(&self, name: &str) -> Option<Address>
        {
            (name == TOC_ANCHOR).then_some(self.toc?)
        }
    }

    fn header(name: &str, vma: u64) -> SectionHeader
    {
        SectionHeader {
            name: name.to_string(),
            vma: Address::new(vma),
            size: 0x100,
            file_offset: 0,
        }
    }

    fn stub(toc: Option<u64>) -> Stub
    {
        Stub {
            path: PathBuf::from("/usr/lib/libc.a"),
            sections: vec![header(".text", 0x200), header(".data", 0x2000_0000), header(".bss", 0x2000_0100)],
            toc: toc.map(Address::new),
        }
    }

    #[test]
    fn toc_offset_is_relative_to_data()
    {
        let image = stub(Some(0x2000_0048));
        let mut table = ImageSymbolLoader::new().allocate(&image);
        table.read_symbols(&image).unwrap();

        assert_eq!(table.name(), "/usr/lib/libc.a(shr.o)");
        assert_eq!(table.toc_offset(), 0x48);
        assert_eq!(table.identity().unwrap(), FileIdentity::new(4, 44));
        assert_eq!(table.section_offsets().len(), 3);
    }

    #[test]
    fn no_anchor_means_zero_offset()
    {
        let image = stub(None);
        let mut table = ImageSymbolLoader::new().allocate(&image);
        table.read_symbols(&image).unwrap();
        assert_eq!(table.toc_offset(), 0);
    }

    #[test]
    fn image_without_text_is_rejected()
    {
        let mut image = stub(None);
        image.sections.retain(|section| section.name != ".text");
        let mut table = ImageSymbols::allocate(&image);

        assert!(table.read_symbols(&image).is_err());
        assert!(!table.is_loaded());
    }

    #[test]
    fn relocation_replaces_offsets()
    {
        let image = stub(None);
        let mut table = ImageSymbols::allocate(&image);
        table.read_symbols(&image).unwrap();

        let moved = table.section_offsets().relocated(0xd000_0000, 0x10);
        table.relocate(&moved);
        assert_eq!(table.section_offsets().text(), 0xd000_0000);
        assert_eq!(table.section_offsets().bss(), 0x10);
    }
}

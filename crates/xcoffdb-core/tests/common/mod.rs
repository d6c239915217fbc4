//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Component, Path, PathBuf};

use xcoffdb_core::breakpoints::{BreakpointResetter, BreakpointShadow};
use xcoffdb_core::error::{XcoffError, XcoffResult};
use xcoffdb_core::ldinfo::LD_INFO_HEADER_SIZE;
use xcoffdb_core::symbols::{
    ArchiveImage, ArchiveMember, BinaryImage, ImageProvider, OpenedImage, SectionHeader, SectionOffsets, SymbolLoader, SymbolTable,
};
use xcoffdb_core::target::{LoaderQuery, LoaderQueryError, ProcessControl};
use xcoffdb_core::types::{Address, FileIdentity, ProcessId};
use xcoffdb_core::vmap::{ModuleMap, ModuleRecord};

pub const EXEC_PATH: &str = "/usr/bin/prog";
pub const EXEC_ID: FileIdentity = FileIdentity::new(10, 100);
pub const LIBC_PATH: &str = "/usr/lib/libc.a";
pub const LIBC_MEMBER: &str = "shr.o";
pub const LIBC_ID: FileIdentity = FileIdentity::new(10, 200);

/// In-memory object file.
#[derive(Debug, Clone)]
pub struct MockImage
{
    pub path: PathBuf,
    pub member: Option<String>,
    pub identity: FileIdentity,
    pub sections: Vec<SectionHeader>,
    pub contents: HashMap<String, Vec<u8>>,
    pub symbols: HashMap<String, Address>,
}

impl MockImage
{
    pub fn new(path: &str, identity: FileIdentity) -> Self
    {
        Self {
            path: PathBuf::from(path),
            member: None,
            identity,
            sections: Vec::new(),
            contents: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    pub fn member(mut self, member: &str) -> Self
    {
        self.member = Some(member.to_string());
        self
    }

    pub fn section(mut self, name: &str, vma: u64, size: u64, file_offset: u64) -> Self
    {
        self.sections.push(SectionHeader {
            name: name.to_string(),
            vma: Address::new(vma),
            size,
            file_offset,
        });
        self
    }

    pub fn contents(mut self, name: &str, bytes: Vec<u8>) -> Self
    {
        self.sections.push(SectionHeader {
            name: name.to_string(),
            vma: Address::ZERO,
            size: bytes.len() as u64,
            file_offset: 0,
        });
        self.contents.insert(name.to_string(), bytes);
        self
    }

    pub fn symbol(mut self, name: &str, value: u64) -> Self
    {
        self.symbols.insert(name.to_string(), Address::new(value));
        self
    }
}

impl BinaryImage for MockImage
{
    fn path(&self) -> &Path
    {
        &self.path
    }

    fn member(&self) -> Option<&str>
    {
        self.member.as_deref()
    }

    fn identity(&self) -> io::Result<FileIdentity>
    {
        Ok(self.identity)
    }

    fn sections(&self) -> Vec<SectionHeader>
    {
        self.sections.clone()
    }

    fn read_section(&self, name: &str, offset: u64, buf: &mut [u8]) -> io::Result<()>
    {
        let bytes = self
            .contents
            .get(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        let start = offset as usize;
        let src = bytes
            .get(start..start + buf.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn symbol_value(&self, name: &str) -> Option<Address>
    {
        self.symbols.get(name).copied()
    }
}

/// Shared-library image: `.text` linked at 0x200 (file offset 0x200),
/// `.data` at 0x1200.
pub fn library_image(path: &str, member: Option<&str>, identity: FileIdentity) -> MockImage
{
    let image = MockImage::new(path, identity)
        .section(".text", 0x200, 0x1000, 0x200)
        .section(".data", 0x1200, 0x400, 0x1200)
        .section(".bss", 0x1600, 0x80, 0);
    match member {
        Some(member) => image.member(member),
        None => image,
    }
}

/// Executable image: `.text` linked at 0x1000_0128 (file offset 0x128),
/// `.data` at 0x2000_0000.
pub fn exec_image() -> MockImage
{
    MockImage::new(EXEC_PATH, EXEC_ID)
        .section(".text", 0x1000_0128, 0x800, 0x128)
        .section(".data", 0x2000_0000, 0x100, 0x928)
        .section(".bss", 0x2000_0100, 0x40, 0)
}

#[derive(Debug, Clone)]
pub struct MockArchive
{
    pub path: PathBuf,
    pub members: HashMap<String, MockImage>,
    pub not_objects: HashSet<String>,
}

impl MockArchive
{
    pub fn new(path: &str) -> Self
    {
        Self {
            path: PathBuf::from(path),
            members: HashMap::new(),
            not_objects: HashSet::new(),
        }
    }

    pub fn with_member(mut self, image: MockImage) -> Self
    {
        let name = image.member.clone().unwrap_or_default();
        self.members.insert(name, image);
        self
    }
}

impl ArchiveImage for MockArchive
{
    fn path(&self) -> &Path
    {
        &self.path
    }

    fn member_names(&self) -> Vec<String>
    {
        self.members.keys().cloned().collect()
    }

    fn open_member(&self, name: &str) -> ArchiveMember
    {
        if self.not_objects.contains(name) {
            return ArchiveMember::NotObject("file format not recognized".to_string());
        }
        match self.members.get(name) {
            Some(image) => ArchiveMember::Object(Box::new(image.clone())),
            None => ArchiveMember::Missing,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MockFile
{
    Object(MockImage),
    Archive(MockArchive),
    Garbage,
}

/// Image provider over a fixed set of files and loader descriptors.
#[derive(Debug, Default)]
pub struct MockImageProvider
{
    pub files: HashMap<PathBuf, MockFile>,
    pub descriptors: HashMap<i32, FileIdentity>,
    pub released: Vec<i32>,
    pub opened: Vec<(PathBuf, Option<i32>)>,
    /// Directory relative paths resolve against; `/` when unset.
    pub cwd: Option<PathBuf>,
}

impl MockImageProvider
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn file(mut self, path: &str, file: MockFile) -> Self
    {
        self.files.insert(PathBuf::from(path), file);
        self
    }

    pub fn descriptor(mut self, fd: i32, identity: FileIdentity) -> Self
    {
        self.descriptors.insert(fd, identity);
        self
    }

    pub fn in_directory(mut self, cwd: &str) -> Self
    {
        self.cwd = Some(PathBuf::from(cwd));
        self
    }

    /// Provider knowing the executable and a libc archive with one member.
    pub fn standard() -> Self
    {
        Self::new()
            .file(EXEC_PATH, MockFile::Object(exec_image()))
            .file(
                LIBC_PATH,
                MockFile::Archive(MockArchive::new(LIBC_PATH).with_member(library_image(
                    LIBC_PATH,
                    Some(LIBC_MEMBER),
                    LIBC_ID,
                ))),
            )
    }
}

impl ImageProvider for MockImageProvider
{
    fn descriptor_identity(&self, fd: i32) -> io::Result<FileIdentity>
    {
        self.descriptors
            .get(&fd)
            .copied()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn release_descriptor(&mut self, fd: i32)
    {
        self.released.push(fd);
    }

    fn open(&mut self, path: &Path, fd: Option<i32>) -> io::Result<OpenedImage>
    {
        self.opened.push((path.to_path_buf(), fd));
        match self.files.get(path) {
            Some(MockFile::Object(image)) => Ok(OpenedImage::Object(Box::new(image.clone()))),
            Some(MockFile::Archive(archive)) => Ok(OpenedImage::Archive(Box::new(archive.clone()))),
            Some(MockFile::Garbage) => Ok(OpenedImage::Unrecognized("file format not recognized".to_string())),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>
    {
        let cwd = self.cwd.as_deref().unwrap_or(Path::new("/"));
        Ok(cwd
            .join(path)
            .components()
            .filter(|component| !matches!(component, Component::CurDir))
            .collect())
    }
}

/// Symbol table recording its relocations.
#[derive(Debug)]
pub struct MockSymbolTable
{
    pub name: String,
    pub identity: Option<FileIdentity>,
    pub offsets: SectionOffsets,
    pub toc_offset: u64,
    pub fail_read: bool,
    pub relocations: usize,
}

impl MockSymbolTable
{
    pub fn new(name: &str, identity: Option<FileIdentity>, toc_offset: u64) -> Self
    {
        Self {
            name: name.to_string(),
            identity,
            offsets: SectionOffsets::new(4),
            toc_offset,
            fail_read: false,
            relocations: 0,
        }
    }
}

impl SymbolTable for MockSymbolTable
{
    fn name(&self) -> &str
    {
        &self.name
    }

    fn identity(&self) -> io::Result<FileIdentity>
    {
        self.identity.ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn read_symbols(&mut self, image: &dyn BinaryImage) -> XcoffResult<()>
    {
        if self.fail_read {
            return Err(XcoffError::NotExecutable {
                path: image.path().to_path_buf(),
                reason: "bad string table".to_string(),
            });
        }
        Ok(())
    }

    fn section_offsets(&self) -> &SectionOffsets
    {
        &self.offsets
    }

    fn relocate(&mut self, offsets: &SectionOffsets)
    {
        self.offsets = offsets.clone();
        self.relocations += 1;
    }

    fn toc_offset(&self) -> u64
    {
        self.toc_offset
    }
}

/// Loader handing out [`MockSymbolTable`]s.
#[derive(Debug, Default)]
pub struct MockSymbolLoader
{
    pub toc_offsets: HashMap<PathBuf, u64>,
    pub failing: HashSet<PathBuf>,
    pub allocated: usize,
}

impl MockSymbolLoader
{
    pub fn new() -> Self
    {
        Self::default()
    }
}

impl SymbolLoader for MockSymbolLoader
{
    fn allocate(&mut self, image: &dyn BinaryImage) -> Box<dyn SymbolTable>
    {
        self.allocated += 1;
        let toc = self.toc_offsets.get(image.path()).copied().unwrap_or(0);
        let mut table = MockSymbolTable::new(&image.path().display().to_string(), image.identity().ok(), toc);
        table.fail_read = self.failing.contains(image.path());
        Box::new(table)
    }
}

/// Breakpoint resetter remembering the text starts it saw.
#[derive(Debug, Default)]
pub struct RecordingBreakpoints
{
    pub calls: usize,
    pub seen: Vec<Vec<Address>>,
}

impl BreakpointResetter for RecordingBreakpoints
{
    fn re_set(&mut self, modules: &ModuleMap)
    {
        self.calls += 1;
        self.seen.push(modules.iter().map(|(_, record)| record.text_start).collect());
    }
}

/// A map holding only the primary executable record.
pub fn map_with_exec() -> ModuleMap
{
    let mut map = ModuleMap::new();
    let mut record = ModuleRecord::from_image(Box::new(exec_image()), None);
    record.loaded = true;
    map.insert(record).unwrap();
    map
}

/// One loader-info record to encode.
#[derive(Debug, Clone)]
pub struct LdRecord
{
    pub fd: i32,
    pub text_origin: u32,
    pub text_size: u32,
    pub data_origin: u32,
    pub data_size: u32,
    pub path: String,
    pub member: String,
}

impl LdRecord
{
    pub fn new(fd: i32, path: &str, member: &str, text_origin: u32, data_origin: u32) -> Self
    {
        Self {
            fd,
            text_origin,
            text_size: 0x2000,
            data_origin,
            data_size: 0x800,
            path: path.to_string(),
            member: member.to_string(),
        }
    }
}

/// Encode records into the loader's big-endian chained format. Records are
/// padded to a multiple of four bytes, as the loader does.
pub fn encode_ldinfo(records: &[LdRecord]) -> Vec<u8>
{
    let mut buf = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let mut names = Vec::new();
        names.extend_from_slice(record.path.as_bytes());
        names.push(0);
        names.extend_from_slice(record.member.as_bytes());
        names.push(0);
        while (LD_INFO_HEADER_SIZE + names.len()) % 4 != 0 {
            names.push(0);
        }
        let len = (LD_INFO_HEADER_SIZE + names.len()) as u32;
        let next = if i + 1 == records.len() { 0 } else { len };

        buf.extend_from_slice(&next.to_be_bytes());
        buf.extend_from_slice(&record.fd.to_be_bytes());
        buf.extend_from_slice(&record.text_origin.to_be_bytes());
        buf.extend_from_slice(&record.text_size.to_be_bytes());
        buf.extend_from_slice(&record.data_origin.to_be_bytes());
        buf.extend_from_slice(&record.data_size.to_be_bytes());
        buf.extend_from_slice(&names);
    }
    buf
}

/// Loader query replaying a script of outcomes.
#[derive(Debug, Default)]
pub struct MockLoaderQuery
{
    pub script: VecDeque<Result<Vec<u8>, LoaderQueryError>>,
    pub sizes: Vec<usize>,
}

impl LoaderQuery for MockLoaderQuery
{
    fn query(&mut self, _pid: ProcessId, buf: &mut [u8]) -> Result<(), LoaderQueryError>
    {
        self.sizes.push(buf.len());
        match self.script.pop_front() {
            Some(Ok(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(())
            }
            Some(Err(err)) => Err(err),
            None => Err(LoaderQueryError::Failed(io::Error::other("script exhausted"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call
{
    ReadGpr(u32),
    WriteGpr(u32, u32),
    ReadFpr(u32),
    WriteFpr(u32),
    ReadPc,
    WritePc(Address),
    Insert(Address),
    Remove(Address),
    Resume,
    Wait,
}

/// Traced process with scripted register contents. The program counter is
/// machine register 128 (IAR).
#[derive(Debug, Default)]
pub struct MockProcess
{
    pub gprs: HashMap<u32, u32>,
    pub fprs: HashMap<u32, [u8; 8]>,
    pub memory: HashMap<Address, Vec<u8>>,
    pub calls: Vec<Call>,
    pub stops: VecDeque<ProcessId>,
    pub failing_reads: HashSet<u32>,
    pub failing_writes: HashSet<u32>,
    pub fail_resume: bool,
}

pub const IAR: u32 = 128;

impl MockProcess
{
    /// Process whose registers hold recognizable values.
    pub fn populated(pid: ProcessId) -> Self
    {
        let mut process = Self::default();
        for n in 0..32 {
            process.gprs.insert(n, 0x1000 + n);
            process.fprs.insert(256 + n, f64::from(n).to_be_bytes());
        }
        for id in 128..=134 {
            process.gprs.insert(id, 0x2000 + id);
        }
        process.gprs.insert(IAR, 0x1000_4000);
        process.stops.push_back(pid);
        process
    }

    pub fn writes(&self) -> usize
    {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::WriteGpr(..) | Call::WriteFpr(_)))
            .count()
    }
}

impl ProcessControl for MockProcess
{
    fn read_gpr(&mut self, pid: ProcessId, machine_reg: u32) -> XcoffResult<u32>
    {
        self.calls.push(Call::ReadGpr(machine_reg));
        if self.failing_reads.contains(&machine_reg) {
            return Err(XcoffError::process("read_gpr", pid, io::Error::from_raw_os_error(libc::EIO)));
        }
        Ok(self.gprs.get(&machine_reg).copied().unwrap_or(0))
    }

    fn write_gpr(&mut self, pid: ProcessId, machine_reg: u32, value: u32) -> XcoffResult<()>
    {
        self.calls.push(Call::WriteGpr(machine_reg, value));
        if self.failing_writes.contains(&machine_reg) {
            return Err(XcoffError::process("write_gpr", pid, io::Error::from_raw_os_error(libc::EIO)));
        }
        self.gprs.insert(machine_reg, value);
        Ok(())
    }

    fn read_fpr(&mut self, _pid: ProcessId, machine_reg: u32) -> XcoffResult<[u8; 8]>
    {
        self.calls.push(Call::ReadFpr(machine_reg));
        Ok(self.fprs.get(&machine_reg).copied().unwrap_or([0; 8]))
    }

    fn write_fpr(&mut self, pid: ProcessId, machine_reg: u32, value: [u8; 8]) -> XcoffResult<()>
    {
        self.calls.push(Call::WriteFpr(machine_reg));
        if self.failing_writes.contains(&machine_reg) {
            return Err(XcoffError::process("write_fpr", pid, io::Error::from_raw_os_error(libc::EIO)));
        }
        self.fprs.insert(machine_reg, value);
        Ok(())
    }

    fn read_pc(&mut self, _pid: ProcessId) -> XcoffResult<Address>
    {
        self.calls.push(Call::ReadPc);
        Ok(Address::from(self.gprs.get(&IAR).copied().unwrap_or(0)))
    }

    fn write_pc(&mut self, _pid: ProcessId, pc: Address) -> XcoffResult<()>
    {
        self.calls.push(Call::WritePc(pc));
        self.gprs.insert(IAR, pc.value() as u32);
        Ok(())
    }

    fn insert_breakpoint(&mut self, _pid: ProcessId, address: Address) -> XcoffResult<BreakpointShadow>
    {
        self.calls.push(Call::Insert(address));
        let original_bytes = vec![0x60, 0x00, 0x00, 0x00];
        self.memory.insert(address, vec![0x7d, 0x82, 0x10, 0x08]);
        Ok(BreakpointShadow { address, original_bytes })
    }

    fn remove_breakpoint(&mut self, _pid: ProcessId, shadow: &BreakpointShadow) -> XcoffResult<()>
    {
        self.calls.push(Call::Remove(shadow.address));
        self.memory.insert(shadow.address, shadow.original_bytes.clone());
        Ok(())
    }

    fn resume(&mut self, pid: ProcessId) -> XcoffResult<()>
    {
        self.calls.push(Call::Resume);
        if self.fail_resume {
            return Err(XcoffError::process("resume", pid, io::Error::from_raw_os_error(libc::ESRCH)));
        }
        Ok(())
    }

    fn wait_for_stop(&mut self) -> XcoffResult<ProcessId>
    {
        self.calls.push(Call::Wait);
        self.stops
            .pop_front()
            .ok_or_else(|| XcoffError::process("wait", ProcessId(0), io::Error::from_raw_os_error(libc::ECHILD)))
    }
}

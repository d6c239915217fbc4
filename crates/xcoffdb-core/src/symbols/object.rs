//! `object`-backed binary images.
//!
//! Files are read into memory once; an archive member shares the archive's
//! bytes and remembers its byte range. Identities come from the open file
//! (or from `fstat` on a loader descriptor), so a file replaced on disk after
//! opening keeps reporting the identity of what was actually read.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::os::fd::FromRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object::read::archive::ArchiveFile;
use object::{FileKind, Object, ObjectSection, ObjectSymbol};
use tracing::{debug, trace, warn};

use super::image::{ArchiveImage, ArchiveMember, BinaryImage, ImageProvider, OpenedImage, SectionHeader};
use crate::types::{Address, FileIdentity};

/// [`ImageProvider`] over the local filesystem.
#[derive(Debug, Default)]
pub struct ObjectImageProvider;

impl ObjectImageProvider
{
    #[must_use]
    pub fn new() -> Self
    {
        Self
    }

    fn read_all(mut file: File) -> io::Result<(Arc<[u8]>, FileIdentity)>
    {
        let metadata = file.metadata()?;
        let identity = FileIdentity::new(metadata.dev(), metadata.ino());
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or(0));
        file.read_to_end(&mut bytes)?;
        Ok((Arc::from(bytes), identity))
    }

    /// Classify already-read bytes.
    pub fn classify(path: &Path, data: Arc<[u8]>, identity: FileIdentity) -> OpenedImage
    {
        match FileKind::parse(&*data) {
            Ok(FileKind::Archive) => match ObjectArchive::parse(path, data, identity) {
                Ok(archive) => OpenedImage::Archive(Box::new(archive)),
                Err(err) => OpenedImage::Unrecognized(err.to_string()),
            },
            Ok(_) => {
                let range = 0..data.len();
                match ObjectImage::parse(path.to_path_buf(), None, data, range, identity) {
                    Ok(image) => OpenedImage::Object(Box::new(image)),
                    Err(err) => OpenedImage::Unrecognized(err.to_string()),
                }
            }
            Err(err) => OpenedImage::Unrecognized(err.to_string()),
        }
    }
}

impl ImageProvider for ObjectImageProvider
{
    #[allow(unsafe_code, clippy::unnecessary_cast, clippy::cast_sign_loss)]
    fn descriptor_identity(&self, fd: i32) -> io::Result<FileIdentity>
    {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        // SAFETY: `stat` is plain data and fstat only writes into it.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: an invalid descriptor makes fstat fail with EBADF; it never
        // touches memory other than `stat`.
        let rc = unsafe { libc::fstat(fd, &mut stat) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(FileIdentity::new(stat.st_dev as u64, stat.st_ino as u64))
    }

    #[allow(unsafe_code)]
    fn release_descriptor(&mut self, fd: i32)
    {
        if fd < 0 {
            return;
        }
        // SAFETY: the loader handed this descriptor to us; nothing else owns it.
        if unsafe { libc::close(fd) } < 0 {
            debug!(fd, error = %io::Error::last_os_error(), "closing loader descriptor failed");
        }
    }

    #[allow(unsafe_code)]
    fn open(&mut self, path: &Path, fd: Option<i32>) -> io::Result<OpenedImage>
    {
        let file = match fd {
            // SAFETY: opening through a descriptor transfers its ownership to us.
            Some(fd) if fd >= 0 => unsafe { File::from_raw_fd(fd) },
            _ => File::open(path)?,
        };
        let (data, identity) = Self::read_all(file)?;
        trace!(path = %path.display(), bytes = data.len(), %identity, "image read");
        Ok(Self::classify(path, data, identity))
    }
}

/// An object file, or an object member of an archive.
#[derive(Debug, Clone)]
pub struct ObjectImage
{
    path: PathBuf,
    member: Option<String>,
    identity: FileIdentity,
    data: Arc<[u8]>,
    range: Range<usize>,
    sections: Vec<(SectionHeader, Option<Range<usize>>)>,
}

impl ObjectImage
{
    fn parse(
        path: PathBuf,
        member: Option<String>,
        data: Arc<[u8]>,
        range: Range<usize>,
        identity: FileIdentity,
    ) -> object::Result<Self>
    {
        let mut sections = Vec::new();
        {
            let file = object::File::parse(&data[range.clone()])?;
            for section in file.sections() {
                let name = section.name().unwrap_or_default().to_string();
                let file_range = section.file_range();
                let contents = file_range.and_then(|(offset, size)| {
                    let start = range.start.checked_add(usize::try_from(offset).ok()?)?;
                    let end = start.checked_add(usize::try_from(size).ok()?)?;
                    (end <= range.end).then_some(start..end)
                });
                sections.push((
                    SectionHeader {
                        name,
                        vma: Address::new(section.address()),
                        size: section.size(),
                        file_offset: file_range.map_or(0, |(offset, _)| offset),
                    },
                    contents,
                ));
            }
        }

        Ok(Self {
            path,
            member,
            identity,
            data,
            range,
            sections,
        })
    }

    fn bytes(&self) -> &[u8]
    {
        &self.data[self.range.clone()]
    }
}

impl BinaryImage for ObjectImage
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
        self.sections.iter().map(|(header, _)| header.clone()).collect()
    }

    fn read_section(&self, name: &str, offset: u64, buf: &mut [u8]) -> io::Result<()>
    {
        let (header, contents) = self
            .sections
            .iter()
            .find(|(header, _)| header.name == name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no section {name}")))?;
        let contents = contents
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("section {} has no contents", header.name)))?;

        let start = usize::try_from(offset)
            .ok()
            .and_then(|offset| contents.start.checked_add(offset))
            .filter(|start| start.saturating_add(buf.len()) <= contents.end)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn symbol_value(&self, name: &str) -> Option<Address>
    {
        let file = object::File::parse(self.bytes()).ok()?;
        file.symbols()
            .find(|symbol| symbol.name().is_ok_and(|symbol_name| symbol_name == name))
            .map(|symbol| Address::new(symbol.address()))
    }
}

/// An archive whose members are opened on demand.
#[derive(Debug)]
struct ObjectArchive
{
    path: PathBuf,
    identity: FileIdentity,
    data: Arc<[u8]>,
    members: Vec<(String, Range<usize>)>,
}

impl ObjectArchive
{
    fn parse(path: &Path, data: Arc<[u8]>, identity: FileIdentity) -> object::Result<Self>
    {
        let mut members = Vec::new();
        {
            let archive = ArchiveFile::parse(&*data)?;
            for member in archive.members() {
                let member = member?;
                let name = String::from_utf8_lossy(member.name()).into_owned();
                let (offset, size) = member.file_range();
                let (Ok(start), Ok(size)) = (usize::try_from(offset), usize::try_from(size)) else {
                    warn!(archive = %path.display(), member = %name, "archive member out of range");
                    continue;
                };
                members.push((name, start..start + size));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            identity,
            data,
            members,
        })
    }
}

impl ArchiveImage for ObjectArchive
{
    fn path(&self) -> &Path
    {
        &self.path
    }

    fn member_names(&self) -> Vec<String>
    {
        self.members.iter().map(|(name, _)| name.clone()).collect()
    }

    fn open_member(&self, name: &str) -> ArchiveMember
    {
        let Some((_, range)) = self.members.iter().find(|(member, _)| member == name) else {
            return ArchiveMember::Missing;
        };
        if range.end > self.data.len() {
            return ArchiveMember::NotObject(format!("member {name} extends past end of archive"));
        }
        match ObjectImage::parse(
            self.path.clone(),
            Some(name.to_string()),
            self.data.clone(),
            range.clone(),
            self.identity,
        ) {
            Ok(image) => ArchiveMember::Object(Box::new(image)),
            Err(err) => ArchiveMember::NotObject(err.to_string()),
        }
    }
}

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::{fs, io, process};

use clap::{Parser, Subcommand};
use xcoffdb_core::ldinfo::{LoaderSnapshot, LOADER_SECTION};
use xcoffdb_core::symbols::{
    ArchiveMember, BinaryImage, ImageProvider, ImageSymbolLoader, ObjectImageProvider, OpenedImage, SectionHeader, SymbolLoader,
};
use xcoffdb_core::types::FileIdentity;
use xcoffdb_core::vmap::ModuleRecord;
use xcoffdb_core::{Address, Session, SessionConfig, XcoffError, XcoffResult};
use xcoffdb_utils::{info, init_logging};

/// Inspect XCOFF images, loader-info dumps and cores the way the debugger sees them.
#[derive(Parser, Debug)]
#[command(name = "xcoffdb")]
#[command(version)]
#[command(about = "Inspect XCOFF module placement, loader info and TOC resolution", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Describe an object file or archive member as a module record
    Image
    {
        /// Path to the object file or archive
        path: PathBuf,
        /// Archive member to open
        #[arg(short, long)]
        member: Option<String>,
    },
    /// Decode a raw loader-info buffer
    Ldinfo
    {
        /// File holding the records as returned by the loader query
        dump: PathBuf,
    },
    /// Relocate an executable to the loader info saved from one of its cores
    Core
    {
        /// The executable the core was dumped from
        executable: PathBuf,
        /// Contents of the core's `.ldinfo` section
        ldinfo: PathBuf,
        /// Resolve the TOC pointer for a call to this address (hex: 0xd0001234, or decimal)
        #[arg(long)]
        toc: Option<String>,
    },
}

fn main()
{
    // Defaults to INFO level and Pretty format unless RUST_LOG says otherwise
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    let cli = Cli::parse();
    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    match cli.command {
        Commands::Image { path, member } => {
            let record = open_record(&path, member.as_deref())?;
            print_record(&record);

            let mut table = ImageSymbolLoader::new().allocate(record.image());
            match table.read_symbols(record.image()) {
                Ok(()) => println!("  toc offset:  {:#x}", table.toc_offset()),
                Err(e) => println!("  symbols:     unreadable ({e})"),
            }
            Ok(())
        }
        Commands::Ldinfo { dump } => {
            let bytes = fs::read(&dump)?;
            let snapshot = LoaderSnapshot::parse(&bytes)?;
            info!("Decoded {} loader records from {}", snapshot.len(), dump.display());
            for (i, entry) in snapshot.iter().enumerate() {
                println!("[{i}] {}", entry.display_name());
                println!("    fd:    {}", entry.fd);
                println!("    text:  {} size {:#x}", entry.text_origin, entry.text_size);
                println!("    data:  {} size {:#x}", entry.data_origin, entry.data_size);
            }
            Ok(())
        }
        Commands::Core { executable, ldinfo, toc } => {
            let mut session = Session::with_defaults(SessionConfig::from_env());
            session.load_executable(&executable)?;

            let dump = LoaderSectionDump::read(&ldinfo)?;
            let report = session.relocate_core(&dump)?;
            if let Some(reason) = &report.aborted {
                println!("loader info scan stopped early: {reason}");
            }

            for (id, record) in session.modules().iter() {
                println!("{id}");
                print_record(record);
            }
            println!("core sections:");
            for section in session.core_sections().iter() {
                println!("  {} {:<6} {}..{}", section.module, section.name, section.start, section.end);
            }

            if let Some(pc) = toc {
                let pc = parse_address(&pc)?;
                println!("TOC for {pc}: {}", session.find_toc_address(pc)?);
            }
            Ok(())
        }
    }
}

/// A saved core loader section, presented as a core image with just that section.
#[derive(Debug)]
struct LoaderSectionDump
{
    path: PathBuf,
    bytes: Vec<u8>,
    identity: FileIdentity,
}

impl LoaderSectionDump
{
    fn read(path: &Path) -> io::Result<Self>
    {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes: fs::read(path)?,
            identity: FileIdentity::new(metadata.dev(), metadata.ino()),
        })
    }
}

impl BinaryImage for LoaderSectionDump
{
    fn path(&self) -> &Path
    {
        &self.path
    }

    fn member(&self) -> Option<&str>
    {
        None
    }

    fn identity(&self) -> io::Result<FileIdentity>
    {
        Ok(self.identity)
    }

    fn sections(&self) -> Vec<SectionHeader>
    {
        vec![SectionHeader {
            name: LOADER_SECTION.to_string(),
            vma: Address::ZERO,
            size: self.bytes.len() as u64,
            file_offset: 0,
        }]
    }

    fn read_section(&self, name: &str, offset: u64, buf: &mut [u8]) -> io::Result<()>
    {
        if name != LOADER_SECTION {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no section {name}")));
        }
        let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.bytes.get(start..end))
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn symbol_value(&self, _name: &str) -> Option<Address>
    {
        None
    }
}

fn open_record(path: &Path, member: Option<&str>) -> XcoffResult<ModuleRecord>
{
    let opened = ObjectImageProvider::new()
        .open(path, None)
        .map_err(|source| XcoffError::ImageOpen {
            path: path.to_path_buf(),
            source,
        })?;

    let image = match (opened, member) {
        (OpenedImage::Object(image), None) => image,
        (OpenedImage::Object(_), Some(_)) => return Err(not_executable(path, "not an archive")),
        (OpenedImage::Archive(archive), Some(member)) => match archive.open_member(member) {
            ArchiveMember::Object(image) => image,
            ArchiveMember::NotObject(reason) => return Err(not_executable(path, &reason)),
            ArchiveMember::Missing => {
                return Err(XcoffError::MemberMissing {
                    path: path.to_path_buf(),
                    member: member.to_string(),
                });
            }
        },
        (OpenedImage::Archive(archive), None) => {
            let members = archive.member_names().join(", ");
            return Err(not_executable(path, &format!("archive; pick a member with --member ({members})")));
        }
        (OpenedImage::Unrecognized(reason), _) => return Err(not_executable(path, &reason)),
    };
    Ok(ModuleRecord::from_image(image, None))
}

fn print_record(record: &ModuleRecord)
{
    println!("{}", record.display_name());
    println!("  text:        {}..{} (linked at {})", record.text_start, record.text_end, record.text_vma);
    println!("  text offset: {:#x}", record.text_offset);
    println!("  data:        {}..{} (linked at {})", record.data_start, record.data_end, record.data_vma);
}

fn not_executable(path: &Path, reason: &str) -> XcoffError
{
    XcoffError::NotExecutable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn parse_address(text: &str) -> Result<Address, std::num::ParseIntError>
{
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => text.parse()?,
    };
    Ok(Address::new(value))
}

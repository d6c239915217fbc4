//! Loader info frozen in a core image.
//!
//! A core image carries the loader's report at the time of the dump in its
//! `.ldinfo` section, in the same record format the live query returns. The
//! records are read one at a time straight from the section, since the
//! section size says nothing about where the chain really ends.

use std::io;

use tracing::{debug, error, info_span, warn};

use super::{LoaderInfoEntry, LoaderInfoHeader, LD_INFO_HEADER_SIZE, NO_DESCRIPTOR};
use crate::error::{XcoffError, XcoffResult};
use crate::symbols::BinaryImage;
use crate::vmap::reconcile::relocate_symbols;
use crate::vmap::{ExecTarget, ModuleId, Reconciler, SectionTable, TargetSection};

/// Name of the core section holding the loader records.
pub const LOADER_SECTION: &str = ".ldinfo";

/// Starting size of the scratch buffer for a record's names.
const NAME_BUFFER_INITIAL: usize = 64;

/// What a core relocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreReport
{
    /// Records decoded and applied.
    pub records: usize,
    /// Module records created for shared libraries.
    pub created: usize,
    /// Records naming an archive member that could not be found.
    pub skipped: usize,
    /// Sections added to the core target's table.
    pub sections_added: usize,
    /// Whether the executable's own sections were moved.
    pub exec_synced: bool,
    /// Why the scan stopped early, if it did. Records before that point
    /// stay applied.
    pub aborted: Option<String>,
}

/// Read the record at `offset` of the loader section of `core`.
///
/// The descriptor of the result is always [`NO_DESCRIPTOR`]: descriptors
/// recorded in a core belong to a process that no longer exists.
pub fn read_core_record(core: &dyn BinaryImage, offset: u64) -> io::Result<LoaderInfoEntry>
{
    let mut header = [0u8; LD_INFO_HEADER_SIZE];
    core.read_section(LOADER_SECTION, offset, &mut header)?;
    let header = LoaderInfoHeader::decode(&header);

    let mut names = Vec::with_capacity(NAME_BUFFER_INITIAL);
    let mut position = offset + LD_INFO_HEADER_SIZE as u64;
    let mut terminators = 0;
    while terminators < 2 {
        if names.len() == names.capacity() {
            names.reserve_exact(names.capacity());
        }
        let mut byte = [0u8; 1];
        core.read_section(LOADER_SECTION, position, &mut byte)?;
        position += 1;
        if byte[0] == 0 {
            terminators += 1;
        }
        names.push(byte[0]);
    }

    let mut entry = LoaderInfoEntry::from_parts(header, &names);
    entry.fd = NO_DESCRIPTOR;
    Ok(entry)
}

/// Apply the loader info of `core` to the module map.
///
/// The first record describes the executable, whose record must already be
/// in the map; each later record gets a new module record plus a `.text` and
/// a `.data` entry in `core_sections`. Once the chain ends, the executable's
/// sections are moved and breakpoints re-set.
///
/// ## Errors
///
/// - `NoExecutable` if the module map is empty
/// - `LoaderSectionMissing` if `core` has no loader section
/// - whatever module creation fails with (see [`Reconciler::add_module`])
///
/// A record that cannot be read is not an error: the scan stops with a
/// diagnostic and the report says why.
pub fn relocate_core(
    reconciler: &mut Reconciler<'_>,
    core: &dyn BinaryImage,
    core_sections: &mut SectionTable,
    exec: &mut ExecTarget,
) -> XcoffResult<CoreReport>
{
    let _span = info_span!("relocate_core", core = %core.path().display()).entered();

    let (exec_id, _) = reconciler.modules.first().ok_or(XcoffError::NoExecutable)?;
    if core.section(LOADER_SECTION).is_none() {
        return Err(XcoffError::LoaderSectionMissing { section: LOADER_SECTION });
    }

    let mut report = CoreReport::default();
    let mut offset = 0u64;
    loop {
        let entry = match read_core_record(core, offset) {
            Ok(entry) => entry,
            Err(err) => {
                error!("Couldn't get ldinfo from core file at offset {offset:#x}: {err}");
                report.aborted = Some(format!("record at offset {offset:#x}: {err}"));
                return Ok(report);
            }
        };

        let id = if offset == 0 {
            Some(exec_id)
        } else {
            let created = reconciler.add_module(&entry)?;
            if created.is_some() {
                report.created += 1;
            } else {
                report.skipped += 1;
            }
            created
        };
        if let Some(id) = id {
            apply_core_record(reconciler, id, id != exec_id, &entry, core_sections, &mut report);
        }
        report.records += 1;

        if entry.is_last() {
            break;
        }
        match offset.checked_add(u64::from(entry.next)) {
            Some(next) => offset = next,
            None => {
                warn!(offset, next = entry.next, "loader record chain overflows");
                report.aborted = Some(format!("next offset {:#x} overflows at {offset:#x}", entry.next));
                return Ok(report);
            }
        }
    }

    report.exec_synced = exec.sync_sections(reconciler.modules)?;
    reconciler.breakpoints.re_set(reconciler.modules);
    debug!(?report, "core loader info applied");
    Ok(report)
}

fn apply_core_record(
    reconciler: &mut Reconciler<'_>,
    id: ModuleId,
    library: bool,
    entry: &LoaderInfoEntry,
    core_sections: &mut SectionTable,
    report: &mut CoreReport,
)
{
    let Some(record) = reconciler.modules.get_mut(id) else {
        return;
    };
    record.apply_placement(entry);

    if library {
        core_sections.push(TargetSection {
            module: id,
            name: ".text".to_string(),
            start: record.text_start,
            end: record.text_end,
        });
        core_sections.push(TargetSection {
            module: id,
            name: ".data".to_string(),
            start: record.data_start,
            end: record.data_end,
        });
        report.sections_added += 2;
    }

    relocate_symbols(record, reconciler.symbols);
    debug!(module = %record.display_name(), text = %record.text_start, data = %record.data_start, "core module placed");
}

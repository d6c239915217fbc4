//! Loader-info reconciliation.
//!
//! Given a loader snapshot, bring the module map in line with it: move every
//! record the snapshot names to its reported addresses, create records for
//! modules seen for the first time, and relocate the symbol tables to match.
//!
//! Records are matched by name and then by file identity. A name alone is
//! not enough: the same file can be mapped under two paths, and symbol
//! re-reading can swap the open image out from under a record.

use smallvec::SmallVec;
use tracing::{debug, error, info_span, trace, warn};

use super::{ModuleId, ModuleMap, ModuleRecord};
use crate::breakpoints::BreakpointResetter;
use crate::error::{XcoffError, XcoffResult};
use crate::ldinfo::{LoaderInfoEntry, LoaderSnapshot};
use crate::symbols::{ArchiveMember, ImageProvider, OpenedImage, SymbolLoader, SymbolSession, SymbolTable};
use crate::types::FileIdentity;

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport
{
    /// Record relocations, counting each matching record once per entry.
    pub relocated: usize,
    /// Records created for modules seen for the first time.
    pub created: usize,
    /// Entries that needed the second matching attempt.
    pub retries: usize,
    /// Entries whose file vanished while mapped; their records were kept.
    pub vanished: usize,
    /// Entries still unmatched after the retry.
    pub unmatched: usize,
    /// Whether some entry mapped back to the primary executable.
    pub exec_mapped: bool,
    /// Whether the primary symbol table was discarded as stale.
    pub primary_discarded: bool,
}

/// Applies loader snapshots to a module map.
///
/// Borrows everything it touches for the duration of one pass, so the
/// session stays the owner of the map and the collaborators.
pub struct Reconciler<'a>
{
    pub(crate) modules: &'a mut ModuleMap,
    pub(crate) symbols: &'a mut SymbolSession,
    pub(crate) images: &'a mut dyn ImageProvider,
    pub(crate) loader: &'a mut dyn SymbolLoader,
    pub(crate) breakpoints: &'a mut dyn BreakpointResetter,
}

impl<'a> Reconciler<'a>
{
    /// Borrow the map, the symbol session and the collaborators for one
    /// pass.
    pub fn new(
        modules: &'a mut ModuleMap,
        symbols: &'a mut SymbolSession,
        images: &'a mut dyn ImageProvider,
        loader: &'a mut dyn SymbolLoader,
        breakpoints: &'a mut dyn BreakpointResetter,
    ) -> Self
    {
        Self {
            modules,
            symbols,
            images,
            loader,
            breakpoints,
        }
    }

    /// Apply a live snapshot.
    ///
    /// Every entry is processed in order. An entry matching nothing gets a
    /// new record and exactly one more matching attempt; if that still finds
    /// nothing the entry is left unmatched. Afterwards, a primary symbol table
    /// that no entry mapped back to is discarded as belonging to some other
    /// copy of the program, and breakpoints are re-set.
    ///
    /// ## Errors
    ///
    /// A module that cannot be opened or is not an object aborts the pass.
    /// Entries already applied stay applied.
    pub fn reconcile(&mut self, snapshot: &LoaderSnapshot) -> XcoffResult<ReconcileReport>
    {
        let _span = info_span!("reconcile", entries = snapshot.len()).entered();
        let mut report = ReconcileReport::default();

        for entry in snapshot {
            let identity = match self.images.descriptor_identity(entry.fd) {
                Ok(identity) => identity,
                Err(err) => {
                    // The loader invalidates the descriptor of a file that was
                    // removed while mapped. Its symbols are still good.
                    warn!(
                        "{} (fd={}) has disappeared, keeping its symbols: {err}",
                        entry.display_name(),
                        entry.fd
                    );
                    report.vanished += 1;
                    continue;
                }
            };

            let mut retried = false;
            loop {
                let matched = self.remap_matching(entry, identity, retried, &mut report);
                if matched > 0 {
                    break;
                }
                if retried {
                    debug!(module = %entry.display_name(), "still unmatched after retry");
                    report.unmatched += 1;
                    break;
                }
                if self.add_module(entry)?.is_some() {
                    report.created += 1;
                }
                report.retries += 1;
                retried = true;
            }
        }

        if !report.exec_mapped {
            if let Some(stale) = self.symbols.discard_primary() {
                warn!(
                    "Symbol file {} is not mapped; discarding it. If in fact that file has symbols which the \
                     mapped files lack, load them again and relocate them to the proper address.",
                    stale.name()
                );
                report.primary_discarded = true;
            }
        }

        self.breakpoints.re_set(self.modules);
        debug!(?report, "reconcile finished");
        Ok(report)
    }

    /// Relocate every record that `entry` describes; returns how many.
    fn remap_matching(&mut self, entry: &LoaderInfoEntry, identity: FileIdentity, retried: bool, report: &mut ReconcileReport) -> usize
    {
        let candidates: SmallVec<[ModuleId; 4]> = self
            .modules
            .iter()
            .filter(|(_, record)| names_match(entry, record))
            .map(|(id, _)| id)
            .collect();

        let mut matched = 0;
        for id in candidates {
            let Some(record) = self.modules.get_mut(id) else {
                continue;
            };

            let table: Option<&dyn SymbolTable> = match record.objfile() {
                Some(table) => Some(table),
                None => self.symbols.primary(),
            };
            let record_identity = match table.map(|table| table.identity()) {
                Some(Ok(identity)) => identity,
                Some(Err(err)) => {
                    warn!("Unable to stat {}, keeping its symbols: {err}", entry.display_name());
                    continue;
                }
                None => {
                    warn!("Unable to stat {}, keeping its symbols: no symbol file", entry.display_name());
                    continue;
                }
            };
            if record_identity != identity {
                trace!(module = %record.display_name(), %record_identity, %identity, "same name, different file");
                continue;
            }

            if !retried && matched == 0 {
                self.images.release_descriptor(entry.fd);
            }
            matched += 1;

            record.apply_placement(entry);
            if record.is_primary() {
                report.exec_mapped = true;
            }
            relocate_symbols(record, self.symbols);
            report.relocated += 1;
            debug!(
                module = %record.display_name(),
                text = %record.text_start,
                data = %record.data_start,
                "module remapped"
            );
        }
        matched
    }

    /// Open the module `entry` names and append a record for it.
    ///
    /// Returns `None`, after a warning, when the entry names an archive
    /// member the archive does not contain.
    ///
    /// ## Errors
    ///
    /// `ImageOpen` if the file cannot be opened, `NotExecutable` if neither it
    /// nor the named member is an object file.
    pub(crate) fn add_module(&mut self, entry: &LoaderInfoEntry) -> XcoffResult<Option<ModuleId>>
    {
        let opened = self
            .images
            .open(&entry.path, entry.descriptor())
            .map_err(|source| XcoffError::ImageOpen {
                path: entry.path.clone(),
                source,
            })?;

        let image = match opened {
            OpenedImage::Object(image) => image,
            OpenedImage::Archive(archive) => match archive.open_member(&entry.member) {
                ArchiveMember::Object(image) => image,
                ArchiveMember::Missing => {
                    warn!("\"{}\": member \"{}\" missing.", entry.path.display(), entry.member);
                    return Ok(None);
                }
                ArchiveMember::NotObject(reason) => {
                    return Err(XcoffError::NotExecutable {
                        path: entry.path.clone(),
                        reason,
                    });
                }
            },
            OpenedImage::Unrecognized(reason) => {
                return Err(XcoffError::NotExecutable {
                    path: entry.path.clone(),
                    reason,
                });
            }
        };

        let mut table = self.loader.allocate(&*image);
        let read = table.read_symbols(&*image);
        let mut record = ModuleRecord::from_image(image, Some(table));

        match read {
            Ok(()) => {
                relocate_symbols(&mut record, self.symbols);
                record.loaded = true;
            }
            Err(err) => {
                error!("Error while reading shared library symbols for {}: {err}", record.display_name());
            }
        }

        let id = self.modules.insert(record)?;
        debug!(%id, module = %entry.display_name(), "module added");
        Ok(Some(id))
    }
}

/// Whether `record` could be the module `entry` names.
///
/// Relative paths from the loader are not comparable to ours, so only
/// absolute ones are checked; a member name, when present, must match.
fn names_match(entry: &LoaderInfoEntry, record: &ModuleRecord) -> bool
{
    if entry.path.is_absolute() && entry.path != record.name() {
        return false;
    }
    match entry.member_name() {
        Some(member) => record.member() == Some(member),
        None => true,
    }
}

/// Move the symbol table behind `record` to the record's current addresses.
///
/// The primary executable's record has no table of its own; its symbols are
/// the session's primary table, when there is one.
pub(crate) fn relocate_symbols(record: &mut ModuleRecord, symbols: &mut SymbolSession)
{
    let (text_delta, data_delta) = record.deltas();
    let table = match record.objfile_mut() {
        Some(table) => table,
        None => match symbols.primary_mut() {
            Some(table) => table,
            None => return,
        },
    };

    let offsets = table.section_offsets().relocated(text_delta, data_delta);
    table.relocate(&offsets);
    trace!(table = table.name(), text_delta, data_delta, "symbols relocated");
}

//! # Session
//!
//! Owns the state one debugging session relocates: the module map, the
//! primary symbol table, the executable and core section tables and the
//! breakpoint table, plus the image and symbol collaborators. Every
//! operation borrows what it needs from here; nothing is global.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, info_span};

use crate::breakpoints::BreakpointTable;
use crate::config::SessionConfig;
use crate::error::{XcoffError, XcoffResult};
use crate::ldinfo::{query_snapshot, relocate_core, CoreReport, LoaderSnapshot};
use crate::registers::RegisterTransfer;
use crate::symbols::{BinaryImage, ImageProvider, ImageSymbolLoader, ObjectImageProvider, OpenedImage, SymbolLoader, SymbolSession};
use crate::target::{LoaderQuery, ProcessControl};
use crate::toc;
use crate::types::{Address, ProcessId, RegisterBuffer};
use crate::vmap::{ExecTarget, ModuleId, ModuleMap, ModuleRecord, ReconcileReport, Reconciler, SectionTable};

/// Relocation state of one debugging session.
pub struct Session
{
    config: SessionConfig,
    modules: ModuleMap,
    symbols: SymbolSession,
    exec: ExecTarget,
    core_sections: SectionTable,
    breakpoints: BreakpointTable,
    images: Box<dyn ImageProvider>,
    loader: Box<dyn SymbolLoader>,
}

impl Session
{
    /// Empty session over the given image and symbol collaborators.
    pub fn new(config: SessionConfig, images: Box<dyn ImageProvider>, loader: Box<dyn SymbolLoader>) -> Self
    {
        Self {
            config,
            modules: ModuleMap::new(),
            symbols: SymbolSession::new(),
            exec: ExecTarget::default(),
            core_sections: SectionTable::new(),
            breakpoints: BreakpointTable::new(),
            images,
            loader,
        }
    }

    /// Session reading images from disk with the `object` crate.
    pub fn with_defaults(config: SessionConfig) -> Self
    {
        Self::new(config, Box::new(ObjectImageProvider::new()), Box::new(ImageSymbolLoader::new()))
    }

    pub fn config(&self) -> &SessionConfig
    {
        &self.config
    }

    /// The module map, in discovery order.
    pub fn modules(&self) -> &ModuleMap
    {
        &self.modules
    }

    pub fn symbols(&self) -> &SymbolSession
    {
        &self.symbols
    }

    /// Section table of the executable target.
    pub fn exec(&self) -> &ExecTarget
    {
        &self.exec
    }

    /// Sections added for shared libraries found in a core image.
    pub fn core_sections(&self) -> &SectionTable
    {
        &self.core_sections
    }

    pub fn breakpoints(&self) -> &BreakpointTable
    {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointTable
    {
        &mut self.breakpoints
    }

    /// Make `path` the session's executable.
    ///
    /// Forgets every module, symbol table and section table of the previous
    /// executable, then records the new one as the primary module with its
    /// symbols in the session's primary table. The module is named by the
    /// canonical form of `path`, which is what the loader will report.
    ///
    /// ## Errors
    ///
    /// - `ImageOpen` if the path cannot be resolved or the file cannot be read
    /// - `NotExecutable` if it is not an object file
    /// - the symbol loader's error if its symbols cannot be read
    pub fn load_executable(&mut self, path: &Path) -> XcoffResult<ModuleId>
    {
        let _span = info_span!("load_executable", path = %path.display()).entered();

        self.modules.clear();
        self.symbols.discard_primary();
        self.exec = ExecTarget::default();
        self.core_sections = SectionTable::new();

        let canonical = self.images.canonicalize(path).map_err(|source| XcoffError::ImageOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let path = canonical.as_path();
        debug!(canonical = %path.display(), "executable path resolved");

        let image = match self.images.open(path, None) {
            Ok(OpenedImage::Object(image)) => image,
            Ok(OpenedImage::Archive(_)) => {
                return Err(XcoffError::NotExecutable {
                    path: path.to_path_buf(),
                    reason: "file is an archive".to_string(),
                });
            }
            Ok(OpenedImage::Unrecognized(reason)) => {
                return Err(XcoffError::NotExecutable {
                    path: path.to_path_buf(),
                    reason,
                });
            }
            Err(source) => {
                return Err(XcoffError::ImageOpen {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut table = self.loader.allocate(&*image);
        table.read_symbols(&*image)?;

        let mut record = ModuleRecord::from_image(image, None);
        record.loaded = true;
        let id = self.modules.insert(record)?;
        self.symbols.set_primary(table);

        if let Some(record) = self.modules.get(id) {
            self.exec = ExecTarget::new(SectionTable::from_image(record.image(), id));
            info!(text = %record.text_start, data = %record.data_start, "executable loaded");
        }
        Ok(id)
    }

    /// Apply a loader snapshot to the module map.
    ///
    /// ## Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub fn reconcile(&mut self, snapshot: &LoaderSnapshot) -> XcoffResult<ReconcileReport>
    {
        Reconciler::new(
            &mut self.modules,
            &mut self.symbols,
            self.images.as_mut(),
            self.loader.as_mut(),
            &mut self.breakpoints,
        )
        .reconcile(snapshot)
    }

    /// Query the live loader state of `pid` and relocate everything to it.
    ///
    /// Runs after every stop that may have changed the process's modules.
    ///
    /// ## Errors
    ///
    /// `LoaderQueryFailed` ends handling of this stop. Reconciliation and
    /// executable-section errors are passed through.
    pub fn relocate_live(&mut self, query: &mut dyn LoaderQuery, pid: ProcessId) -> XcoffResult<ReconcileReport>
    {
        let snapshot = query_snapshot(query, pid, &self.config)?;
        debug!(%pid, modules = snapshot.len(), "loader snapshot received");
        let report = self.reconcile(&snapshot)?;
        self.exec.sync_sections(&self.modules)?;
        Ok(report)
    }

    /// Relocate the session to the loader info frozen in `core`.
    ///
    /// ## Errors
    ///
    /// See [`relocate_core`].
    pub fn relocate_core(&mut self, core: &dyn BinaryImage) -> XcoffResult<CoreReport>
    {
        let mut reconciler = Reconciler::new(
            &mut self.modules,
            &mut self.symbols,
            self.images.as_mut(),
            self.loader.as_mut(),
            &mut self.breakpoints,
        );
        relocate_core(&mut reconciler, core, &mut self.core_sections, &mut self.exec)
    }

    /// TOC pointer for calling code at `pc`.
    ///
    /// ## Errors
    ///
    /// `TocNotFound` if no module contains `pc`.
    pub fn find_toc_address(&self, pc: Address) -> XcoffResult<Address>
    {
        toc::find_toc_address(&self.modules, &self.symbols, pc)
    }

    /// Register access to `pid` through `process`.
    pub fn registers<'p>(&self, process: &'p mut dyn ProcessControl, pid: ProcessId) -> RegisterTransfer<'p>
    {
        RegisterTransfer::new(process, pid, &self.config)
    }

    /// An empty register cache sized for this session's target.
    pub fn register_cache(&self) -> RegisterBuffer
    {
        RegisterBuffer::new(self.config.register_count)
    }
}

impl fmt::Debug for Session
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("modules", &self.modules)
            .field("symbols", &self.symbols)
            .field("exec", &self.exec)
            .field("core_sections", &self.core_sections.len())
            .field("breakpoints", &self.breakpoints.len())
            .finish_non_exhaustive()
    }
}

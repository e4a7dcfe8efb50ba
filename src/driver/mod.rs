//! Driver entry points: single-file and directory diagnosis.

mod exports;
mod graph;
mod record;
mod resolve;


use crate::diagnostics::{Code, DiagnosticBag, Severity, DEFAULT_MAX_DIAGNOSTICS};
use crate::frontend::{Ast, SemaResult, SymbolsResult};
use crate::hir::HirModule;
use crate::meta::ModuleKind;
use crate::source::{FileId, FileSet, ReadFileFn};
use crate::symbols::ExportsMap;
use ahash::AHashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use graph::{diagnose_directory, diagnose_file};
pub use record::{ModuleRecord, RecordFile, RecordState};

/// How far the driver takes each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Tokenize,
    Syntax,
    Sema,
    All,
}

/// Options recognized by both driver modes.
#[derive(Clone)]
pub struct CompileOptions {
    pub stage: Stage,
    pub max_diagnostics: usize,
    pub ignore_warnings: bool,
    pub warnings_as_errors: bool,
    pub enable_timings: bool,
    pub enable_disk_cache: bool,
    /// Force whole-graph resolution even for files the per-file pass
    /// could answer alone (LSP callers).
    pub full_module_graph: bool,
    /// Retain AST/symbol/sema arrays in the result.
    pub keep_artifacts: bool,
    pub emit_hir: bool,
    pub emit_instantiations: bool,
    /// Suppress did-you-mean hints pointing at unimported modules.
    pub no_alien_hints: bool,
    pub read_file: Option<ReadFileFn>,
    /// Project root; defaults to the target's parent directory.
    pub base_dir: Option<PathBuf>,
    /// Override the root module's kind when it has no pragma.
    pub module_kind: Option<ModuleKind>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            stage: Stage::All,
            max_diagnostics: DEFAULT_MAX_DIAGNOSTICS,
            ignore_warnings: false,
            warnings_as_errors: false,
            enable_timings: false,
            enable_disk_cache: false,
            full_module_graph: false,
            keep_artifacts: false,
            emit_hir: false,
            emit_instantiations: false,
            no_alien_hints: false,
            read_file: None,
            base_dir: None,
            module_kind: None,
        }
    }
}

impl CompileOptions {
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_max_diagnostics(mut self, max: usize) -> Self {
        self.max_diagnostics = max;
        self
    }

    pub fn with_timings(mut self) -> Self {
        self.enable_timings = true;
        self
    }

    pub fn with_disk_cache(mut self) -> Self {
        self.enable_disk_cache = true;
        self
    }

    pub fn with_hir(mut self) -> Self {
        self.emit_hir = true;
        self
    }

    pub fn with_base_dir(mut self, base: PathBuf) -> Self {
        self.base_dir = Some(base);
        self
    }

    pub fn with_module_kind(mut self, kind: ModuleKind) -> Self {
        self.module_kind = Some(kind);
        self
    }
}

/// Policy and I/O failures the driver returns instead of recording.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("module path '{0}' lies in the 'core' namespace, which is reserved for the standard library")]
    ReservedNamespace(String),

    #[error("semantic analysis requires the standard library, but no stdlib root was found")]
    StdlibNotFound,

    #[error("could not derive a module path for '{0}'")]
    InvalidModulePath(String),

    #[error("'{0}' is not a .sg source file")]
    NotASourceFile(PathBuf),

    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DriverError {
    /// The stable diagnostic code a policy error corresponds to, when
    /// one exists.
    pub fn code(&self) -> Option<Code> {
        match self {
            DriverError::ReservedNamespace(_) | DriverError::InvalidModulePath(_) => {
                Some(Code::INVALID_MODULE_PATH)
            }
            DriverError::Io { .. } => Some(Code::IO_LOAD_FILE_ERROR),
            _ => None,
        }
    }
}

/// Result of a single-file (module graph) invocation.
#[derive(Debug)]
pub struct DiagnoseResult {
    pub file_set: FileSet,
    pub bag: DiagnosticBag,
    /// Root module per-file resolver results, kept with `keep_artifacts`.
    pub symbols: Option<Vec<SymbolsResult>>,
    pub sema: Option<Vec<SemaResult>>,
    pub ir: Option<HirModule>,
    pub module_records: Vec<ModuleRecord>,
    /// Canonical path of the root module.
    pub root: String,
    pub exports: ExportsMap,
    /// Spelled import path -> canonical module path, for LSP callers.
    pub aliases: AHashMap<String, String>,
    /// Topo batch widths, surfaced on the directory-mode metrics line.
    pub batch_sizes: Vec<usize>,
}

/// Per-file result of a directory invocation.
pub struct FileDiagnostics {
    pub file: FileId,
    pub path: PathBuf,
    pub logical_path: String,
    pub bag: DiagnosticBag,
    pub ast: Option<Arc<Ast>>,
    pub symbols: Option<SymbolsResult>,
    pub sema: Option<SemaResult>,
    pub from_cache: bool,
}

/// Apply the invocation-level diagnostic options: warning filtering and
/// promotion, then the canonical sort.
pub(crate) fn finalize_bag(bag: &mut DiagnosticBag, options: &CompileOptions) {
    if options.ignore_warnings {
        bag.filter(|d| !matches!(d.severity, Severity::Warning | Severity::Info));
    }
    if options.warnings_as_errors {
        bag.transform(|d| {
            if d.severity == Severity::Warning {
                d.severity = Severity::Error;
            }
        });
    }
    bag.sort();
}

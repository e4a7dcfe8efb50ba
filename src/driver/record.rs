use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::frontend::{Ast, SemaResult, SymbolsResult};
use crate::meta::ModuleMeta;
use crate::source::FileId;
use crate::symbols::{ModuleExports, SymbolTable};
use ahash::AHashSet;
use std::sync::Arc;

/// Lifecycle of a module record. Transitions only move forward and are
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordState {
    Parsed,
    MetaBuilt,
    InGraph,
    /// Pass 1 done: top-level names are in the shared module scope.
    Declared,
    /// Pass 2 done: bodies resolved, sema ran per file.
    Resolved,
    Exported,
    Lowered,
}

/// Per-file working state inside a record.
#[derive(Debug, Default)]
pub struct RecordFile {
    pub file: Option<FileId>,
    pub logical_path: String,
    pub ast: Option<Arc<Ast>>,
    /// Pass 1 and pass 2 resolver results.
    pub symbols: [Option<SymbolsResult>; 2],
    pub sema: Option<SemaResult>,
}

/// The orchestrator's working state for one module.
///
/// Created when the module is first visited, mutated by the two-pass
/// resolver, frozen before the IR combiner reads it.
#[derive(Debug)]
pub struct ModuleRecord {
    pub meta: ModuleMeta,
    pub state: RecordState,
    pub bag: DiagnosticBag,
    pub broken: bool,
    pub first_err: Option<Diagnostic>,
    pub files: Vec<RecordFile>,
    /// Shared across all files of the module.
    pub table: SymbolTable,
    pub exports: Option<Arc<ModuleExports>>,
    /// Guards the once-only entrypoint check.
    pub checked_entrypoints: bool,
    /// Exports of this module are marked builtin (stdlib `core`).
    pub builtin_exports: bool,
    /// Meta came from a cache; files were not re-parsed.
    pub from_cache: bool,
}

impl ModuleRecord {
    pub fn new(meta: ModuleMeta, bag: DiagnosticBag, files: Vec<RecordFile>) -> Self {
        ModuleRecord {
            meta,
            state: RecordState::Parsed,
            bag,
            broken: false,
            first_err: None,
            files,
            table: SymbolTable::new(),
            exports: None,
            checked_entrypoints: false,
            builtin_exports: false,
            from_cache: false,
        }
    }

    /// Move the state forward; moving backwards is a no-op.
    pub fn advance(&mut self, state: RecordState) {
        if state > self.state {
            self.state = state;
        }
    }

    /// Recompute `broken` and `first_err` from the bag.
    pub fn refresh_broken(&mut self) {
        if let Some(first) = self.bag.first_error() {
            self.broken = true;
            if self.first_err.is_none() {
                self.first_err = Some(first.clone());
            }
        }
    }

    pub fn file_ids(&self) -> AHashSet<FileId> {
        self.files.iter().filter_map(|f| f.file).collect()
    }

    /// Whether the cached exports can be reused as-is.
    pub fn exports_complete(&self) -> bool {
        matches!(&self.exports, Some(exports) if !exports.is_incomplete())
    }
}

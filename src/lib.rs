pub mod cache;
pub mod diagnostics;
pub mod digest;
pub mod driver;
pub mod frontend;
pub mod graph;
pub mod hir;
pub mod meta;
pub mod modpath;
pub mod pipeline;
pub mod source;
pub mod symbols;
pub mod timing;

pub use cache::{DiskCache, DiskPayload, MemoryCache};
pub use diagnostics::{Code, Diagnostic, DiagnosticBag, Severity};
pub use digest::Digest;
pub use driver::{
    diagnose_directory, diagnose_file, CompileOptions, DiagnoseResult, DriverError,
    FileDiagnostics, ModuleRecord, Stage,
};
pub use frontend::{Frontend, Lexer, Parser, SemaChecker, SymbolResolver};
pub use graph::{toposort_kahn, DepGraph, ModuleIndex, Topo};
pub use hir::HirModule;
pub use meta::{ImportMeta, ModuleKind, ModuleMeta};
pub use modpath::{find_stdlib_root, reset_global_caches, resolve_module_dir};
pub use pipeline::{CancelToken, FileJob, FileOutcome};
pub use source::{FileId, FileSet, SourceFile, Span};
pub use symbols::{ModuleExports, SymbolId, SymbolTable};
pub use timing::Tracer;

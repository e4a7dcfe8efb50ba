//! Capability seams for the external frontend stages.
//!
//! The driver treats the lexer, parser, symbol resolver, semantic checker
//! and HIR lowerer as pluggable capabilities: each is a trait taking typed
//! options and a diagnostic bag as its reporter sink. The driver assumes
//! nothing about their internals beyond the ids they emit and the exports
//! they publish.

use crate::diagnostics::DiagnosticBag;
use crate::hir::HirModule;
use crate::source::{FileId, SourceFile, Span};
use crate::symbols::{ExportsMap, SymbolId, SymbolTable, TypeId};
use ahash::AHashSet;
use std::any::Any;
use std::sync::Arc;

#[cfg(test)]
pub(crate) mod stub;

/// Opaque token stream handed from the lexer to the parser.
pub struct TokenStream {
    pub file: FileId,
    payload: Box<dyn Any + Send>,
}

impl TokenStream {
    pub fn new(file: FileId, payload: impl Any + Send) -> Self {
        TokenStream {
            file,
            payload: Box::new(payload),
        }
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PragmaKind {
    Module,
    Binary,
}

/// A `pragma module::Name;` / `pragma binary::Name;` declaration.
#[derive(Debug, Clone)]
pub struct PragmaDecl {
    pub kind: PragmaKind,
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ImportMember {
    pub name: String,
    pub span: Span,
}

/// An `import a::b::{x, y};` statement as spelled in source.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// The spelled path, `::`-separated, possibly with `.`/`..` segments.
    pub path: String,
    pub members: Vec<ImportMember>,
    pub span: Span,
}

/// The parsed form of one source file.
///
/// Only the surface the driver traverses is typed: pragmas and imports.
/// Item bodies stay behind the opaque payload and are only ever handed
/// back to the frontend capabilities that produced them.
pub struct Ast {
    pub file: FileId,
    pub pragma: Option<PragmaDecl>,
    /// Span of a `pragma no_std;`, when present.
    pub no_std: Option<Span>,
    pub imports: Vec<ImportDecl>,
    payload: Box<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for Ast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ast")
            .field("file", &self.file)
            .field("pragma", &self.pragma)
            .field("no_std", &self.no_std)
            .field("imports", &self.imports)
            .field("payload", &"<opaque>")
            .finish()
    }
}

impl Ast {
    pub fn new(
        file: FileId,
        pragma: Option<PragmaDecl>,
        no_std: Option<Span>,
        imports: Vec<ImportDecl>,
        payload: impl Any + Send + Sync,
    ) -> Self {
        Ast {
            file,
            pragma,
            no_std,
            imports,
            payload: Box::new(payload),
        }
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

/// Options for one resolver invocation.
pub struct ResolveOptions<'a> {
    /// Pass 1: register top-level symbols only, skip bodies.
    pub declare_only: bool,
    /// Pass 2: reuse the declarations of pass 1 and walk bodies.
    pub reuse_decls: bool,
    /// Export tables of modules resolved earlier in reverse-topo order.
    pub module_exports: &'a ExportsMap,
    /// Files belonging to the module being resolved, so the resolver can
    /// tell local from cross-file references.
    pub module_files: &'a AHashSet<FileId>,
    /// Suppress did-you-mean hints pointing at unimported modules.
    pub no_alien_hints: bool,
}

/// Per-file result of one resolver pass.
#[derive(Debug, Clone, Default)]
pub struct SymbolsResult {
    pub file: Option<FileId>,
    /// Top-level symbols declared by this file.
    pub declared: Vec<SymbolId>,
    /// Whether bodies were resolved (pass 2 or single-pass).
    pub resolved: bool,
}

/// Options for one semantic-check invocation.
pub struct CheckOptions<'a> {
    pub module_exports: &'a ExportsMap,
    /// Record generic instantiations for the IR combiner.
    pub record_instantiations: bool,
}

/// A recorded generic instantiation `(callee, caller, type args)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instantiation {
    pub callee: SymbolId,
    pub caller: SymbolId,
    pub type_args: Vec<TypeId>,
}

/// Per-file result of the semantic checker.
#[derive(Debug, Clone, Default)]
pub struct SemaResult {
    pub file: Option<FileId>,
    /// Spans of `@entrypoint` functions found in this file.
    pub entrypoints: Vec<Span>,
    pub instantiations: Vec<Instantiation>,
    /// Types the checker proved copyable in this file.
    pub copy_types: Vec<TypeId>,
}

pub trait Lexer: Send + Sync {
    fn tokenize(&self, file: &SourceFile, bag: &mut DiagnosticBag) -> TokenStream;
}

pub trait Parser: Send + Sync {
    fn parse(&self, tokens: TokenStream, file: &SourceFile, bag: &mut DiagnosticBag) -> Ast;
}

pub trait SymbolResolver: Send + Sync {
    fn resolve(
        &self,
        ast: &Ast,
        table: &mut SymbolTable,
        opts: ResolveOptions<'_>,
        bag: &mut DiagnosticBag,
    ) -> SymbolsResult;
}

pub trait SemaChecker: Send + Sync {
    fn check(
        &self,
        ast: &Ast,
        table: &SymbolTable,
        opts: CheckOptions<'_>,
        bag: &mut DiagnosticBag,
    ) -> SemaResult;
}

pub trait HirLowerer: Send + Sync {
    fn lower(
        &self,
        module_path: &str,
        asts: &[Arc<Ast>],
        table: &SymbolTable,
        sema: &[SemaResult],
    ) -> HirModule;
}

/// The bundle of frontend capabilities one driver invocation runs with.
#[derive(Clone)]
pub struct Frontend {
    pub lexer: Arc<dyn Lexer>,
    pub parser: Arc<dyn Parser>,
    pub resolver: Arc<dyn SymbolResolver>,
    pub checker: Arc<dyn SemaChecker>,
    pub lowerer: Arc<dyn HirLowerer>,
}

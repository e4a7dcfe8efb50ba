//! Builds [`ModuleMeta`] from parsed source files.
//!
//! The builder owns the pragma rules: every file of a pragma-declared
//! module must carry a pragma, the explicit names must agree, and
//! `no_std` must be consistent across the module. It also extracts and
//! canonicalizes imports, including candidate imports for group members
//! that name concrete module files.

use crate::diagnostics::{Code, Diagnostic, DiagnosticBag};
use crate::digest::Digest;
use crate::frontend::{Ast, PragmaKind};
use crate::modpath::{self, is_valid_identifier, join, last_segment, parent_of, resolve_import};
use crate::source::{SourceFile, Span};

/// Declared kind of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Module,
    Binary,
    Unknown,
}

/// One canonicalized import edge of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMeta {
    /// Canonical slash-separated path of the imported module.
    pub path: String,
    /// Span of the import statement (or group member) in source.
    pub span: Span,
}

/// One source file of a module.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Canonical logical path of the file.
    pub path: String,
    pub span: Span,
    pub content_hash: Digest,
}

/// The logical description of one module.
#[derive(Debug, Clone)]
pub struct ModuleMeta {
    pub name: String,
    /// Canonical module path, e.g. `a/b`. Never empty.
    pub path: String,
    /// Parent path, `""` at the project root.
    pub dir: String,
    pub kind: ModuleKind,
    pub has_module_pragma: bool,
    pub no_std: bool,
    pub imports: Vec<ImportMeta>,
    /// Sorted by `path`; non-empty for a concrete module.
    pub files: Vec<FileMeta>,
    /// Hash of the module's sources alone.
    pub content_hash: Digest,
    /// Hash of the module closure; zero until the graph pass computes it.
    pub module_hash: Digest,
}

impl ModuleMeta {
    /// Span used for module-level diagnostics: the first file's start.
    pub fn primary_span(&self) -> Span {
        self.files.first().map(|f| f.span).unwrap_or(Span::EMPTY)
    }
}

/// Probe asking whether a canonical path names a concrete module file or
/// directory. The orchestrator backs this with the path resolver's cheap
/// strategies; tests may answer from a fixed set.
pub type ModuleProbe<'a> = &'a dyn Fn(&str) -> bool;

/// One file handed to the builder.
pub struct MetaFileInput<'a> {
    pub file: &'a SourceFile,
    pub ast: &'a Ast,
    /// Canonical logical path of the file, e.g. `m/board`.
    pub logical_path: String,
}

/// Build module metadata for a set of files sharing one directory.
///
/// `inputs` must be non-empty and sorted by logical path. Consistency
/// problems are reported into `bag`; the builder still produces a meta
/// whenever one can be salvaged so dependents get `DependencyFailed`
/// rather than a hole in the graph.
pub fn build_meta(
    inputs: &[MetaFileInput<'_>],
    kind_override: Option<ModuleKind>,
    probe: ModuleProbe<'_>,
    bag: &mut DiagnosticBag,
) -> Option<ModuleMeta> {
    if inputs.is_empty() {
        return None;
    }

    let logical_dir = parent_of(&inputs[0].logical_path).to_string();
    let pragmas: Vec<(&MetaFileInput, &crate::frontend::PragmaDecl)> = inputs
        .iter()
        .filter_map(|input| input.ast.pragma.as_ref().map(|p| (input, p)))
        .collect();

    let (name, path, kind, has_module_pragma) = if let Some((_, first)) = pragmas.first() {
        // Pragma-declared module: every file must declare one, kinds and
        // names must agree.
        for input in inputs {
            if input.ast.pragma.is_none() {
                bag.append(Diagnostic::error(
                    Code::MISSING_MODULE_PRAGMA,
                    Span::file_start(input.file.id),
                    format!(
                        "file '{}' is part of module '{}' but declares no module pragma",
                        input.logical_path, first.name
                    ),
                ));
            }
        }
        for (_, pragma) in pragmas.iter().skip(1) {
            if pragma.kind != first.kind {
                bag.append(
                    Diagnostic::error(
                        Code::INCONSISTENT_MODULE_NAME,
                        pragma.span,
                        "module and binary pragmas are mixed in one module directory",
                    )
                    .with_note(first.span, "first pragma declared here"),
                );
            } else if pragma.name != first.name {
                bag.append(
                    Diagnostic::error(
                        Code::INCONSISTENT_MODULE_NAME,
                        pragma.span,
                        format!(
                            "module name '{}' disagrees with '{}' declared earlier",
                            pragma.name, first.name
                        ),
                    )
                    .with_note(first.span, format!("module '{}' declared here", first.name)),
                );
            }
        }
        if !is_valid_identifier(&first.name) {
            bag.append(Diagnostic::error(
                Code::INVALID_MODULE_PATH,
                first.span,
                format!("'{}' is not a valid module name", first.name),
            ));
            return None;
        }
        let kind = match first.kind {
            PragmaKind::Module => ModuleKind::Module,
            PragmaKind::Binary => ModuleKind::Binary,
        };
        let dir_parent = parent_of(&logical_dir).to_string();
        let path = join(&dir_parent, &first.name);
        (first.name.clone(), path, kind, true)
    } else if inputs.len() > 1 {
        // A directory imported as a module without pragmas: the files do
        // not form a multi-file module.
        bag.append(Diagnostic::error(
            Code::MISSING_MODULE_PRAGMA,
            Span::file_start(inputs[0].file.id),
            format!(
                "directory '{}' holds {} source files but none declares a module pragma",
                logical_dir,
                inputs.len()
            ),
        ));
        let name = last_segment(&logical_dir).to_string();
        (name, logical_dir.clone(), ModuleKind::Unknown, false)
    } else {
        // A single pragma-less file is its own module.
        let path = inputs[0].logical_path.clone();
        let name = last_segment(&path).to_string();
        (name, path, kind_override.unwrap_or(ModuleKind::Module), false)
    };

    if path.is_empty() {
        bag.append(Diagnostic::error(
            Code::INVALID_MODULE_PATH,
            inputs[0].ast.pragma.as_ref().map(|p| p.span).unwrap_or(Span::EMPTY),
            "module path is empty after normalization",
        ));
        return None;
    }

    let kind = match kind_override {
        Some(k) if !has_module_pragma => k,
        _ => kind,
    };

    // no_std must agree across all files of the module.
    let no_std = inputs[0].ast.no_std.is_some();
    for input in inputs.iter().skip(1) {
        if input.ast.no_std.is_some() != no_std {
            let span = input
                .ast
                .no_std
                .unwrap_or_else(|| Span::file_start(input.file.id));
            bag.append(Diagnostic::error(
                Code::INCONSISTENT_NO_STD,
                span,
                format!(
                    "'pragma no_std' must be declared by every file of module '{}' or by none",
                    path
                ),
            ));
        }
    }

    let dir = parent_of(&path).to_string();
    let imports = extract_imports(inputs, &dir, &path, probe, bag);

    let mut files: Vec<FileMeta> = inputs
        .iter()
        .map(|input| FileMeta {
            path: input.logical_path.clone(),
            span: Span::file_start(input.file.id),
            content_hash: input.file.hash,
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let hashes: Vec<Digest> = files.iter().map(|f| f.content_hash).collect();
    let content_hash = Digest::fold(&hashes);

    Some(ModuleMeta {
        name,
        path,
        dir,
        kind,
        has_module_pragma,
        no_std,
        imports,
        files,
        content_hash,
        module_hash: Digest::ZERO,
    })
}

/// Canonicalize the import statements of every file.
///
/// For `import a::b::{x, y}` each member that names a concrete module
/// file becomes a candidate import of its own; when the base path itself
/// does not resolve and candidates exist, the base is suppressed.
fn extract_imports(
    inputs: &[MetaFileInput<'_>],
    module_dir: &str,
    module_path: &str,
    probe: ModuleProbe<'_>,
    bag: &mut DiagnosticBag,
) -> Vec<ImportMeta> {
    let mut imports: Vec<ImportMeta> = Vec::new();
    let mut push = |imports: &mut Vec<ImportMeta>, path: String, span: Span| {
        if !imports.iter().any(|i| i.path == path) {
            imports.push(ImportMeta { path, span });
        }
    };

    for input in inputs {
        for import in &input.ast.imports {
            let canonical = match resolve_import(&import.path, module_dir) {
                Ok(canonical) => canonical,
                Err(err) => {
                    bag.append(Diagnostic::error(
                        Code::INVALID_IMPORT_PATH,
                        import.span,
                        err.to_string(),
                    ));
                    continue;
                }
            };

            let mut candidates: Vec<ImportMeta> = Vec::new();
            for member in &import.members {
                if !is_valid_identifier(&member.name) {
                    continue;
                }
                let member_path = modpath::join(&canonical, &member.name);
                if member_path != module_path && probe(&member_path) {
                    candidates.push(ImportMeta {
                        path: member_path,
                        span: member.span,
                    });
                }
            }

            let base_resolves = probe(&canonical);
            if base_resolves || candidates.is_empty() {
                push(&mut imports, canonical, import.span);
            }
            for candidate in candidates {
                push(&mut imports, candidate.path, candidate.span);
            }
        }
    }
    imports
}

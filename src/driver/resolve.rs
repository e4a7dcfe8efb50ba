//! Two-pass module resolution.
//!
//! Pass 1 registers every file's top-level names into the module's shared
//! scope; pass 2 walks bodies with the complete module scope plus the
//! exports of modules resolved earlier. Making a module's own names
//! visible before any body is checked is what breaks mutual-recursion
//! cycles between files and between module exports.

use super::record::{ModuleRecord, RecordState};
use crate::diagnostics::{Code, Diagnostic};
use crate::frontend::{CheckOptions, Frontend, ResolveOptions};
use crate::meta::ModuleKind;
use crate::symbols::ExportsMap;
use crate::timing::{Tracer, PHASE_PROCESS_MODULE, PHASE_SEMA, PHASE_SYMBOLS};

pub(super) struct ResolveParams<'a> {
    pub frontend: &'a Frontend,
    pub exports: &'a ExportsMap,
    pub no_alien_hints: bool,
    pub record_instantiations: bool,
    pub tracer: &'a Tracer,
}

/// Run both resolver passes and the per-file semantic check over a
/// module record. Re-entrant: re-running a fully resolved record
/// re-derives the same results.
pub(super) fn resolve_record(record: &mut ModuleRecord, params: &ResolveParams<'_>) {
    let t = params.tracer.begin(PHASE_PROCESS_MODULE);
    let module_files = record.file_ids();

    // Pass 1: declare-only. All files share the record's table, so every
    // file's top-level names land in one module scope.
    for file in record.files.iter_mut() {
        let Some(ast) = file.ast.clone() else { continue };
        let ts = params.tracer.begin(PHASE_SYMBOLS);
        let result = params.frontend.resolver.resolve(
            &ast,
            &mut record.table,
            ResolveOptions {
                declare_only: true,
                reuse_decls: false,
                module_exports: params.exports,
                module_files: &module_files,
                no_alien_hints: params.no_alien_hints,
            },
            &mut record.bag,
        );
        params.tracer.end(ts, None);
        file.symbols[0] = Some(result);
    }
    record.advance(RecordState::Declared);

    // Pass 2: bodies, with the full module scope and the exports of
    // modules completed earlier in reverse-topo order. Sema runs per
    // file immediately after its resolution.
    for file in record.files.iter_mut() {
        let Some(ast) = file.ast.clone() else { continue };
        let ts = params.tracer.begin(PHASE_SYMBOLS);
        let result = params.frontend.resolver.resolve(
            &ast,
            &mut record.table,
            ResolveOptions {
                declare_only: false,
                reuse_decls: true,
                module_exports: params.exports,
                module_files: &module_files,
                no_alien_hints: params.no_alien_hints,
            },
            &mut record.bag,
        );
        params.tracer.end(ts, None);
        file.symbols[1] = Some(result);

        let ts = params.tracer.begin(PHASE_SEMA);
        let sema = params.frontend.checker.check(
            &ast,
            &record.table,
            CheckOptions {
                module_exports: params.exports,
                record_instantiations: params.record_instantiations,
            },
            &mut record.bag,
        );
        params.tracer.end(ts, None);
        file.sema = Some(sema);
    }
    record.advance(RecordState::Resolved);

    enforce_entrypoints(record);
    record.bag.dedup();
    record.refresh_broken();
    params.tracer.end(t, Some(record.meta.path.clone()));
}

/// Entry-point law, checked once per module at the Resolved boundary:
/// a binary module needs exactly one `@entrypoint`; extras are flagged
/// wherever they appear, pointing back at the first.
fn enforce_entrypoints(record: &mut ModuleRecord) {
    if record.checked_entrypoints {
        return;
    }
    record.checked_entrypoints = true;

    let entrypoints: Vec<crate::source::Span> = record
        .files
        .iter()
        .filter_map(|f| f.sema.as_ref())
        .flat_map(|sema| sema.entrypoints.iter().copied())
        .collect();

    if entrypoints.is_empty() {
        if record.meta.kind == ModuleKind::Binary {
            record.bag.append(Diagnostic::error(
                Code::ENTRYPOINT_NOT_FOUND,
                record.meta.primary_span(),
                format!(
                    "binary module '{}' declares no @entrypoint function",
                    record.meta.path
                ),
            ));
        }
        return;
    }

    let first = entrypoints[0];
    for extra in &entrypoints[1..] {
        record.bag.append(
            Diagnostic::error(
                Code::MULTIPLE_ENTRYPOINTS,
                *extra,
                format!(
                    "module '{}' declares more than one @entrypoint",
                    record.meta.path
                ),
            )
            .with_note(first, "first @entrypoint declared here"),
        );
    }
}

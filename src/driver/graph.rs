//! Module-graph orchestration: BFS over imports, stdlib closure, DAG
//! construction, hash propagation, export collection and IR combining.

use super::exports::{collect_exports, CollectParams};
use super::record::{ModuleRecord, RecordFile, RecordState};
use super::{finalize_bag, CompileOptions, DiagnoseResult, DriverError, FileDiagnostics, Stage};
use crate::cache::{global_memory_cache, DiskCache, DiskPayload};
use crate::diagnostics::{Code, Diagnostic, DiagnosticBag};
use crate::digest::Digest;
use crate::frontend::{CheckOptions, Frontend};
use crate::graph as dag;
use crate::hir::{combine_modules, HirModule};
use crate::meta::{build_meta, MetaFileInput, ModuleKind};
use crate::modpath::{self, logical_path_for, resolve_module_dir, SOURCE_EXT};
use crate::pipeline::{self, CancelToken, FileJob, PipelineOptions};
use crate::source::{FileId, FileSet, Span};
use crate::symbols::{ExportsMap, SymbolTable};
use crate::timing::{
    DirMetrics, Tracer, PHASE_HIR, PHASE_IMPORTS_GRAPH, PHASE_LOAD_FILE, PHASE_MODULE_GRAPH,
};
use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Diagnose a single root file, pulling in its whole import closure.
pub fn diagnose_file(
    path: &Path,
    options: CompileOptions,
    frontend: &Frontend,
) -> Result<DiagnoseResult, DriverError> {
    if path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXT) {
        return Err(DriverError::NotASourceFile(path.to_path_buf()));
    }

    let mut fs = match &options.read_file {
        Some(reader) => FileSet::with_reader(Arc::clone(reader)),
        None => FileSet::new(),
    };
    let tracer = Tracer::new(options.enable_timings);
    let t = tracer.begin(PHASE_LOAD_FILE);
    let root_file = fs.load(path);
    tracer.end(t, Some(path.display().to_string()));
    if let Some(err) = &fs.get(root_file).load_error {
        return Err(DriverError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, err.clone()),
        });
    }

    let base_dir = options
        .base_dir
        .clone()
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let stdlib_root = modpath::find_stdlib_root(&base_dir);
    let disk = if options.enable_disk_cache {
        match DiskCache::new() {
            Ok(disk) => Some(disk),
            Err(err) => {
                warn!("disk cache unavailable: {}", err);
                None
            }
        }
    } else {
        None
    };

    let builder = GraphBuilder {
        options,
        frontend,
        fs,
        tracer,
        disk,
        base_dir,
        stdlib_root,
        records: Vec::new(),
        by_path: AHashMap::new(),
        aliases: AHashMap::new(),
        missing: AHashSet::new(),
    };
    builder.run(path)
}

struct GraphBuilder<'f> {
    options: CompileOptions,
    frontend: &'f Frontend,
    fs: FileSet,
    tracer: Tracer,
    disk: Option<DiskCache>,
    base_dir: PathBuf,
    stdlib_root: Option<PathBuf>,
    records: Vec<ModuleRecord>,
    /// Canonical path -> record slot of the first registration.
    by_path: AHashMap<String, usize>,
    /// Spelled import path -> canonical module path.
    aliases: AHashMap<String, String>,
    /// Import spellings that already failed to resolve.
    missing: AHashSet<String>,
}

impl GraphBuilder<'_> {
    fn run(mut self, root_path: &Path) -> Result<DiagnoseResult, DriverError> {
        let tg = self.tracer.begin(PHASE_MODULE_GRAPH);
        let root_dir = root_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let root_slot = self
            .load_module(&root_dir, Some(root_path.to_path_buf()), self.options.module_kind, true)?
            .expect("root module not loadable");
        let root = self.records[root_slot].meta.path.clone();

        let run_graph = self.options.stage >= Stage::Sema || self.options.full_module_graph;
        let mut exports = ExportsMap::default();
        let mut ir = None;
        let mut batch_sizes = Vec::new();

        if run_graph {
            let ti = self.tracer.begin(PHASE_IMPORTS_GRAPH);
            self.close_imports(root_slot)?;
            self.ensure_stdlib_closure()?;
            self.tracer.end(ti, None);

            // DAG, topo order, hash propagation, cycle and broken-dep
            // reporting over everything the BFS registered. Import paths
            // are translated through the alias map so spellings and
            // canonical names land on the same node.
            let metas: Vec<Arc<crate::meta::ModuleMeta>> = self
                .records
                .iter()
                .map(|r| {
                    let mut meta = r.meta.clone();
                    for import in &mut meta.imports {
                        if let Some(canonical) = self.aliases.get(&import.path) {
                            import.path = canonical.clone();
                        }
                    }
                    Arc::new(meta)
                })
                .collect();
            let index = dag::ModuleIndex::build(metas.iter().map(|m| m.as_ref()));
            let mut routed: Vec<(usize, Diagnostic)> = Vec::new();
            let graph = dag::build_graph(&index, &metas, |slot, d| routed.push((slot, d)));
            let topo = dag::toposort_kahn(&graph);
            batch_sizes = topo.batches.iter().map(|b| b.len()).collect();

            let mut contents = vec![Digest::ZERO; index.len()];
            for (slot, meta) in metas.iter().enumerate() {
                let node = graph.node_of_slot[slot];
                if graph.slot_of_node[node] == Some(slot) {
                    contents[node] = meta.content_hash;
                }
            }
            let hashes = dag::compute_module_hashes(&graph, &topo, &contents, num_cpus::get());
            for (slot, record) in self.records.iter_mut().enumerate() {
                record.meta.module_hash = hashes[graph.node_of_slot[slot]];
                record.advance(RecordState::InGraph);
            }

            dag::report_cycles(&topo, &index, &graph, &metas, |slot, d| {
                routed.push((slot, d));
            });
            for (slot, diag) in routed.drain(..) {
                self.records[slot].bag.append(diag);
            }
            for record in &mut self.records {
                record.refresh_broken();
            }
            let broken: Vec<bool> = self.records.iter().map(|r| r.broken).collect();
            let first_errs: Vec<Option<Diagnostic>> =
                self.records.iter().map(|r| r.first_err.clone()).collect();
            dag::report_broken_deps(&index, &graph, &metas, &broken, &first_errs, |slot, d| {
                routed.push((slot, d));
            });
            for (slot, diag) in routed.drain(..) {
                self.records[slot].bag.append(diag);
            }

            if self.options.stage >= Stage::Sema {
                exports = collect_exports(
                    &mut self.records,
                    &graph,
                    &topo,
                    &self.aliases,
                    &CollectParams {
                        frontend: self.frontend,
                        no_alien_hints: self.options.no_alien_hints,
                        record_instantiations: self.options.emit_instantiations,
                        tracer: &self.tracer,
                    },
                );
            }

            self.write_caches(&graph, &hashes);

            if self.options.emit_hir && self.options.stage >= Stage::All && !topo.cyclic {
                ir = Some(self.lower_and_combine(root_slot, &graph, &exports));
            }
        }

        self.tracer.end(tg, Some(root.clone()));

        // Final bag: every module's diagnostics in registration order,
        // root first, with the invocation-level options applied.
        let mut bag = DiagnosticBag::with_cap(self.options.max_diagnostics);
        for record in &mut self.records {
            record.bag.sort();
            record.refresh_broken();
        }
        for record in &self.records {
            bag.merge(record.bag.clone());
        }
        finalize_bag(&mut bag, &self.options);
        self.tracer.emit_diagnostics(&mut bag, None);

        let (symbols, sema) = if self.options.keep_artifacts {
            let root_record = &self.records[root_slot];
            (
                Some(
                    root_record
                        .files
                        .iter()
                        .filter_map(|f| f.symbols[1].clone())
                        .collect(),
                ),
                Some(
                    root_record
                        .files
                        .iter()
                        .filter_map(|f| f.sema.clone())
                        .collect(),
                ),
            )
        } else {
            (None, None)
        };

        Ok(DiagnoseResult {
            file_set: self.fs,
            bag,
            symbols,
            sema,
            ir,
            module_records: self.records,
            root,
            exports,
            aliases: self.aliases,
            batch_sizes,
        })
    }

    /// Load every `.sg` file of a module directory, parse them, build the
    /// module meta and register a record.
    ///
    /// `focus` is the file an import (or the CLI) named directly; when
    /// the directory turns out not to form a pragma module, the candidate
    /// collapses back to the focus file alone.
    fn load_module(
        &mut self,
        dir: &Path,
        focus: Option<PathBuf>,
        kind_override: Option<ModuleKind>,
        is_root: bool,
    ) -> Result<Option<usize>, DriverError> {
        let mut paths = list_source_files(dir);
        if let Some(focus) = &focus {
            if !paths.contains(focus) {
                paths.push(focus.clone());
                paths.sort();
            }
        }
        if paths.is_empty() {
            return Ok(None);
        }

        let mut ids = Vec::with_capacity(paths.len());
        for path in &paths {
            let t = self.tracer.begin(PHASE_LOAD_FILE);
            ids.push(self.fs.load(path));
            self.tracer.end(t, Some(path.display().to_string()));
        }

        // Parse each file without early sema; the module graph resolves
        // them with the full module scope later.
        let claimed: AHashSet<FileId> = ids.iter().copied().collect();
        let mut module_bag = DiagnosticBag::with_cap(self.options.max_diagnostics);
        let mut parsed: Vec<(FileId, PathBuf, String, Option<Arc<crate::frontend::Ast>>, DiagnosticBag)> =
            Vec::new();
        for (id, path) in ids.iter().zip(paths.iter()) {
            // Stdlib sources live outside the project; their logical
            // paths derive from the stdlib root instead.
            let logical_base = match &self.stdlib_root {
                Some(root) if path.starts_with(root) => root.as_path(),
                _ => self.base_dir.as_path(),
            };
            let logical = match logical_path_for(path, logical_base) {
                Ok(logical) => logical,
                Err(err) => {
                    module_bag.append(Diagnostic::error(
                        Code::INVALID_MODULE_PATH,
                        Span::file_start(*id),
                        err.to_string(),
                    ));
                    continue;
                }
            };
            let opts = PipelineOptions {
                stage: self.options.stage,
                max_diagnostics: self.options.max_diagnostics,
                claimed: &claimed,
                cache: None,
                frontend: self.frontend,
                tracer: &self.tracer,
                no_alien_hints: self.options.no_alien_hints,
            };
            let outcome = pipeline::process_file(
                &self.fs,
                &FileJob {
                    file: *id,
                    logical_path: logical.clone(),
                },
                &opts,
            );
            parsed.push((*id, path.clone(), logical, outcome.ast, outcome.bag));
        }
        if parsed.is_empty() {
            if is_root {
                let diag = module_bag.first_error().cloned();
                return Err(DriverError::Io {
                    path: dir.to_path_buf(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidData,
                        diag.map(|d| d.message).unwrap_or_else(|| "no loadable module files".into()),
                    ),
                });
            }
            return Ok(None);
        }

        // Pragma collapse: multiple pragma-less files only form a module
        // candidate; without a pragma the candidate shrinks back to the
        // focus file, and diagnostics are filtered to it.
        let any_pragma = parsed
            .iter()
            .any(|(_, _, _, ast, _)| ast.as_ref().is_some_and(|a| a.pragma.is_some()));
        if !any_pragma && parsed.len() > 1 {
            if let Some(focus) = &focus {
                parsed.retain(|(_, path, _, _, _)| path == focus);
            }
        }
        parsed.sort_by(|a, b| a.2.cmp(&b.2));

        for (_, _, _, _, bag) in &parsed {
            module_bag.merge(bag.clone());
        }

        let probe_base = self.base_dir.clone();
        let probe_stdlib = self.stdlib_root.clone();
        let probe = move |candidate: &str| {
            modpath::module_file_exists(candidate, &probe_base, probe_stdlib.as_deref())
        };
        let inputs: Vec<MetaFileInput<'_>> = parsed
            .iter()
            .filter_map(|(id, _, logical, ast, _)| {
                ast.as_deref().map(|ast| MetaFileInput {
                    file: self.fs.get(*id),
                    ast,
                    logical_path: logical.clone(),
                })
            })
            .collect();
        let meta = if !inputs.is_empty() {
            build_meta(&inputs, kind_override, &probe, &mut module_bag)
        } else if self.options.stage < Stage::Syntax {
            // No ASTs below the syntax stage; derive a bare meta from the
            // focus file so the record still exists.
            Some(bare_meta(&self.fs, &parsed, kind_override))
        } else {
            None
        };
        let Some(meta) = meta else {
            if is_root {
                return Err(DriverError::InvalidModulePath(
                    root_path_display(&parsed),
                ));
            }
            return Ok(None);
        };

        // The core namespace is reserved for the stdlib root.
        let core_namespace = meta.path == "core" || meta.path.starts_with("core/");
        let inside_stdlib = self
            .stdlib_root
            .as_deref()
            .is_some_and(|root| dir.starts_with(root));
        if core_namespace && !inside_stdlib {
            if is_root {
                return Err(DriverError::ReservedNamespace(meta.path));
            }
            module_bag.append(Diagnostic::error(
                Code::INVALID_MODULE_PATH,
                meta.primary_span(),
                format!(
                    "module path '{}' lies in the 'core' namespace, which is reserved for the standard library",
                    meta.path
                ),
            ));
        }

        // A second spelling can resolve to a directory already
        // registered; reuse the record instead of duplicating it.
        if let Some(&existing) = self.by_path.get(&meta.path) {
            if self.records[existing].meta.content_hash == meta.content_hash {
                return Ok(Some(existing));
            }
        }

        let files: Vec<RecordFile> = parsed
            .into_iter()
            .map(|(id, _, logical, ast, _)| RecordFile {
                file: Some(id),
                logical_path: logical,
                ast,
                symbols: [None, None],
                sema: None,
            })
            .collect();

        let mut record = ModuleRecord::new(meta, module_bag, files);
        record.refresh_broken();
        record.advance(RecordState::MetaBuilt);
        if core_namespace && inside_stdlib && record.meta.path == "core" {
            record.builtin_exports = true;
        }

        let slot = self.records.len();
        let path_key = record.meta.path.clone();
        self.records.push(record);
        self.by_path.entry(path_key).or_insert(slot);
        Ok(Some(slot))
    }

    /// Breadth-first closure over imports. Single-threaded by design:
    /// the order imports are seen decides which canonical name a module
    /// is first registered under, and which spellings become aliases.
    fn close_imports(&mut self, root: usize) -> Result<(), DriverError> {
        let mut queue = VecDeque::from([root]);
        while let Some(slot) = queue.pop_front() {
            let imports = self.records[slot].meta.imports.clone();
            for import in imports {
                let canonical = self
                    .aliases
                    .get(&import.path)
                    .cloned()
                    .unwrap_or_else(|| import.path.clone());
                if let Some(&existing) = self.by_path.get(&canonical) {
                    self.validate_import_spelling(slot, &import.path, import.span, existing);
                    continue;
                }
                if self.missing.contains(&import.path) {
                    continue;
                }
                if modpath::is_stdlib_path(&import.path) && self.stdlib_root.is_none() {
                    if self.options.stage >= Stage::Sema {
                        return Err(DriverError::StdlibNotFound);
                    }
                    self.missing.insert(import.path.clone());
                    continue;
                }

                let resolved = match resolve_module_dir(
                    &import.path,
                    &self.base_dir,
                    self.stdlib_root.as_deref(),
                ) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        // The DAG pass reports ProjMissingModule with the
                        // import span; remember the spelling so it is not
                        // re-resolved.
                        debug!("import '{}' unresolved: {}", import.path, err);
                        self.missing.insert(import.path.clone());
                        continue;
                    }
                };
                let child = match self.load_module(&resolved.dir, resolved.file, None, false)? {
                    Some(child) => child,
                    None => {
                        self.missing.insert(import.path.clone());
                        continue;
                    }
                };

                let child_path = self.records[child].meta.path.clone();
                if child_path != import.path {
                    self.aliases.insert(import.path.clone(), child_path);
                }
                self.validate_import_spelling(slot, &import.path, import.span, child);
                queue.push_back(child);
            }
        }
        Ok(())
    }

    /// An import whose last segment disagrees with the module's declared
    /// name gets a `WrongModuleNameInImport` with a rewrite fix.
    fn validate_import_spelling(
        &mut self,
        slot: usize,
        spelled: &str,
        span: Span,
        target: usize,
    ) {
        let target_meta = &self.records[target].meta;
        if !target_meta.has_module_pragma {
            return;
        }
        let spelled_name = modpath::last_segment(spelled);
        if spelled_name == target_meta.name {
            return;
        }
        let mut segments: Vec<&str> = spelled.split('/').collect();
        let declared = target_meta.name.clone();
        *segments.last_mut().expect("spelled path has no segments") = &declared;
        let replacement = segments.join("::");
        let diag = Diagnostic::error(
            Code::WRONG_MODULE_NAME_IN_IMPORT,
            span,
            format!(
                "import names module '{}' but it declares itself as '{}'",
                spelled_name, declared
            ),
        )
        .with_fix(span, replacement.clone(), format!("import '{}' instead", replacement));
        self.records[slot].bag.append(diag);
    }

    /// Force-load the stdlib `core` module when a stdlib root exists and
    /// nothing pulled it in through imports. Other stdlib modules only
    /// enter via the import graph.
    fn ensure_stdlib_closure(&mut self) -> Result<(), DriverError> {
        let Some(stdlib) = self.stdlib_root.clone() else {
            return Ok(());
        };
        if let Some(&slot) = self.by_path.get("core") {
            self.records[slot].builtin_exports = true;
            return Ok(());
        }
        if self.options.stage < Stage::Sema {
            return Ok(());
        }
        match resolve_module_dir("core", &self.base_dir, Some(&stdlib)) {
            Ok(resolved) => {
                if let Some(slot) = self.load_module(&resolved.dir, resolved.file, None, false)? {
                    self.records[slot].builtin_exports = true;
                    self.close_imports(slot)?;
                }
                Ok(())
            }
            // No core module under the stdlib root: the closure step is
            // skipped without error.
            Err(_) => Ok(()),
        }
    }

    /// Publish every record to the memory cache and, when enabled, the
    /// disk cache. Write failures are best-effort.
    fn write_caches(&self, graph: &dag::DepGraph, hashes: &[Digest]) {
        let cache = global_memory_cache();
        for (slot, record) in self.records.iter().enumerate() {
            let node = graph.node_of_slot[slot];
            if graph.slot_of_node[node] != Some(slot) {
                continue;
            }
            cache.put(
                Arc::new(record.meta.clone()),
                record.broken,
                record.first_err.clone(),
            );
            if let Some(disk) = &self.disk {
                let dep_hashes: Vec<Digest> = graph.edges[node]
                    .iter()
                    .map(|dep| hashes[*dep])
                    .collect();
                let payload = DiskPayload::from_meta(
                    &record.meta,
                    record.broken,
                    Digest::fold(&dep_hashes),
                );
                if let Err(err) = disk.store(&payload) {
                    warn!(
                        "disk cache write for '{}' failed: {}",
                        record.meta.path, err
                    );
                }
            }
        }
    }

    /// Lower every resolved module and merge the dependencies into the
    /// root's IR.
    fn lower_and_combine(
        &mut self,
        root_slot: usize,
        graph: &dag::DepGraph,
        exports: &ExportsMap,
    ) -> HirModule {
        let t = self.tracer.begin(PHASE_HIR);
        let mut lowered: Vec<(usize, HirModule)> = Vec::new();
        for (slot, record) in self.records.iter_mut().enumerate() {
            let node = graph.node_of_slot[slot];
            if graph.slot_of_node[node] != Some(slot) || record.state < RecordState::Resolved {
                continue;
            }
            let asts: Vec<Arc<crate::frontend::Ast>> = record
                .files
                .iter()
                .filter_map(|f| f.ast.clone())
                .collect();
            let sema: Vec<crate::frontend::SemaResult> = record
                .files
                .iter()
                .filter_map(|f| f.sema.clone())
                .collect();
            let mut hir = self
                .frontend
                .lowerer
                .lower(&record.meta.path, &asts, &record.table, &sema);

            // Re-run the checker with the instantiation recorder so the
            // combiner can rewrite the recorded triples; the re-run
            // replaces anything the lowering carried over.
            if self.options.emit_instantiations && slot != root_slot {
                hir.instantiations.clear();
                let mut scratch = DiagnosticBag::with_cap(1);
                for ast in &asts {
                    let result = self.frontend.checker.check(
                        ast,
                        &record.table,
                        CheckOptions {
                            module_exports: exports,
                            record_instantiations: true,
                        },
                        &mut scratch,
                    );
                    hir.instantiations.extend(result.instantiations);
                }
            }
            record.advance(RecordState::Lowered);
            lowered.push((slot, hir));
        }

        let root_pos = lowered.iter().position(|(slot, _)| *slot == root_slot);
        let root_hir = match root_pos {
            Some(pos) => lowered.remove(pos).1,
            None => HirModule::new(self.records[root_slot].meta.path.clone()),
        };
        lowered.sort_by(|a, b| a.1.module_path.cmp(&b.1.module_path));

        let mut root_table = std::mem::take(&mut self.records[root_slot].table);
        let deps: Vec<(HirModule, &SymbolTable)> = lowered
            .into_iter()
            .map(|(slot, hir)| (hir, &self.records[slot].table))
            .collect();
        let combined = combine_modules(root_hir, &mut root_table, deps);
        self.records[root_slot].table = root_table;
        self.tracer.end(t, None);
        combined
    }
}

fn root_path_display(
    parsed: &[(FileId, PathBuf, String, Option<Arc<crate::frontend::Ast>>, DiagnosticBag)],
) -> String {
    parsed
        .first()
        .map(|(_, path, _, _, _)| path.display().to_string())
        .unwrap_or_default()
}

/// Metadata for a tokenize-only run: path and hashes without imports.
fn bare_meta(
    fs: &FileSet,
    parsed: &[(FileId, PathBuf, String, Option<Arc<crate::frontend::Ast>>, DiagnosticBag)],
    kind_override: Option<ModuleKind>,
) -> crate::meta::ModuleMeta {
    let mut files: Vec<crate::meta::FileMeta> = parsed
        .iter()
        .map(|(id, _, logical, _, _)| crate::meta::FileMeta {
            path: logical.clone(),
            span: Span::file_start(*id),
            content_hash: fs.get(*id).hash,
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let path = files
        .first()
        .map(|f| f.path.clone())
        .unwrap_or_else(|| "module".to_string());
    let hashes: Vec<Digest> = files.iter().map(|f| f.content_hash).collect();
    crate::meta::ModuleMeta {
        name: modpath::last_segment(&path).to_string(),
        path: path.clone(),
        dir: modpath::parent_of(&path).to_string(),
        kind: kind_override.unwrap_or(ModuleKind::Module),
        has_module_pragma: false,
        no_std: false,
        imports: Vec::new(),
        files,
        content_hash: Digest::fold(&hashes),
        module_hash: Digest::ZERO,
    }
}

fn list_source_files(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXT)
                })
                .collect()
        })
        .unwrap_or_default();
    paths.sort();
    paths
}

/// Diagnose every `.sg` file in a directory with a parallel worker pool.
pub fn diagnose_directory(
    dir: &Path,
    options: CompileOptions,
    jobs: usize,
    frontend: &Frontend,
) -> Result<(FileSet, Vec<FileDiagnostics>), DriverError> {
    if !dir.is_dir() {
        return Err(DriverError::NotADirectory(dir.to_path_buf()));
    }
    let tracer = Tracer::new(options.enable_timings);
    let mut fs = match &options.read_file {
        Some(reader) => FileSet::with_reader(Arc::clone(reader)),
        None => FileSet::new(),
    };

    let paths = list_source_files(dir);
    let base_dir = options.base_dir.clone().unwrap_or_else(|| dir.to_path_buf());
    let stdlib_root = modpath::find_stdlib_root(&base_dir);

    let mut jobs_list = Vec::new();
    for path in &paths {
        let t = tracer.begin(PHASE_LOAD_FILE);
        let id = fs.load(path);
        tracer.end(t, Some(path.display().to_string()));
        let logical = logical_path_for(path, &base_dir).unwrap_or_else(|_| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("file")
                .to_string()
        });
        jobs_list.push(FileJob {
            file: id,
            logical_path: logical,
        });
    }

    // A pragma anywhere in the directory claims every file for one
    // multi-file module; the early per-file sema is skipped for them.
    let any_pragma = fs.iter().any(|file| {
        file.text.contains("pragma module::") || file.text.contains("pragma binary::")
    });
    let claimed: AHashSet<FileId> = if any_pragma {
        jobs_list.iter().map(|j| j.file).collect()
    } else {
        AHashSet::new()
    };

    // Classification for the metrics line.
    let mut independent = 0usize;
    let mut stdlib_only = 0usize;
    let mut dependent = 0usize;
    for file in fs.iter() {
        let imports: Vec<&str> = file
            .text
            .lines()
            .filter_map(|line| line.trim().strip_prefix("import "))
            .collect();
        if imports.is_empty() {
            independent += 1;
        } else if imports
            .iter()
            .all(|i| i.starts_with("core") || i.starts_with("stdlib"))
        {
            stdlib_only += 1;
        } else {
            dependent += 1;
        }
    }

    let limit = if jobs == 0 { num_cpus::get() } else { jobs };
    let workers = limit.min(jobs_list.len()).max(1);
    let cache = global_memory_cache();
    let mem_before = cache.stats();

    let pipeline_opts = PipelineOptions {
        stage: options.stage,
        max_diagnostics: options.max_diagnostics,
        claimed: &claimed,
        cache: Some(cache),
        frontend,
        tracer: &tracer,
        no_alien_hints: options.no_alien_hints,
    };
    let outcomes = pipeline::run_files(&fs, &jobs_list, limit, &pipeline_opts, &CancelToken::new());

    // Meta build + cache writes for the independently analyzable files.
    // Dependency hashes are unknown before the graph pass, so disk
    // payloads carry zeroes.
    let disk = if options.enable_disk_cache {
        match DiskCache::new() {
            Ok(disk) => Some(disk),
            Err(err) => {
                warn!("disk cache unavailable: {}", err);
                None
            }
        }
    } else {
        None
    };
    let mut disk_hits = 0u64;
    let mut disk_misses = 0u64;

    let probe = |candidate: &str| modpath::module_file_exists(candidate, &base_dir, stdlib_root.as_deref());
    let mut results: Vec<FileDiagnostics> = Vec::with_capacity(outcomes.len());
    for (job, outcome) in jobs_list.iter().zip(outcomes.into_iter()) {
        let file = fs.get(job.file);
        let mut bag = outcome.bag;
        let from_cache = outcome.cached.is_some();

        if !claimed.contains(&job.file) && !from_cache {
            if let Some(ast) = &outcome.ast {
                // A validated disk payload short-circuits the meta build.
                let mut disk_meta = None;
                if let Some(disk) = &disk {
                    match disk.load(&file.hash) {
                        Ok(Some(payload)) if payload.path == job.logical_path => {
                            disk_hits += 1;
                            disk_meta = Some(payload.to_meta());
                        }
                        Ok(_) => disk_misses += 1,
                        Err(err) => {
                            warn!("disk cache read failed: {}", err);
                            disk_misses += 1;
                        }
                    }
                }
                let from_disk = disk_meta.is_some();
                let meta = disk_meta.or_else(|| {
                    let input = MetaFileInput {
                        file,
                        ast: ast.as_ref(),
                        logical_path: job.logical_path.clone(),
                    };
                    build_meta(&[input], options.module_kind, &probe, &mut bag)
                });
                if let Some(meta) = meta {
                    let broken = bag.has_errors();
                    let first_err = bag.first_error().cloned();
                    cache.put(Arc::new(meta.clone()), broken, first_err);
                    if let Some(disk) = &disk {
                        if !from_disk {
                            let payload = DiskPayload::from_meta(&meta, broken, Digest::ZERO);
                            if let Err(err) = disk.store(&payload) {
                                warn!("disk cache write failed: {}", err);
                            }
                        }
                    }
                }
            }
        }

        results.push(FileDiagnostics {
            file: job.file,
            path: file.path.clone(),
            logical_path: job.logical_path.clone(),
            bag,
            ast: if options.keep_artifacts { outcome.ast } else { None },
            symbols: outcome.symbols,
            sema: outcome.sema,
            from_cache,
        });
    }

    // Multi-file modules and (with full_module_graph) dependent files
    // need whole-graph resolution; their per-file bags are replaced by
    // the graph's view.
    let mut batch_sizes = Vec::new();
    if options.stage >= Stage::Sema {
        let mut graph_roots: Vec<usize> = Vec::new();
        if any_pragma {
            graph_roots.push(0);
        } else if options.full_module_graph {
            for (idx, file) in fs.iter().enumerate() {
                if file.text.lines().any(|l| l.trim().starts_with("import ")) {
                    graph_roots.push(idx);
                }
            }
        }
        for idx in graph_roots {
            let root_path = results[idx].path.clone();
            let graph_options = CompileOptions {
                base_dir: options.base_dir.clone().or_else(|| {
                    if any_pragma {
                        // The pragma module's canonical path includes the
                        // directory name, so logical paths root one level
                        // up.
                        dir.parent().map(Path::to_path_buf)
                    } else {
                        Some(base_dir.clone())
                    }
                }),
                enable_timings: false,
                ..options.clone()
            };
            match diagnose_file(&root_path, graph_options, frontend) {
                Ok(result) => {
                    distribute_graph_bag(&result, &fs, &mut results, any_pragma, idx);
                    if batch_sizes.is_empty() {
                        batch_sizes = result.batch_sizes;
                    }
                }
                Err(err) => {
                    let span = Span::file_start(results[idx].file);
                    results[idx].bag.append(Diagnostic::error(
                        err.code().unwrap_or(Code::INVALID_MODULE_PATH),
                        span,
                        err.to_string(),
                    ));
                }
            }
        }
    }

    let mem_after = cache.stats();
    for result in &mut results {
        finalize_bag(&mut result.bag, &options);
    }

    let metrics = DirMetrics {
        workers,
        files: results.len(),
        mem_hits: mem_after.hits.saturating_sub(mem_before.hits),
        mem_misses: mem_after.misses.saturating_sub(mem_before.misses),
        disk_hits,
        disk_misses,
        independent,
        stdlib_only,
        dependent,
        batches: batch_sizes.len(),
        batch_sizes,
    };
    if let Some(first) = results.first_mut() {
        tracer.emit_diagnostics(&mut first.bag, Some(&metrics));
    }

    Ok((fs, results))
}

/// Route a module-graph result's diagnostics back onto the directory
/// run's per-file bags. Spans are remapped between the two file sets by
/// path; diagnostics for files outside this directory (dependencies) are
/// attached to the graph root's file.
fn distribute_graph_bag(
    result: &DiagnoseResult,
    fs: &FileSet,
    results: &mut [FileDiagnostics],
    replace_claimed: bool,
    root_idx: usize,
) {
    let mut translated: Vec<Diagnostic> = Vec::new();
    for diag in result.bag.iter() {
        if diag.code == Code::TIMINGS {
            continue;
        }
        let mut diag = diag.clone();
        remap_span(&mut diag.span, &result.file_set, fs);
        for note in &mut diag.notes {
            remap_span(&mut note.span, &result.file_set, fs);
        }
        for fix in &mut diag.fixes {
            remap_span(&mut fix.span, &result.file_set, fs);
        }
        translated.push(diag);
    }

    if replace_claimed {
        for result in results.iter_mut() {
            result.bag = DiagnosticBag::with_cap(result.bag.cap());
        }
    } else {
        // Only the root's own view is replaced; its in-directory
        // dependencies already produced their diagnostics in the
        // per-file pass.
        let root_file = results[root_idx].file;
        translated.retain(|d| d.span.is_empty() || d.span.file == root_file);
        let cap = results[root_idx].bag.cap();
        results[root_idx].bag = DiagnosticBag::with_cap(cap);
    }

    for diag in translated {
        let target = results
            .iter()
            .position(|r| !diag.span.is_empty() && r.file == diag.span.file)
            .unwrap_or(root_idx);
        results[target].bag.append(diag);
    }
}

/// Rewrite a span recorded against one file set so it points at the same
/// path in another.
fn remap_span(span: &mut Span, from: &FileSet, to: &FileSet) {
    if span.is_empty() {
        return;
    }
    if (span.file.0 as usize) < from.len() {
        let path = &from.get(span.file).path;
        if let Some(id) = to.lookup(path) {
            span.file = id;
            return;
        }
    }
    *span = Span::EMPTY;
}

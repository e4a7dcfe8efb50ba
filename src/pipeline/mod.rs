//! Per-file pre-processing: lex, parse, and best-effort single-file
//! resolution, fanned out over a bounded, cancellable worker pool.

use crate::cache::{MemEntry, MemoryCache};
use crate::diagnostics::{Code, Diagnostic, DiagnosticBag};
use crate::driver::Stage;
use crate::frontend::{CheckOptions, Frontend, ResolveOptions, SemaResult, SymbolsResult};
use crate::source::{FileId, FileSet, Span};
use crate::symbols::{ExportsMap, SymbolTable};
use crate::timing::{Tracer, PHASE_PARSE, PHASE_SEMA, PHASE_SYMBOLS, PHASE_TOKENIZE};
use ahash::AHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, polled at worker entry and between jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One file scheduled through the pipeline.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub file: FileId,
    pub logical_path: String,
}

/// Everything one worker produced for one file.
#[derive(Default)]
pub struct FileOutcome {
    pub file: Option<FileId>,
    pub bag: DiagnosticBag,
    pub ast: Option<Arc<crate::frontend::Ast>>,
    pub symbols: Option<SymbolsResult>,
    pub sema: Option<SemaResult>,
    /// Memory-cache hit; further work for the module was skipped.
    pub cached: Option<MemEntry>,
}

/// Shared, read-only inputs of one pipeline run.
pub struct PipelineOptions<'a> {
    pub stage: Stage,
    pub max_diagnostics: usize,
    /// Files claimed by a multi-file module; their early per-file sema is
    /// skipped because the module graph will resolve them with the full
    /// module scope.
    pub claimed: &'a AHashSet<FileId>,
    pub cache: Option<&'a MemoryCache>,
    pub frontend: &'a Frontend,
    pub tracer: &'a Tracer,
    pub no_alien_hints: bool,
}

/// Run every job, bounded by `min(jobs_limit, jobs.len())` workers.
///
/// Workers claim job indices off a channel and post results back tagged
/// with their index; each result lands in its pre-allocated slot, so no
/// lock is held around worker output.
pub fn run_files(
    fs: &FileSet,
    jobs: &[FileJob],
    jobs_limit: usize,
    opts: &PipelineOptions<'_>,
    cancel: &CancelToken,
) -> Vec<FileOutcome> {
    let workers = jobs_limit.min(jobs.len()).max(1);
    if workers == 1 {
        return jobs
            .iter()
            .map(|job| {
                if cancel.is_cancelled() {
                    cancelled_outcome(job)
                } else {
                    process_file(fs, job, opts)
                }
            })
            .collect();
    }

    let (job_tx, job_rx) = crossbeam::channel::unbounded::<usize>();
    let (result_tx, result_rx) = crossbeam::channel::unbounded::<(usize, FileOutcome)>();
    for idx in 0..jobs.len() {
        job_tx.send(idx).expect("job channel closed");
    }
    drop(job_tx);

    crossbeam::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move |_| {
                if cancel.is_cancelled() {
                    return;
                }
                while let Ok(idx) = job_rx.recv() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let outcome = process_file(fs, &jobs[idx], opts);
                    if result_tx.send((idx, outcome)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(result_tx);
    })
    .expect("file worker panicked");

    let mut slots: Vec<Option<FileOutcome>> = Vec::with_capacity(jobs.len());
    slots.resize_with(jobs.len(), || None);
    for (idx, outcome) in result_rx.iter() {
        slots[idx] = Some(outcome);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| slot.unwrap_or_else(|| cancelled_outcome(&jobs[idx])))
        .collect()
}

fn cancelled_outcome(job: &FileJob) -> FileOutcome {
    FileOutcome {
        file: Some(job.file),
        bag: DiagnosticBag::new(),
        ..FileOutcome::default()
    }
}

/// The per-file stage ladder: load check, cache lookup, lex, parse,
/// optional single-file resolution and sema.
pub fn process_file(fs: &FileSet, job: &FileJob, opts: &PipelineOptions<'_>) -> FileOutcome {
    let file = fs.get(job.file);
    let mut outcome = FileOutcome {
        file: Some(job.file),
        bag: DiagnosticBag::with_cap(opts.max_diagnostics),
        ..FileOutcome::default()
    };

    if let Some(err) = &file.load_error {
        outcome.bag.append(Diagnostic::error(
            Code::IO_LOAD_FILE_ERROR,
            Span::file_start(file.id),
            format!("failed to load '{}': {}", file.path.display(), err),
        ));
        return outcome;
    }

    if let Some(cache) = opts.cache {
        if let Some(entry) = cache.get(&job.logical_path, &file.hash) {
            // Broken entries are recomputed so the full diagnostics are
            // surfaced, not just the remembered first error.
            if !entry.broken {
                let t = opts.tracer.begin(crate::timing::PHASE_PROCESS_MODULE);
                opts.tracer
                    .end(t, Some(format!("{} (memory cache)", job.logical_path)));
                outcome.cached = Some(entry);
                return outcome;
            }
        }
    }

    let t = opts.tracer.begin(PHASE_TOKENIZE);
    let tokens = opts.frontend.lexer.tokenize(file, &mut outcome.bag);
    opts.tracer.end(t, None);
    if opts.stage < Stage::Syntax {
        return outcome;
    }

    let t = opts.tracer.begin(PHASE_PARSE);
    let ast = Arc::new(opts.frontend.parser.parse(tokens, file, &mut outcome.bag));
    opts.tracer.end(t, None);

    if opts.stage >= Stage::Sema && !opts.claimed.contains(&file.id) {
        // Early feedback with no cross-module exports; the resolver is
        // expected to stay quiet about names an import could provide.
        let exports = ExportsMap::default();
        let module_files = [file.id].into_iter().collect::<AHashSet<_>>();
        let mut table = SymbolTable::new();

        let t = opts.tracer.begin(PHASE_SYMBOLS);
        let symbols = opts.frontend.resolver.resolve(
            &ast,
            &mut table,
            ResolveOptions {
                declare_only: false,
                reuse_decls: false,
                module_exports: &exports,
                module_files: &module_files,
                no_alien_hints: opts.no_alien_hints,
            },
            &mut outcome.bag,
        );
        opts.tracer.end(t, None);

        let t = opts.tracer.begin(PHASE_SEMA);
        let sema = opts.frontend.checker.check(
            &ast,
            &table,
            CheckOptions {
                module_exports: &exports,
                record_instantiations: false,
            },
            &mut outcome.bag,
        );
        opts.tracer.end(t, None);

        outcome.symbols = Some(symbols);
        outcome.sema = Some(sema);
    }

    outcome.ast = Some(ast);
    outcome
}

//! Phase timers and the `ObsTimings` diagnostics they produce.

use crate::diagnostics::{Code, Diagnostic, DiagnosticBag};
use crate::source::Span;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;

pub const PHASE_LOAD_FILE: &str = "load_file";
pub const PHASE_TOKENIZE: &str = "tokenize";
pub const PHASE_PARSE: &str = "parse";
pub const PHASE_IMPORTS_GRAPH: &str = "imports_graph";
pub const PHASE_SYMBOLS: &str = "symbols";
pub const PHASE_SEMA: &str = "sema";
pub const PHASE_HIR: &str = "hir";
pub const PHASE_MODULE_GRAPH: &str = "module_graph";
pub const PHASE_PROCESS_MODULE: &str = "process_module";

/// One recorded phase interval.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub phase: String,
    pub begin_us: u64,
    pub end_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TraceEvent {
    pub fn duration_us(&self) -> u64 {
        self.end_us.saturating_sub(self.begin_us)
    }
}

/// Per-phase rollup for the summary payload.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub count: usize,
    pub total_us: u64,
}

/// Directory-mode metrics published alongside the phase summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirMetrics {
    pub workers: usize,
    pub files: usize,
    pub mem_hits: u64,
    pub mem_misses: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    /// Files with no imports at all.
    pub independent: usize,
    /// Files importing only stdlib modules.
    pub stdlib_only: usize,
    /// Files with project-local imports.
    pub dependent: usize,
    pub batches: usize,
    pub batch_sizes: Vec<usize>,
}

/// Span-tree tracer attached to one driver invocation.
///
/// `begin` returns an index that the matching `end` closes; a disabled
/// tracer turns both into no-ops. The tracer is internally locked so the
/// per-file workers can record into it directly.
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    start: Instant,
    events: Mutex<Vec<TraceEvent>>,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Tracer {
            enabled,
            start: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn elapsed_us(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Open a phase; the returned index closes it.
    pub fn begin(&self, phase: &str) -> usize {
        if !self.enabled {
            return usize::MAX;
        }
        let now = self.elapsed_us();
        let mut events = self.events.lock().expect("tracer poisoned");
        events.push(TraceEvent {
            phase: phase.to_string(),
            begin_us: now,
            end_us: now,
            note: None,
        });
        events.len() - 1
    }

    /// Close a phase opened by [`Tracer::begin`].
    pub fn end(&self, index: usize, note: Option<String>) {
        if !self.enabled || index == usize::MAX {
            return;
        }
        let now = self.elapsed_us();
        let mut events = self.events.lock().expect("tracer poisoned");
        if let Some(event) = events.get_mut(index) {
            event.end_us = now;
            event.note = note;
        }
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("tracer poisoned").clone()
    }

    fn summarize(&self) -> Vec<PhaseSummary> {
        let events = self.events.lock().expect("tracer poisoned");
        let mut order: Vec<String> = Vec::new();
        let mut totals: ahash::AHashMap<String, (usize, u64)> = ahash::AHashMap::new();
        for event in events.iter() {
            let entry = totals.entry(event.phase.clone()).or_insert_with(|| {
                order.push(event.phase.clone());
                (0, 0)
            });
            entry.0 += 1;
            entry.1 += event.duration_us();
        }
        order
            .into_iter()
            .map(|phase| {
                let (count, total_us) = totals[&phase];
                PhaseSummary {
                    phase,
                    count,
                    total_us,
                }
            })
            .collect()
    }

    /// Append the timing summary to a bag as `ObsTimings` Info entries:
    /// a human-readable line with the JSON payload carried in a note.
    pub fn emit_diagnostics(&self, bag: &mut DiagnosticBag, metrics: Option<&DirMetrics>) {
        if !self.enabled {
            return;
        }
        let summary = self.summarize();
        let total_us: u64 = summary.iter().map(|p| p.total_us).sum();
        let human = summary
            .iter()
            .map(|p| format!("{} {}x {}us", p.phase, p.count, p.total_us))
            .collect::<Vec<_>>()
            .join(", ");
        let payload = serde_json::json!({ "phases": summary, "total_us": total_us });
        let mut diag = Diagnostic::info(
            Code::TIMINGS,
            Span::EMPTY,
            format!("timings: {} (total {}us)", human, total_us),
        )
        .with_note(Span::EMPTY, payload.to_string());

        if let Some(metrics) = metrics {
            let line = format!(
                "workers={} files={} mem={}h/{}m disk={}h/{}m classes={}i/{}s/{}d batches={}",
                metrics.workers,
                metrics.files,
                metrics.mem_hits,
                metrics.mem_misses,
                metrics.disk_hits,
                metrics.disk_misses,
                metrics.independent,
                metrics.stdlib_only,
                metrics.dependent,
                metrics.batches,
            );
            let payload =
                serde_json::to_string(metrics).unwrap_or_else(|_| "{}".to_string());
            diag = diag.with_note(Span::EMPTY, format!("metrics: {} {}", line, payload));
        }
        bag.append(diag);
    }
}

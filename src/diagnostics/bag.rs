use super::{Diagnostic, Severity};
use crate::source::FileId;

/// Default cap applied when the caller does not set `max_diagnostics`.
pub const DEFAULT_MAX_DIAGNOSTICS: usize = 256;

/// Ordered, capped collection of diagnostics.
///
/// Every module (and every per-file worker) owns one bag; the driver
/// merges them at the end of an invocation. Appending to a full bag
/// returns `false`; [`DiagnosticBag::merge`] keeps the first error alive
/// even when the cap is hit.
#[derive(Debug, Clone)]
pub struct DiagnosticBag {
    items: Vec<Diagnostic>,
    cap: usize,
}

impl Default for DiagnosticBag {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_MAX_DIAGNOSTICS)
    }

    pub fn with_cap(cap: usize) -> Self {
        DiagnosticBag {
            items: Vec::new(),
            cap: cap.max(1),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    /// Append a diagnostic. Returns `false` (dropping the entry) when the
    /// bag is full.
    pub fn append(&mut self, diag: Diagnostic) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push(diag);
        true
    }

    /// Merge another bag into this one, best-effort under the cap.
    ///
    /// If the cap cuts the merge short and the remainder contained an
    /// error while this bag has none, the first such error is pushed past
    /// the cap so it is never dropped silently. Returns `false` when
    /// anything was dropped.
    pub fn merge(&mut self, other: DiagnosticBag) -> bool {
        let mut dropped = false;
        let mut iter = other.items.into_iter();
        for diag in iter.by_ref() {
            if !self.append(diag.clone()) {
                dropped = true;
                if diag.severity >= Severity::Error && !self.has_errors() {
                    self.items.push(diag);
                }
                break;
            }
        }
        for diag in iter {
            dropped = true;
            if diag.severity >= Severity::Error && !self.has_errors() {
                self.items.push(diag);
            }
        }
        !dropped
    }

    /// Keep only diagnostics matching the predicate.
    pub fn filter(&mut self, mut pred: impl FnMut(&Diagnostic) -> bool) {
        self.items.retain(|d| pred(d));
    }

    /// Apply a transformation to every diagnostic in place.
    pub fn transform(&mut self, mut f: impl FnMut(&mut Diagnostic)) {
        for diag in &mut self.items {
            f(diag);
        }
    }

    /// Sort by (file, start offset, code). Stable, so equal keys keep
    /// their append order.
    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// Drop exact duplicates, keeping first occurrences in order.
    /// Re-running an already-resolved module may replay its diagnostics;
    /// this keeps that idempotent.
    pub fn dedup(&mut self) {
        let mut seen: Vec<Diagnostic> = Vec::with_capacity(self.items.len());
        for diag in self.items.drain(..) {
            if !seen.contains(&diag) {
                seen.push(diag);
            }
        }
        self.items = seen;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity >= Severity::Error)
    }

    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.items.iter().find(|d| d.severity >= Severity::Error)
    }

    /// Keep only diagnostics whose primary span is in `file`. Synthetic
    /// diagnostics (empty span) are kept.
    pub fn retain_file(&mut self, file: FileId) {
        self.items
            .retain(|d| d.span.is_empty() || d.span.file == file);
    }

    /// Remove and return diagnostics whose primary span is in `file`.
    pub fn drain_file(&mut self, file: FileId) -> Vec<Diagnostic> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for diag in self.items.drain(..) {
            if diag.span.file == file {
                taken.push(diag);
            } else {
                kept.push(diag);
            }
        }
        self.items = kept;
        taken
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Code;
    use crate::source::{FileId, Span};

    fn err(file: u32, start: u32) -> Diagnostic {
        Diagnostic::error(
            Code::MISSING_MODULE,
            Span::new(FileId(file), start, start + 1),
            "x",
        )
    }

    fn warn(file: u32, start: u32) -> Diagnostic {
        Diagnostic::warning(
            Code::external("SemaUnusedBinding"),
            Span::new(FileId(file), start, start + 1),
            "unused",
        )
    }

    #[test]
    fn test_append_respects_cap() {
        let mut bag = DiagnosticBag::with_cap(2);
        assert!(bag.append(warn(0, 0)));
        assert!(bag.append(warn(0, 1)));
        assert!(!bag.append(warn(0, 2)));
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_merge_keeps_first_error_past_cap() {
        let mut bag = DiagnosticBag::with_cap(2);
        bag.append(warn(0, 0));
        bag.append(warn(0, 1));

        let mut overflow = DiagnosticBag::new();
        overflow.append(warn(0, 2));
        overflow.append(err(0, 3));

        let clean = bag.merge(overflow);
        assert!(!clean);
        assert!(bag.has_errors());
        assert_eq!(bag.first_error().unwrap().span.start, 3);
    }

    #[test]
    fn test_sort_orders_by_file_then_offset_then_code() {
        let mut bag = DiagnosticBag::new();
        bag.append(err(1, 5));
        bag.append(warn(0, 9));
        bag.append(err(0, 2));
        bag.sort();
        let spans: Vec<(u32, u32)> = bag.iter().map(|d| (d.span.file.0, d.span.start)).collect();
        assert_eq!(spans, vec![(0, 2), (0, 9), (1, 5)]);
    }

    #[test]
    fn test_transform_warnings_as_errors() {
        let mut bag = DiagnosticBag::new();
        bag.append(warn(0, 0));
        bag.transform(|d| {
            if d.severity == Severity::Warning {
                d.severity = Severity::Error;
            }
        });
        assert!(bag.has_errors());
    }

    #[test]
    fn test_retain_file_keeps_synthetic() {
        let mut bag = DiagnosticBag::new();
        bag.append(err(0, 0));
        bag.append(err(1, 0));
        bag.append(Diagnostic::info(Code::TIMINGS, Span::EMPTY, "timings"));
        bag.retain_file(FileId(0));
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_drain_file_splits() {
        let mut bag = DiagnosticBag::new();
        bag.append(err(0, 0));
        bag.append(err(1, 0));
        let taken = bag.drain_file(FileId(1));
        assert_eq!(taken.len(), 1);
        assert_eq!(bag.len(), 1);
    }
}

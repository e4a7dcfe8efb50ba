mod bag;

use crate::source::Span;
use colored::Colorize;
use std::fmt;

pub use bag::{DiagnosticBag, DEFAULT_MAX_DIAGNOSTICS};

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        write!(f, "{}", name)
    }
}

/// Stable diagnostic code.
///
/// The spellings are part of the driver's external interface; tooling
/// matches on them byte-for-byte. External collaborators (resolver,
/// checker) mint their own codes through [`Code::external`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Code(&'static str);

impl Code {
    pub const IO_LOAD_FILE_ERROR: Code = Code("IOLoadFileError");
    pub const INVALID_MODULE_PATH: Code = Code("ProjInvalidModulePath");
    pub const INVALID_IMPORT_PATH: Code = Code("ProjInvalidImportPath");
    pub const MISSING_MODULE: Code = Code("ProjMissingModule");
    pub const DUPLICATE_MODULE: Code = Code("ProjDuplicateModule");
    pub const SELF_IMPORT: Code = Code("ProjSelfImport");
    pub const IMPORT_CYCLE: Code = Code("ProjImportCycle");
    pub const DEPENDENCY_FAILED: Code = Code("ProjDependencyFailed");
    pub const INCONSISTENT_NO_STD: Code = Code("ProjInconsistentNoStd");
    pub const MISSING_MODULE_PRAGMA: Code = Code("ProjMissingModulePragma");
    pub const INCONSISTENT_MODULE_NAME: Code = Code("ProjInconsistentModuleName");
    pub const WRONG_MODULE_NAME_IN_IMPORT: Code = Code("ProjWrongModuleNameInImport");
    pub const ENTRYPOINT_NOT_FOUND: Code = Code("SemaEntrypointNotFound");
    pub const MULTIPLE_ENTRYPOINTS: Code = Code("SemaMultipleEntrypoints");
    pub const TIMINGS: Code = Code("ObsTimings");

    /// A code owned by an external collaborator.
    pub const fn external(name: &'static str) -> Code {
        Code(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secondary message attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub span: Span,
    pub message: String,
}

/// Automatic rewrite suggestion attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fix {
    pub span: Span,
    pub replacement: String,
    pub message: String,
}

/// A single user-visible diagnostic.
///
/// The driver never fails on a user-program problem; it records one of
/// these and continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Code,
    pub span: Span,
    pub message: String,
    pub notes: Vec<Note>,
    pub fixes: Vec<Fix>,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: Code, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            code,
            span,
            message: message.into(),
            notes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn error(code: Code, span: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, span, message)
    }

    pub fn warning(code: Code, span: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, span, message)
    }

    pub fn info(code: Code, span: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, span, message)
    }

    pub fn with_note(mut self, span: Span, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_fix(mut self, span: Span, replacement: impl Into<String>, message: impl Into<String>) -> Self {
        self.fixes.push(Fix {
            span,
            replacement: replacement.into(),
            message: message.into(),
        });
        self
    }

    /// Sort key: file, then start offset, then code.
    pub(crate) fn sort_key(&self) -> (u32, u32, &'static str) {
        (self.span.file.0, self.span.start, self.code.as_str())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Info => "info".cyan(),
            Severity::Warning => "warning".yellow(),
            Severity::Error => "error".red().bold(),
            Severity::Fatal => "fatal".red().bold(),
        };
        write!(f, "{}[{}]: {}", label, self.code, self.message)?;
        if !self.span.is_empty() {
            write!(f, " at {}", self.span)?;
        }
        Ok(())
    }
}

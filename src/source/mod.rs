use crate::digest::Digest;
use ahash::AHashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifies a loaded source file within a [`FileSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// Sentinel file id used by the empty span.
    pub const NONE: FileId = FileId(u32::MAX);
}

/// A half-open byte range in a source file.
///
/// Equality is structural. [`Span::EMPTY`] is the distinguished span for
/// synthetic diagnostics that have no source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const EMPTY: Span = Span {
        file: FileId::NONE,
        start: 0,
        end: 0,
    };

    pub fn new(file: FileId, start: u32, end: u32) -> Span {
        Span { file, start, end }
    }

    /// A zero-length span at the start of a file, for diagnostics about
    /// the file as a whole.
    pub fn file_start(file: FileId) -> Span {
        Span {
            file,
            start: 0,
            end: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file == FileId::NONE
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<no-span>")
        } else {
            write!(f, "{}:{}..{}", self.file.0, self.start, self.end)
        }
    }
}

/// Override hook for reading source text, used by LSP-style callers that
/// hold unsaved buffers.
pub type ReadFileFn = Arc<dyn Fn(&Path) -> io::Result<String> + Send + Sync>;

/// A single loaded source file.
///
/// Load failures do not abort loading; the error is recorded here and
/// surfaced later as an `IOLoadFileError` diagnostic by the per-file
/// pipeline.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    pub text: String,
    pub hash: Digest,
    pub load_error: Option<String>,
}

impl SourceFile {
    pub fn is_ok(&self) -> bool {
        self.load_error.is_none()
    }
}

/// Owns every source file touched by one driver invocation.
#[derive(Default)]
pub struct FileSet {
    files: Vec<SourceFile>,
    by_path: AHashMap<PathBuf, FileId>,
    reader: Option<ReadFileFn>,
}

impl std::fmt::Debug for FileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSet")
            .field("files", &self.files)
            .field("by_path", &self.by_path)
            .field("reader", &self.reader.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl FileSet {
    pub fn new() -> Self {
        FileSet::default()
    }

    /// Use a custom reader instead of `std::fs::read_to_string`.
    pub fn with_reader(reader: ReadFileFn) -> Self {
        FileSet {
            files: Vec::new(),
            by_path: AHashMap::new(),
            reader: Some(reader),
        }
    }

    /// Load a file, or return the id it was already loaded under.
    ///
    /// Read errors are recorded on the file rather than returned; the
    /// caller decides whether a failed load is fatal.
    pub fn load(&mut self, path: &Path) -> FileId {
        if let Some(id) = self.by_path.get(path) {
            return *id;
        }
        let read = match &self.reader {
            Some(reader) => reader(path),
            None => std::fs::read_to_string(path),
        };
        let (text, load_error) = match read {
            Ok(text) => (text, None),
            Err(err) => (String::new(), Some(err.to_string())),
        };
        let id = FileId(u32::try_from(self.files.len()).expect("file count exceeds u32"));
        let hash = Digest::of_str(&text);
        self.files.push(SourceFile {
            id,
            path: path.to_path_buf(),
            text,
            hash,
            load_error,
        });
        self.by_path.insert(path.to_path_buf(), id);
        id
    }

    pub fn get(&self, id: FileId) -> &SourceFile {
        &self.files[id.0 as usize]
    }

    pub fn lookup(&self, path: &Path) -> Option<FileId> {
        self.by_path.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }
}

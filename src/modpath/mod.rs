//! Canonical module paths and import-path resolution.
//!
//! A canonical module path is slash-separated, `.sg`-free and built from
//! ASCII identifier segments, e.g. `a/b/c`. Import paths are spelled with
//! `::` separators and may contain `.` and `..` segments that resolve
//! against the importing module's directory.

pub mod resolver;

use std::fmt;
use std::path::Path;

pub use resolver::{
    find_stdlib_root, module_file_exists, reset_global_caches, resolve_module_dir, ResolveError,
    ResolveErrorKind, ResolvedModuleDir,
};

/// The only file extension considered in directory walks.
pub const SOURCE_EXT: &str = "sg";

pub type PathResult<T> = Result<T, PathError>;

/// Why a module or import path failed to normalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    pub kind: PathErrorKind,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathErrorKind {
    Empty,
    InvalidSegment,
    EscapesRoot,
}

impl PathError {
    fn new(kind: PathErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        PathError {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid path '{}': {}", self.path, self.message)
    }
}

impl std::error::Error for PathError {}

/// Check a module path segment: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Normalize a slash-separated module path.
///
/// Strips a trailing `.sg` from the last segment, rejects empty, `.` and
/// `..` segments and non-identifier segments.
pub fn normalize_path(raw: &str) -> PathResult<String> {
    if raw.is_empty() {
        return Err(PathError::new(PathErrorKind::Empty, raw, "empty module path"));
    }
    let mut segments: Vec<&str> = raw.split('/').collect();
    let last = segments.len() - 1;
    if let Some(stem) = segments[last].strip_suffix(".sg") {
        segments[last] = stem;
    }
    for segment in &segments {
        if segment.is_empty() || *segment == "." || *segment == ".." {
            return Err(PathError::new(
                PathErrorKind::InvalidSegment,
                raw,
                format!("segment '{}' is not allowed", segment),
            ));
        }
        if !is_valid_identifier(segment) {
            return Err(PathError::new(
                PathErrorKind::InvalidSegment,
                raw,
                format!("segment '{}' is not a valid identifier", segment),
            ));
        }
    }
    Ok(segments.join("/"))
}

/// Derive the canonical path of a source file relative to a base dir.
pub fn logical_path_for(file: &Path, base: &Path) -> PathResult<String> {
    let rel = file.strip_prefix(base).unwrap_or(file);
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            std::path::Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => {
                    return Err(PathError::new(
                        PathErrorKind::InvalidSegment,
                        rel.display().to_string(),
                        "non-UTF-8 path component",
                    ))
                }
            },
            _ => {
                return Err(PathError::new(
                    PathErrorKind::InvalidSegment,
                    rel.display().to_string(),
                    "unexpected path component",
                ))
            }
        }
    }
    normalize_path(&parts.join("/"))
}

/// Last segment of a canonical path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a canonical path, `""` at the root.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Join a canonical dir path and a name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Whether a canonical path addresses the stdlib.
pub fn is_stdlib_path(path: &str) -> bool {
    path == "core" || path == "stdlib" || path.starts_with("core/")
}

/// Resolve an import spelling against the importing module's directory.
///
/// `spelled` is `::`-separated; `.` keeps the current directory, `..`
/// moves one directory up and fails with [`PathErrorKind::EscapesRoot`]
/// when it would leave the project root. A leading `core` or `stdlib`
/// segment makes the path absolute into the stdlib.
pub fn resolve_import(spelled: &str, current_dir: &str) -> PathResult<String> {
    if spelled.is_empty() {
        return Err(PathError::new(PathErrorKind::Empty, spelled, "empty import path"));
    }
    let segments: Vec<&str> = spelled.split("::").collect();
    if matches!(segments.first(), Some(&"core") | Some(&"stdlib")) {
        // Absolute stdlib path; validate the spelled segments as-is.
        return normalize_path(&segments.join("/"));
    }

    let mut stack: Vec<&str> = if current_dir.is_empty() {
        Vec::new()
    } else {
        current_dir.split('/').collect()
    };
    for segment in &segments {
        match *segment {
            "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(PathError::new(
                        PathErrorKind::EscapesRoot,
                        spelled,
                        "import path escapes the project root",
                    ));
                }
            }
            other => {
                if !is_valid_identifier(other) {
                    return Err(PathError::new(
                        PathErrorKind::InvalidSegment,
                        spelled,
                        format!("segment '{}' is not a valid identifier", other),
                    ));
                }
                stack.push(other);
            }
        }
    }
    if stack.is_empty() {
        return Err(PathError::new(
            PathErrorKind::Empty,
            spelled,
            "import path resolves to nothing",
        ));
    }
    Ok(stack.join("/"))
}

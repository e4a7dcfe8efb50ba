//! Maps canonical module paths to filesystem directories.
//!
//! Four strategies, in order: an exact `.sg` file under the base dir, an
//! exact directory, and a cached workspace scan for pragma declarations.
//! Stdlib paths run the same strategies under the stdlib root first.

use super::{is_stdlib_path, last_segment, SOURCE_EXT};
use log::debug;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use walkdir::WalkDir;

/// Environment variable naming an explicit stdlib root.
pub const STDLIB_ENV: &str = "SURGE_STDLIB";

/// Install locations probed when neither the env var nor the upward
/// search finds a stdlib.
const KNOWN_STDLIB_DIRS: &[&str] = &["/usr/local/lib/surge/stdlib", "/usr/lib/surge/stdlib"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    ModuleNotFound,
    Io,
}

#[derive(Debug, Clone)]
pub struct ResolveError {
    pub kind: ResolveErrorKind,
    pub path: String,
    pub message: String,
}

impl ResolveError {
    fn not_found(path: &str, base: &Path) -> Self {
        ResolveError {
            kind: ResolveErrorKind::ModuleNotFound,
            path: path.to_string(),
            message: format!("module '{}' not found under '{}'", path, base.display()),
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ResolveError {}

/// A resolved module location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModuleDir {
    /// Directory holding the module's files.
    pub dir: PathBuf,
    /// The exact `.sg` file, when strategy 1 matched.
    pub file: Option<PathBuf>,
}

struct ScanHit {
    dir: PathBuf,
    /// Slash-separated dir path relative to the scan root.
    logical_dir: String,
    depth: usize,
}

/// One workspace scan: module/binary pragma names to candidate dirs.
struct ScanIndex {
    by_name: HashMap<String, Vec<ScanHit>>,
}

fn scan_cache() -> &'static Mutex<HashMap<PathBuf, Arc<ScanIndex>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<ScanIndex>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn stdlib_cache() -> &'static Mutex<HashMap<PathBuf, Option<PathBuf>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Option<PathBuf>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Clear the process-global scan and stdlib caches. Tests that move
/// workspaces around must call this between runs.
pub fn reset_global_caches() {
    scan_cache()
        .lock()
        .expect("scan cache poisoned")
        .clear();
    stdlib_cache()
        .lock()
        .expect("stdlib cache poisoned")
        .clear();
}

/// Extract `pragma module::Name` / `pragma binary::Name` from file text.
fn pragma_name(text: &str) -> Option<&str> {
    for marker in ["pragma module::", "pragma binary::"] {
        if let Some(pos) = text.find(marker) {
            let rest = &text[pos + marker.len()..];
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if end > 0 {
                return Some(&rest[..end]);
            }
        }
    }
    None
}

fn scan_workspace(base: &Path) -> Arc<ScanIndex> {
    {
        let cache = scan_cache().lock().expect("scan cache poisoned");
        if let Some(index) = cache.get(base) {
            return Arc::clone(index);
        }
    }

    debug!("scanning workspace {} for module pragmas", base.display());
    let mut by_name: HashMap<String, Vec<ScanHit>> = HashMap::new();
    for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXT)
        {
            continue;
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => continue,
        };
        let Some(name) = pragma_name(&text) else {
            continue;
        };
        let Some(dir) = path.parent() else { continue };
        let rel = dir.strip_prefix(base).unwrap_or(dir);
        let logical_dir = rel
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(p) => p.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        let depth = if logical_dir.is_empty() {
            0
        } else {
            logical_dir.split('/').count()
        };
        let hits = by_name.entry(name.to_string()).or_default();
        if !hits.iter().any(|h| h.dir == dir) {
            hits.push(ScanHit {
                dir: dir.to_path_buf(),
                logical_dir,
                depth,
            });
        }
    }

    // Directory walk order is platform-dependent; sort so candidate
    // selection is deterministic everywhere.
    for hits in by_name.values_mut() {
        hits.sort_by(|a, b| a.logical_dir.cmp(&b.logical_dir));
    }

    let index = Arc::new(ScanIndex { by_name });
    scan_cache()
        .lock()
        .expect("scan cache poisoned")
        .insert(base.to_path_buf(), Arc::clone(&index));
    index
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.split('/')
        .zip(b.split('/'))
        .take_while(|(x, y)| x == y)
        .count()
}

fn try_under(path: &str, root: &Path) -> Option<ResolvedModuleDir> {
    // Strategy 1: an exact source file.
    let file = root.join(format!("{}.{}", path, SOURCE_EXT));
    if file.is_file() {
        let dir = file.parent().unwrap_or(root).to_path_buf();
        return Some(ResolvedModuleDir {
            dir,
            file: Some(file),
        });
    }

    // Strategy 2: an exact directory.
    let dir = root.join(path);
    if dir.is_dir() {
        return Some(ResolvedModuleDir { dir, file: None });
    }

    // Strategy 3: pragma scan, longest shared prefix wins, ties broken
    // by shallowest candidate.
    let index = scan_workspace(root);
    let name = last_segment(path);
    let hits = index.by_name.get(name)?;
    let target_dir = super::parent_of(path);
    hits.iter()
        .max_by(|a, b| {
            let pa = common_prefix_len(&a.logical_dir, target_dir);
            let pb = common_prefix_len(&b.logical_dir, target_dir);
            pa.cmp(&pb).then(b.depth.cmp(&a.depth))
        })
        .map(|hit| ResolvedModuleDir {
            dir: hit.dir.clone(),
            file: None,
        })
}

/// Resolve the filesystem directory of a canonical module path.
pub fn resolve_module_dir(
    path: &str,
    base: &Path,
    stdlib_root: Option<&Path>,
) -> Result<ResolvedModuleDir, ResolveError> {
    if is_stdlib_path(path) {
        if let Some(root) = stdlib_root {
            if let Some(resolved) = try_under(path, root) {
                return Ok(resolved);
            }
        }
    }
    try_under(path, base).ok_or_else(|| ResolveError::not_found(path, base))
}

/// Cheap probe used by the meta builder's candidate-import logic: does
/// this canonical path name a concrete module file, or a directory that
/// declares a pragma module? A directory of loose single-file modules is
/// not itself importable, so it does not count.
pub fn module_file_exists(path: &str, base: &Path, stdlib_root: Option<&Path>) -> bool {
    let probe = |root: &Path| {
        if root.join(format!("{}.{}", path, SOURCE_EXT)).is_file() {
            return true;
        }
        let dir = root.join(path);
        dir.is_dir() && dir_declares_module(&dir)
    };
    if is_stdlib_path(path) {
        if let Some(root) = stdlib_root {
            if probe(root) {
                return true;
            }
        }
    }
    probe(base)
}

fn dir_declares_module(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(SOURCE_EXT))
        .any(|p| {
            std::fs::read_to_string(&p)
                .map(|text| pragma_name(&text).is_some())
                .unwrap_or(false)
        })
}

fn stdlib_candidate(dir: &Path) -> bool {
    dir.join("core").is_dir()
}

/// Locate the stdlib root for a workspace.
///
/// Order: `SURGE_STDLIB`, upward search for a `stdlib/` directory that
/// contains the `core/` subtree, known install paths, `~/.surge/stdlib`.
/// The result (including "not found") is cached per base dir.
pub fn find_stdlib_root(base: &Path) -> Option<PathBuf> {
    {
        let cache = stdlib_cache().lock().expect("stdlib cache poisoned");
        if let Some(found) = cache.get(base) {
            return found.clone();
        }
    }

    let found = locate_stdlib_root(base);
    stdlib_cache()
        .lock()
        .expect("stdlib cache poisoned")
        .insert(base.to_path_buf(), found.clone());
    found
}

fn locate_stdlib_root(base: &Path) -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(STDLIB_ENV) {
        let root = PathBuf::from(explicit);
        if stdlib_candidate(&root) {
            return Some(root);
        }
        debug!(
            "{} points at '{}' which has no core/ subtree",
            STDLIB_ENV,
            root.display()
        );
        return None;
    }

    let mut current = Some(base);
    while let Some(dir) = current {
        let candidate = dir.join("stdlib");
        if stdlib_candidate(&candidate) {
            return Some(candidate);
        }
        current = dir.parent();
    }

    for known in KNOWN_STDLIB_DIRS {
        let candidate = PathBuf::from(known);
        if stdlib_candidate(&candidate) {
            return Some(candidate);
        }
    }
    if let Some(home) = dirs::home_dir() {
        let candidate = home.join(".surge").join("stdlib");
        if stdlib_candidate(&candidate) {
            return Some(candidate);
        }
    }
    None
}

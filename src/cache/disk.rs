use crate::digest::{Digest, DIGEST_LEN};
use crate::meta::{FileMeta, ImportMeta, ModuleKind, ModuleMeta};
use crate::source::Span;
use log::{debug, warn};
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Bumped whenever the payload layout changes; readers skip entries
/// whose version differs.
pub const SCHEMA_VERSION: u16 = 1;

const APP_DIR: &str = "surge";
const MODS_DIR: &str = "mods";
const ENTRY_EXT: &str = "mp";

/// Persisted per-module metadata, keyed on disk by content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskPayload {
    pub name: String,
    pub path: String,
    pub dir: String,
    pub kind: ModuleKind,
    pub no_std: bool,
    pub has_module_pragma: bool,
    pub broken: bool,
    pub import_paths: Vec<String>,
    pub file_paths: Vec<String>,
    pub file_hashes: Vec<Digest>,
    pub content_hash: Digest,
    pub module_hash: Digest,
    /// Combined hash of the dependencies alone; zero when the payload was
    /// written before the module graph existed.
    pub dependency_hash: Digest,
}

impl DiskPayload {
    pub fn from_meta(meta: &ModuleMeta, broken: bool, dependency_hash: Digest) -> Self {
        DiskPayload {
            name: meta.name.clone(),
            path: meta.path.clone(),
            dir: meta.dir.clone(),
            kind: meta.kind,
            no_std: meta.no_std,
            has_module_pragma: meta.has_module_pragma,
            broken,
            import_paths: meta.imports.iter().map(|i| i.path.clone()).collect(),
            file_paths: meta.files.iter().map(|f| f.path.clone()).collect(),
            file_hashes: meta.files.iter().map(|f| f.content_hash).collect(),
            content_hash: meta.content_hash,
            module_hash: meta.module_hash,
            dependency_hash,
        }
    }

    /// Rebuild a meta from the payload. Spans are synthetic: the sources
    /// were not reloaded.
    pub fn to_meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: self.name.clone(),
            path: self.path.clone(),
            dir: self.dir.clone(),
            kind: self.kind,
            has_module_pragma: self.has_module_pragma,
            no_std: self.no_std,
            imports: self
                .import_paths
                .iter()
                .map(|path| ImportMeta {
                    path: path.clone(),
                    span: Span::EMPTY,
                })
                .collect(),
            files: self
                .file_paths
                .iter()
                .zip(self.file_hashes.iter())
                .map(|(path, hash)| FileMeta {
                    path: path.clone(),
                    span: Span::EMPTY,
                    content_hash: *hash,
                })
                .collect(),
            content_hash: self.content_hash,
            module_hash: self.module_hash,
        }
    }

    /// Length-framed little-endian encoding, schema version first.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        write_str(&mut out, &self.name);
        write_str(&mut out, &self.path);
        write_str(&mut out, &self.dir);
        out.push(match self.kind {
            ModuleKind::Module => 0,
            ModuleKind::Binary => 1,
            ModuleKind::Unknown => 2,
        });
        out.push(self.no_std as u8);
        out.push(self.has_module_pragma as u8);
        out.push(self.broken as u8);
        write_u32(&mut out, self.import_paths.len());
        for path in &self.import_paths {
            write_str(&mut out, path);
        }
        write_u32(&mut out, self.file_paths.len());
        for (path, hash) in self.file_paths.iter().zip(self.file_hashes.iter()) {
            write_str(&mut out, path);
            out.extend_from_slice(hash.as_bytes());
        }
        out.extend_from_slice(self.content_hash.as_bytes());
        out.extend_from_slice(self.module_hash.as_bytes());
        out.extend_from_slice(self.dependency_hash.as_bytes());
        out
    }

    /// Decode a payload. Returns `None` for truncated bytes or a schema
    /// version other than [`SCHEMA_VERSION`].
    pub fn decode(bytes: &[u8]) -> Option<DiskPayload> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let version = cursor.u16()?;
        if version != SCHEMA_VERSION {
            return None;
        }
        let name = cursor.string()?;
        let path = cursor.string()?;
        let dir = cursor.string()?;
        let kind = match cursor.u8()? {
            0 => ModuleKind::Module,
            1 => ModuleKind::Binary,
            2 => ModuleKind::Unknown,
            _ => return None,
        };
        let no_std = cursor.u8()? != 0;
        let has_module_pragma = cursor.u8()? != 0;
        let broken = cursor.u8()? != 0;
        let import_count = cursor.u32()? as usize;
        let mut import_paths = Vec::with_capacity(import_count.min(1024));
        for _ in 0..import_count {
            import_paths.push(cursor.string()?);
        }
        let file_count = cursor.u32()? as usize;
        let mut file_paths = Vec::with_capacity(file_count.min(1024));
        let mut file_hashes = Vec::with_capacity(file_count.min(1024));
        for _ in 0..file_count {
            file_paths.push(cursor.string()?);
            file_hashes.push(cursor.digest()?);
        }
        let content_hash = cursor.digest()?;
        let module_hash = cursor.digest()?;
        let dependency_hash = cursor.digest()?;
        Some(DiskPayload {
            name,
            path,
            dir,
            kind,
            no_std,
            has_module_pragma,
            broken,
            import_paths,
            file_paths,
            file_hashes,
            content_hash,
            module_hash,
            dependency_hash,
        })
    }
}

fn write_u32(out: &mut Vec<u8>, value: usize) {
    let value = u32::try_from(value).expect("payload field count exceeds u32");
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn digest(&mut self) -> Option<Digest> {
        let bytes = self.take(DIGEST_LEN)?;
        let mut arr = [0u8; DIGEST_LEN];
        arr.copy_from_slice(bytes);
        Some(Digest::from_bytes(arr))
    }
}

/// Cross-invocation module cache under the user's cache home.
///
/// Writes are atomic: a uniquely named temp file in the target directory
/// is synced and renamed over the entry, so concurrent writers cannot
/// corrupt readers and the last committed payload wins.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    drop_lock: Mutex<()>,
}

impl DiskCache {
    /// Open (creating if needed) the default cache directory:
    /// `$XDG_CACHE_HOME/surge/mods` or the platform cache home.
    pub fn new() -> io::Result<DiskCache> {
        let home = env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(dirs::cache_dir)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no cache home available"))?;
        Self::at(home.join(APP_DIR).join(MODS_DIR))
    }

    /// Open a cache rooted at an explicit directory.
    pub fn at(root: PathBuf) -> io::Result<DiskCache> {
        std::fs::create_dir_all(&root)?;
        Ok(DiskCache {
            root,
            drop_lock: Mutex::new(()),
        })
    }

    fn entry_path(&self, hash: &Digest) -> PathBuf {
        self.root.join(format!("{}.{}", hash.to_hex(), ENTRY_EXT))
    }

    /// Load the payload stored under a content hash.
    ///
    /// A missing entry is a miss (`Ok(None)`); so are schema-version and
    /// fingerprint mismatches. Other I/O errors are surfaced to the
    /// caller, which may still decide to treat them as misses.
    pub fn load(&self, content_hash: &Digest) -> io::Result<Option<DiskPayload>> {
        let path = self.entry_path(content_hash);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(payload) = DiskPayload::decode(&bytes) else {
            debug!("discarding cache entry {}: schema mismatch", path.display());
            return Ok(None);
        };
        if payload.content_hash != *content_hash {
            warn!(
                "cache entry {} does not match its key; treating as miss",
                path.display()
            );
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Atomically store a payload under its content hash.
    pub fn store(&self, payload: &DiskPayload) -> io::Result<()> {
        let target = self.entry_path(&payload.content_hash);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&payload.encode())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }

    /// Move the cache directory aside and delete it in the background;
    /// the active cache starts empty immediately.
    pub fn drop_all(&self) -> io::Result<()> {
        let _guard = self.drop_lock.lock().expect("disk cache drop lock poisoned");
        let aside = self.root.with_extension(format!("trash-{}", std::process::id()));
        match std::fs::rename(&self.root, &aside) {
            Ok(()) => {
                std::fs::create_dir_all(&self.root)?;
                std::thread::spawn(move || {
                    if let Err(err) = std::fs::remove_dir_all(&aside) {
                        warn!("failed to remove old cache {}: {}", aside.display(), err);
                    }
                });
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&self.root)?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Number of committed entries, for the metrics line.
    pub fn entry_count(&self) -> usize {
        std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        e.path().extension().and_then(|x| x.to_str()) == Some(ENTRY_EXT)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

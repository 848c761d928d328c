//! Per-directory sidecar hash files.
//!
//! Every processed directory carries a hidden `.md5_hashes.txt` listing
//! `<filename>: <hex digest>` for each regular file directly in it (never
//! subdirectories, never the sidecar itself). The sidecar is the durable
//! pre-copy inventory the verified-move pipeline checks against after a
//! copy, and the unit of crash recovery for tree hashing: a directory's
//! sidecar always holds either the fully-previous or the fully-new set of
//! hashes, enforced by writing to a temp file and renaming over the target.

use crate::checksums::{compute_file_digest, ChecksumAlgorithm, Digest};
use crate::error::EngineError;
use log::{debug, info};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the per-directory sidecar hash file.
pub const SIDECAR_FILENAME: &str = ".md5_hashes.txt";

const SIDECAR_TMP_FILENAME: &str = ".md5_hashes.txt.tmp";

const SIDECAR_LOCK_FILENAME: &str = ".md5_hashes.lock";

/// Path of the sidecar file for a directory.
pub fn sidecar_path(dir: &Path) -> PathBuf {
    dir.join(SIDECAR_FILENAME)
}

/// True for the sidecar file itself, its in-flight temp twin and the lock
/// file; these are never hashed and never listed.
pub fn is_sidecar_artifact(file_name: &str) -> bool {
    file_name == SIDECAR_FILENAME
        || file_name == SIDECAR_TMP_FILENAME
        || file_name == SIDECAR_LOCK_FILENAME
}

/// Advisory lock file held while a directory's sidecar is being rewritten.
///
/// Created with `create_new` so acquisition is atomic across processes: a
/// second engine touching the same directory gets [`EngineError::Locked`]
/// instead of interleaving writes. Removed when the guard is dropped.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Lock a directory against concurrent sidecar mutation.
    pub fn acquire(dir: &Path) -> Result<Self, EngineError> {
        Self::acquire_path(dir.join(SIDECAR_LOCK_FILENAME))
    }

    /// Lock an arbitrary path. The file must not already exist.
    pub(crate) fn acquire_path(path: PathBuf) -> Result<Self, EngineError> {
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(DirLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(EngineError::Locked { path })
            }
            Err(e) => Err(EngineError::WriteError { path, source: e }),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Ordered `filename -> digest` mapping for one directory.
///
/// Insertion order is preserved so a rewritten sidecar file keeps a stable,
/// diffable layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarFile {
    entries: Vec<(String, Digest)>,
}

impl SidecarFile {
    pub fn new() -> Self {
        SidecarFile::default()
    }

    /// Look up the recorded digest for a filename.
    pub fn get(&self, name: &str) -> Option<&Digest> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace an entry. Replacement keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, digest: Digest) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = digest;
        } else {
            self.entries.push((name, digest));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Digest)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }
}

/// Load the expected hashes for a directory.
///
/// An absent sidecar file yields an empty mapping; whether that absence is
/// a problem is decided by the caller (validation treats a non-empty
/// directory without a sidecar as missing inventory).
pub fn load_expected(dir: &Path) -> Result<SidecarFile, EngineError> {
    let path = sidecar_path(dir);
    if !path.exists() {
        return Ok(SidecarFile::new());
    }
    let text = fs::read_to_string(&path).map_err(|e| EngineError::ReadError {
        path: path.clone(),
        source: e,
    })?;

    let mut sidecar = SidecarFile::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        // Filenames can themselves contain ": "; the hex digest cannot,
        // so the last separator wins.
        let (name, hex) = line
            .rsplit_once(": ")
            .ok_or_else(|| EngineError::SidecarParse {
                path: path.clone(),
                line: idx + 1,
            })?;
        sidecar.insert(name, Digest::from_hex(hex));
    }
    Ok(sidecar)
}

/// Overwrite the sidecar file for a directory atomically.
///
/// Writes to a temp file in the same directory and renames it over the
/// target, so a reader never observes a half-written sidecar. No-op for an
/// empty mapping.
pub fn write_all(dir: &Path, hashes: &SidecarFile) -> Result<(), EngineError> {
    if hashes.is_empty() {
        return Ok(());
    }
    let tmp_path = dir.join(SIDECAR_TMP_FILENAME);
    let mut tmp = fs::File::create(&tmp_path).map_err(|e| EngineError::WriteError {
        path: tmp_path.clone(),
        source: e,
    })?;
    for (name, digest) in hashes.iter() {
        writeln!(tmp, "{}: {}", name, digest).map_err(|e| EngineError::WriteError {
            path: tmp_path.clone(),
            source: e,
        })?;
    }
    drop(tmp);

    let path = sidecar_path(dir);
    fs::rename(&tmp_path, &path).map_err(|e| EngineError::WriteError {
        path,
        source: e,
    })
}

/// Append a single `name: digest` line to a directory's sidecar file.
/// Used for incremental backfill of missing hashes without a full rewrite.
pub fn append_one(dir: &Path, name: &str, digest: &Digest) -> Result<(), EngineError> {
    let path = sidecar_path(dir);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| EngineError::WriteError {
            path: path.clone(),
            source: e,
        })?;
    writeln!(file, "{}: {}", name, digest).map_err(|e| EngineError::WriteError {
        path,
        source: e,
    })
}

/// Counters accumulated while hashing a tree or directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeHashStats {
    pub files: u64,
    pub bytes: u64,
}

/// Hash every regular file directly in `dir` and write the sidecar file.
///
/// With `overwrite` false, an already-existing sidecar is an error. Does not
/// descend into subdirectories. Holds the directory's lock file for the
/// duration; a second engine hashing the same directory fails with
/// [`EngineError::Locked`] instead of clobbering the first.
pub fn hash_dir(
    dir: &Path,
    algorithm: ChecksumAlgorithm,
    overwrite: bool,
) -> Result<TreeHashStats, EngineError> {
    let _lock = DirLock::acquire(dir)?;
    if !overwrite && sidecar_path(dir).exists() {
        return Err(EngineError::SidecarExists {
            path: sidecar_path(dir),
        });
    }

    let mut hashes = SidecarFile::new();
    let mut stats = TreeHashStats::default();
    for name in regular_file_names(dir)? {
        let file_path = dir.join(&name);
        let size = fs::metadata(&file_path)
            .map_err(|e| EngineError::ReadError {
                path: file_path.clone(),
                source: e,
            })?
            .len();
        let digest = compute_file_digest(&file_path, algorithm)?;
        hashes.insert(name, digest);
        stats.files += 1;
        stats.bytes += size;
    }

    write_all(dir, &hashes)?;
    debug!(
        "hashed {} file(s), {} byte(s) in {}",
        stats.files,
        stats.bytes,
        dir.display()
    );
    Ok(stats)
}

/// Hash the whole tree under `root`: one sidecar file per directory,
/// covering that directory's own files only.
pub fn hash_tree(
    root: &Path,
    algorithm: ChecksumAlgorithm,
    overwrite: bool,
) -> Result<TreeHashStats, EngineError> {
    let mut stats = TreeHashStats::default();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(walk_error(root))?;
        if entry.file_type().is_dir() {
            let dir_stats = hash_dir(entry.path(), algorithm, overwrite)?;
            stats.files += dir_stats.files;
            stats.bytes += dir_stats.bytes;
        }
    }
    info!(
        "wrote sidecar hashes under {}: {} file(s), {} byte(s)",
        root.display(),
        stats.files,
        stats.bytes
    );
    Ok(stats)
}

/// Lazy iterator over absolute paths of files lacking a sidecar entry.
///
/// Walks the tree directory by directory; on the first encounter of a
/// non-empty directory without a sidecar file, an empty one is created so a
/// later pass can tell "partially hashed" from "never visited". Each call to
/// [`find_missing`] re-walks from scratch.
pub struct MissingHashes {
    root: PathBuf,
    walker: walkdir::IntoIter,
    queue: VecDeque<PathBuf>,
}

impl Iterator for MissingHashes {
    type Item = Result<PathBuf, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(path) = self.queue.pop_front() {
                return Some(Ok(path));
            }
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(walk_error(&self.root)(e))),
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            match missing_in_dir(entry.path()) {
                Ok(missing) => self.queue.extend(missing),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Start a missing-hash scan of the tree under `root`.
pub fn find_missing(root: &Path) -> MissingHashes {
    MissingHashes {
        root: root.to_path_buf(),
        walker: WalkDir::new(root).into_iter(),
        queue: VecDeque::new(),
    }
}

/// Hash and append every file reported missing by [`find_missing`].
/// Returns the number of entries added.
pub fn backfill_missing(root: &Path, algorithm: ChecksumAlgorithm) -> Result<u64, EngineError> {
    let mut added = 0;
    for path in find_missing(root) {
        let path = path?;
        let parent = path.parent().ok_or_else(|| EngineError::Unknown {
            message: format!("file has no parent directory: {}", path.display()),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::Unknown {
                message: format!("file has no name: {}", path.display()),
            })?;
        let digest = compute_file_digest(&path, algorithm)?;
        let _lock = DirLock::acquire(parent)?;
        append_one(parent, &name, &digest)?;
        added += 1;
    }
    info!("backfilled {} missing hash(es) under {}", added, root.display());
    Ok(added)
}

fn missing_in_dir(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let names = regular_file_names(dir)?;
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let path = sidecar_path(dir);
    if !path.exists() {
        // Marker for subsequent passes: this directory has been seen but
        // holds no hashes yet.
        fs::File::create(&path).map_err(|e| EngineError::WriteError {
            path: path.clone(),
            source: e,
        })?;
    }
    let known = load_expected(dir)?;

    Ok(names
        .into_iter()
        .filter(|name| !known.contains(name))
        .map(|name| dir.join(name))
        .collect())
}

/// Names of regular files directly in `dir`, sidecar artifacts excluded,
/// sorted for stable ordering.
pub fn regular_file_names(dir: &Path) -> Result<Vec<String>, EngineError> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let file_type = entry.file_type().map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_sidecar_artifact(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn walk_error(root: &Path) -> impl Fn(walkdir::Error) -> EngineError {
    let root = root.to_path_buf();
    move |e| {
        let path = e
            .path()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| root.clone());
        let source = e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
        EngineError::EnumerationFailed { path, source }
    }
}

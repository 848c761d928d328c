//! Resumable whole-tree checksum snapshots.
//!
//! A snapshot is one persisted record covering a full hashing pass over a
//! directory tree. Its lifecycle is strictly ordered and never regresses:
//!
//! `Init` (nothing enumerated) -> `FileList` (every file listed with a
//! pending digest) -> `InProgress` (some digests resolved, checkpointed) ->
//! `Done` (all resolved, renamed to a numbered, dated history file).
//!
//! Between checkpoints the persisted in-progress file is the sole source of
//! truth: a fresh process resumes from it after a crash and re-hashes only
//! the entries still pending. Mutual exclusion is a separate lock file held
//! for the engine's whole lifetime, so a second engine pointed at the same
//! history directory fails fast instead of racing the first. The marker file
//! alone cannot serve as the lock: it must survive a crash to allow resuming,
//! while the lock must not.

use crate::checksums::{compute_file_digest, ChecksumAlgorithm, Digest};
use crate::error::EngineError;
use crate::history::{self, IN_PROGRESS_FILENAME, SNAPSHOT_SUFFIX};
use crate::sidecar::{is_sidecar_artifact, DirLock};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Default checkpoint threshold: persist after each gigabyte of hashed data.
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 1024 * 1024 * 1024;

/// On-disk sentinel for a file that is listed but not yet hashed.
const PENDING_SENTINEL: &str = "xxx";

/// Lock file guarding a history directory against concurrent engines.
/// Starts with a non-digit so it never counts as a numbered snapshot.
const LOCK_FILENAME: &str = "xxxx-inprogress.lock";

/// Snapshot lifecycle state. Ordered; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SnapshotStatus {
    #[serde(rename = "INIT")]
    Init,
    #[serde(rename = "FILE_LIST")]
    FileList,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "DONE")]
    Done,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::FileList => "FILE_LIST",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

/// Digest slot for one file in the snapshot: either resolved or still
/// pending. Persisted as the hex digest or the `"xxx"` sentinel for
/// compatibility with existing history files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestEntry {
    Pending,
    Done(Digest),
}

impl DigestEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self, DigestEntry::Pending)
    }

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            DigestEntry::Pending => None,
            DigestEntry::Done(d) => Some(d),
        }
    }
}

impl Serialize for DigestEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DigestEntry::Pending => serializer.serialize_str(PENDING_SENTINEL),
            DigestEntry::Done(digest) => digest.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DigestEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        if value == PENDING_SENTINEL {
            Ok(DigestEntry::Pending)
        } else {
            Ok(DigestEntry::Done(Digest::from_hex(value)))
        }
    }
}

/// Construction-time configuration for a snapshot engine. Passed explicitly
/// so independent engines (and tests) never share process-wide state.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Directory holding finished snapshots and the in-progress marker
    pub history_dir: PathBuf,
    /// Digest algorithm used for every file in the run
    pub algorithm: ChecksumAlgorithm,
    /// Cumulative hashed bytes between persisted checkpoints
    pub checkpoint_bytes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            history_dir: PathBuf::from("system").join("checksum_snapshots"),
            algorithm: ChecksumAlgorithm::Md5,
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
        }
    }
}

/// The persisted snapshot record. Field names and value formats match the
/// existing history files byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    file_name: String,
    status: SnapshotStatus,
    #[serde(default)]
    nroffiles: u64,
    #[serde(default)]
    totalbytes: String,
    #[serde(default)]
    runtime: f64,
    #[serde(rename = "runtime seconds", default)]
    runtime_seconds: String,
    #[serde(default)]
    files: BTreeMap<String, DigestEntry>,
}

/// Result of one `run()` invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Files hashed during this invocation (not counting resumed entries)
    pub files_hashed: u64,
    /// Bytes hashed during this invocation
    pub bytes_hashed: u64,
    /// Total runtime across all checkpointed segments, in seconds
    pub runtime: f64,
    /// Files that disappeared or failed to read; removed from the inventory
    /// and reported here instead of aborting the run
    pub failures: Vec<(String, String)>,
    /// Path of the finished, numbered snapshot file
    pub final_path: Option<PathBuf>,
}

/// Builds and persists a resumable digest inventory of a directory tree.
pub struct ChecksumSnapshotEngine {
    config: SnapshotConfig,
    record: SnapshotRecord,
    /// Cumulative hashed bytes across all runs of this snapshot
    total_bytes: u64,
    /// Held for the engine's lifetime; released on drop
    _lock: DirLock,
}

impl ChecksumSnapshotEngine {
    /// Load the persisted in-progress snapshot if one exists, otherwise
    /// start a fresh one at `Init`.
    ///
    /// Acquires the history directory's lock file first; a second engine on
    /// the same directory gets [`EngineError::Locked`] until the first is
    /// dropped.
    pub fn resume_or_start(config: SnapshotConfig) -> Result<Self, EngineError> {
        fs::create_dir_all(&config.history_dir).map_err(|e| {
            EngineError::DirectoryCreationFailed {
                path: config.history_dir.clone(),
                source: e,
            }
        })?;
        let lock = DirLock::acquire_path(config.history_dir.join(LOCK_FILENAME))?;

        let marker = config.history_dir.join(IN_PROGRESS_FILENAME);
        let record = if marker.exists() {
            let text = fs::read_to_string(&marker).map_err(|e| EngineError::ReadError {
                path: marker.clone(),
                source: e,
            })?;
            let record: SnapshotRecord =
                serde_json::from_str(&text).map_err(|e| EngineError::SnapshotCorrupt {
                    path: marker.clone(),
                    reason: e.to_string(),
                })?;
            info!(
                "resuming snapshot from {} (status {}, {} file(s))",
                marker.display(),
                record.status,
                record.files.len()
            );
            record
        } else {
            SnapshotRecord {
                file_name: path_key(&marker),
                status: SnapshotStatus::Init,
                nroffiles: 0,
                totalbytes: "0".to_string(),
                runtime: 0.0,
                runtime_seconds: history::format_runtime(0.0),
                files: BTreeMap::new(),
            }
        };

        // The byte counter seeds every later checkpoint; a marker that
        // cannot supply it is corrupt, not zero
        let cleaned = record.totalbytes.replace('\'', "");
        let total_bytes = if cleaned.is_empty() {
            0
        } else {
            cleaned.parse().map_err(|e| EngineError::SnapshotCorrupt {
                path: marker.clone(),
                reason: format!("unparseable totalbytes {:?}: {}", record.totalbytes, e),
            })?
        };
        Ok(ChecksumSnapshotEngine {
            config,
            record,
            total_bytes,
            _lock: lock,
        })
    }

    pub fn status(&self) -> SnapshotStatus {
        self.record.status
    }

    /// Number of files listed in the snapshot.
    pub fn file_count(&self) -> usize {
        self.record.files.len()
    }

    /// Number of files still awaiting a digest.
    pub fn pending_count(&self) -> usize {
        self.record.files.values().filter(|e| e.is_pending()).count()
    }

    /// Look up the entry for an absolute file path.
    pub fn entry(&self, path: &Path) -> Option<&DigestEntry> {
        self.record.files.get(&path_key(path))
    }

    /// Path of the in-progress marker for this engine's history directory.
    pub fn in_progress_path(&self) -> PathBuf {
        self.config.history_dir.join(IN_PROGRESS_FILENAME)
    }

    /// Walk the entire tree once and list every file with a pending digest,
    /// then transition to `FileList` and persist immediately.
    ///
    /// Only valid from `Init`; a no-op in any later state, so a resume after
    /// a crash mid-enumeration restarts enumeration from scratch while a
    /// resume after a completed enumeration never double-enumerates.
    pub fn enumerate(&mut self, root: &Path) -> Result<(), EngineError> {
        if self.record.status != SnapshotStatus::Init {
            debug!(
                "enumerate skipped: snapshot already at {}",
                self.record.status
            );
            return Ok(());
        }
        if !root.exists() {
            return Err(EngineError::PathNotFound {
                path: root.to_path_buf(),
            });
        }
        if !root.is_dir() {
            return Err(EngineError::NotADirectory {
                path: root.to_path_buf(),
            });
        }

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_sidecar_artifact(&name) {
                continue;
            }
            self.record
                .files
                .insert(path_key(entry.path()), DigestEntry::Pending);
        }

        self.record.status = SnapshotStatus::FileList;
        self.record.file_name = path_key(&self.in_progress_path());
        self.persist_in_progress()?;
        info!(
            "enumerated {} file(s) under {}",
            self.record.files.len(),
            root.display()
        );
        Ok(())
    }

    /// Hash every still-pending entry, checkpointing the snapshot after each
    /// `checkpoint_bytes` of processed data. Entries already resolved by a
    /// previous run are never re-hashed.
    ///
    /// A file that disappears between enumeration and hashing is dropped
    /// from the inventory and reported in the summary; the run continues.
    ///
    /// On completion the snapshot is persisted under its final numbered,
    /// dated filename and the in-progress marker is removed.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        match self.record.status {
            SnapshotStatus::Init => {
                return Err(EngineError::InvalidState {
                    reason: "snapshot has no file list yet; call enumerate() first".to_string(),
                })
            }
            SnapshotStatus::Done => {
                return Err(EngineError::InvalidState {
                    reason: "snapshot is already complete".to_string(),
                })
            }
            SnapshotStatus::FileList | SnapshotStatus::InProgress => {}
        }

        let mut summary = RunSummary::default();
        let mut segment_start = Instant::now();
        let mut bytes_since_checkpoint = 0u64;

        let pending: Vec<String> = self
            .record
            .files
            .iter()
            .filter(|(_, e)| e.is_pending())
            .map(|(k, _)| k.clone())
            .collect();
        debug!(
            "{} pending of {} listed file(s)",
            pending.len(),
            self.record.files.len()
        );

        for key in pending {
            let path = PathBuf::from(&key);
            let size = match fs::metadata(&path) {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("listed file unreadable, dropping from snapshot: {}: {}", key, e);
                    self.record.files.remove(&key);
                    summary.failures.push((key, e.to_string()));
                    continue;
                }
            };
            let digest = match compute_file_digest(&path, self.config.algorithm) {
                Ok(d) => d,
                Err(e) => {
                    warn!("hashing failed, dropping from snapshot: {}: {}", key, e);
                    self.record.files.remove(&key);
                    summary.failures.push((key, e.to_string()));
                    continue;
                }
            };

            self.record.files.insert(key, DigestEntry::Done(digest));
            self.total_bytes += size;
            bytes_since_checkpoint += size;
            summary.files_hashed += 1;
            summary.bytes_hashed += size;

            if bytes_since_checkpoint >= self.config.checkpoint_bytes {
                self.fold_runtime(&mut segment_start);
                self.record.status = SnapshotStatus::InProgress;
                self.sync_counters();
                self.persist_in_progress()?;
                bytes_since_checkpoint = 0;
                debug!(
                    "checkpoint persisted: {} file(s) resolved, {} byte(s) total",
                    self.record.nroffiles, self.total_bytes
                );
            }
        }

        self.fold_runtime(&mut segment_start);

        let final_name =
            history::next_snapshot_filename(&self.config.history_dir, SNAPSHOT_SUFFIX)?;
        let final_path = self.config.history_dir.join(&final_name);
        self.record.status = SnapshotStatus::Done;
        self.record.file_name = path_key(&final_path);
        self.sync_counters();
        history::write_json_atomic(&final_path, &self.record)?;

        let marker = self.in_progress_path();
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| EngineError::WriteError {
                path: marker.clone(),
                source: e,
            })?;
            debug!("in-progress file {} removed", marker.display());
        }

        summary.runtime = self.record.runtime;
        summary.final_path = Some(final_path.clone());
        info!(
            "snapshot complete: {} file(s), {} byte(s), {} failure(s) -> {}",
            self.record.nroffiles,
            self.record.totalbytes,
            summary.failures.len(),
            final_path.display()
        );
        Ok(summary)
    }

    fn fold_runtime(&mut self, segment_start: &mut Instant) {
        self.record.runtime += segment_start.elapsed().as_secs_f64();
        self.record.runtime_seconds = history::format_runtime(self.record.runtime);
        *segment_start = Instant::now();
    }

    fn sync_counters(&mut self) {
        self.record.nroffiles = self
            .record
            .files
            .values()
            .filter(|e| !e.is_pending())
            .count() as u64;
        self.record.totalbytes = history::group_digits(self.total_bytes);
    }

    fn persist_in_progress(&self) -> Result<(), EngineError> {
        history::write_json_atomic(&self.in_progress_path(), &self.record)
    }
}

/// Snapshot keys are absolute paths with forward-slash separators, matching
/// the existing history files.
fn path_key(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '\\' {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

fn walk_error(root: &Path, e: walkdir::Error) -> EngineError {
    let path = e
        .path()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());
    let source = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
    EngineError::EnumerationFailed { path, source }
}

//! Directory-structure snapshots: a flat listing of every directory and
//! file under a root, persisted to the history directory for later
//! added/removed comparisons.
//!
//! Unlike the checksum snapshot this records no digests, only shape: which
//! paths exist and how large the files are. Capturing one is cheap enough
//! to run on every maintenance pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::history::{self, SNAPSHOT_SUFFIX};
use crate::sidecar::is_sidecar_artifact;

/// One element of the structure listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Element {
    #[serde(rename = "DIR")]
    Dir {
        path: String,
        /// Number of regular files directly in this directory
        nrof_files: u64,
    },
    #[serde(rename = "FILE")]
    File {
        path: String,
        /// Size in bytes, digit-grouped for readability
        file_length: String,
    },
}

impl Element {
    pub fn path(&self) -> &str {
        match self {
            Element::Dir { path, .. } => path,
            Element::File { path, .. } => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Element::Dir { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StructureRecord {
    elements: Vec<Element>,
    #[serde(default)]
    runtime: String,
    #[serde(default)]
    total_byte_size: String,
}

/// Where structure snapshots are kept.
#[derive(Debug, Clone)]
pub struct StructureConfig {
    pub history_dir: PathBuf,
}

impl Default for StructureConfig {
    fn default() -> Self {
        StructureConfig {
            history_dir: PathBuf::from("system").join("directorystructure_snapshots"),
        }
    }
}

/// Totals from a capture pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureStats {
    pub dirs: u64,
    pub files: u64,
    pub bytes: u64,
}

/// A captured or loaded directory-structure snapshot.
pub struct DirectorySnapshot {
    config: StructureConfig,
    record: StructureRecord,
}

impl DirectorySnapshot {
    pub fn new(config: StructureConfig) -> Self {
        DirectorySnapshot {
            config,
            record: StructureRecord::default(),
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.record.elements
    }

    pub fn contains(&self, path: &str) -> bool {
        self.record.elements.iter().any(|el| el.path() == path)
    }

    /// Walk `root` and record one `DIR` element per directory followed by a
    /// `FILE` element per regular file in it, sidecar files excluded.
    pub fn capture(&mut self, root: &Path) -> Result<CaptureStats, EngineError> {
        if !root.exists() {
            return Err(EngineError::PathNotFound {
                path: root.to_path_buf(),
            });
        }
        let start = std::time::Instant::now();
        let mut stats = CaptureStats::default();
        self.record.elements.clear();

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();
            let files = listed_file_names(dir)?;
            self.record.elements.push(Element::Dir {
                path: posix_key(dir),
                nrof_files: files.len() as u64,
            });
            stats.dirs += 1;

            for name in files {
                let file_path = dir.join(&name);
                let bytes = fs::metadata(&file_path)
                    .map_err(|e| EngineError::ReadError {
                        path: file_path.clone(),
                        source: e,
                    })?
                    .len();
                self.record.elements.push(Element::File {
                    path: posix_key(&file_path),
                    file_length: history::group_digits(bytes),
                });
                stats.files += 1;
                stats.bytes += bytes;
            }
        }

        let runtime = start.elapsed().as_secs_f64();
        self.record.runtime = format!("{}.{:03}", runtime as u64, (runtime.fract() * 1000.0) as u64);
        self.record.total_byte_size = history::group_digits(stats.bytes);
        info!(
            "structure snapshot of {}: {} dir(s), {} file(s), {} byte(s)",
            root.display(),
            stats.dirs,
            stats.files,
            stats.bytes
        );
        Ok(stats)
    }

    /// Persist under the next numbered, dated filename in the history
    /// directory. Returns the path written.
    pub fn save(&self) -> Result<PathBuf, EngineError> {
        fs::create_dir_all(&self.config.history_dir).map_err(|e| {
            EngineError::DirectoryCreationFailed {
                path: self.config.history_dir.clone(),
                source: e,
            }
        })?;
        let name = history::next_snapshot_filename(&self.config.history_dir, SNAPSHOT_SUFFIX)?;
        let path = self.config.history_dir.join(name);
        history::write_json_atomic(&path, &self.record)?;
        Ok(path)
    }

    /// Load the snapshot with the given sequence number.
    pub fn load(config: StructureConfig, number: u32) -> Result<Self, EngineError> {
        let name = history::snapshot_filename_for(&config.history_dir, number, SNAPSHOT_SUFFIX)?
            .ok_or_else(|| EngineError::PathNotFound {
                path: config.history_dir.join(format!("{:04}-*{}", number, SNAPSHOT_SUFFIX)),
            })?;
        Self::load_file(config, &name)
    }

    /// Load the newest snapshot in the history directory.
    pub fn load_latest(config: StructureConfig) -> Result<Self, EngineError> {
        let name = history::last_snapshot_filename(&config.history_dir, SNAPSHOT_SUFFIX)?
            .ok_or_else(|| EngineError::PathNotFound {
                path: config.history_dir.clone(),
            })?;
        Self::load_file(config, &name)
    }

    fn load_file(config: StructureConfig, name: &str) -> Result<Self, EngineError> {
        let path = config.history_dir.join(name);
        let text = fs::read_to_string(&path).map_err(|e| EngineError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        let record = serde_json::from_str(&text).map_err(|e| EngineError::SnapshotCorrupt {
            path,
            reason: e.to_string(),
        })?;
        Ok(DirectorySnapshot { config, record })
    }

    /// Paths present in `self` but not in `older` are `'+'`; paths present
    /// in `older` but not in `self` are `'-'`. Unchanged paths are omitted.
    pub fn diff(&self, older: &DirectorySnapshot) -> BTreeMap<String, char> {
        let mut changes = BTreeMap::new();
        for el in self.elements() {
            if !older.contains(el.path()) {
                changes.insert(el.path().to_string(), '+');
            }
        }
        for el in older.elements() {
            if !self.contains(el.path()) {
                changes.insert(el.path().to_string(), '-');
            }
        }
        changes
    }
}

/// File names in `dir`, sidecar artifacts excluded, sorted.
fn listed_file_names(dir: &Path) -> Result<Vec<String>, EngineError> {
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
        let file_type = entry.file_type().map_err(|e| EngineError::ReadError {
            path: entry.path(),
            source: e,
        })?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_sidecar_artifact(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn posix_key(path: &Path) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::SIDECAR_FILENAME;

    fn make_tree(root: &Path) {
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"aaaa").unwrap();
        fs::write(root.join("sub/b.txt"), vec![0u8; 1500]).unwrap();
        fs::write(root.join(SIDECAR_FILENAME), b"a.txt: 0\n").unwrap();
    }

    fn config_for(dir: &Path) -> StructureConfig {
        StructureConfig {
            history_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_capture_lists_dirs_then_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("data");
        make_tree(&root);

        let mut snap = DirectorySnapshot::new(config_for(&temp_dir.path().join("hist")));
        let stats = snap.capture(&root).expect("capture failed");

        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 1504);

        // First element is the root directory, sidecar excluded from counts
        match &snap.elements()[0] {
            Element::Dir { nrof_files, .. } => assert_eq!(*nrof_files, 1),
            other => panic!("expected DIR first, got {:?}", other),
        }
        // File sizes are digit-grouped
        assert!(snap.elements().iter().any(|el| matches!(
            el,
            Element::File { file_length, .. } if file_length == "1'500"
        )));
        assert!(!snap
            .elements()
            .iter()
            .any(|el| el.path().ends_with(SIDECAR_FILENAME)));
    }

    #[test]
    fn test_save_and_load_latest_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("data");
        let hist = temp_dir.path().join("hist");
        make_tree(&root);

        let mut snap = DirectorySnapshot::new(config_for(&hist));
        snap.capture(&root).expect("capture failed");
        let path = snap.save().expect("save failed");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("0001-"));

        let loaded = DirectorySnapshot::load_latest(config_for(&hist)).expect("load failed");
        assert_eq!(loaded.elements(), snap.elements());
    }

    #[test]
    fn test_load_by_sequence_number() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("data");
        let hist = temp_dir.path().join("hist");
        make_tree(&root);

        for _ in 0..2 {
            let mut snap = DirectorySnapshot::new(config_for(&hist));
            snap.capture(&root).expect("capture failed");
            snap.save().expect("save failed");
        }

        let first = DirectorySnapshot::load(config_for(&hist), 1).expect("load failed");
        assert!(!first.elements().is_empty());
        assert!(matches!(
            DirectorySnapshot::load(config_for(&hist), 9),
            Err(EngineError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_diff_reports_added_and_removed_paths() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("data");
        let hist = temp_dir.path().join("hist");
        make_tree(&root);

        let mut older = DirectorySnapshot::new(config_for(&hist));
        older.capture(&root).expect("capture failed");

        fs::remove_file(root.join("a.txt")).unwrap();
        fs::write(root.join("sub/new.txt"), b"fresh").unwrap();

        let mut newer = DirectorySnapshot::new(config_for(&hist));
        newer.capture(&root).expect("capture failed");

        let changes = newer.diff(&older);
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes.get(&posix_key(&root.join("sub/new.txt"))),
            Some(&'+')
        );
        assert_eq!(changes.get(&posix_key(&root.join("a.txt"))), Some(&'-'));
    }
}

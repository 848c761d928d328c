//! Verified tree relocation: hash, copy, validate, then delete.
//!
//! A [`VerifiedMover`] drives one job through its lifecycle. The ordering
//! guarantees are strict:
//!
//! - nothing is written anywhere until `precheck` has passed with zero
//!   destination collisions
//! - the source is hashed in full before the first byte is copied, so the
//!   inventories carried to the destination describe the pre-copy state
//! - the source is deleted only after the caller has seen the validation
//!   report; a dirty report makes `delete_source` refuse unless forced

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{info, warn};
use walkdir::WalkDir;

use crate::checksums::{compute_file_digest, ChecksumAlgorithm};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{Mismatch, MoveState, TransferJob, ValidationReport};
use crate::progress::MoveProgress;
use crate::sidecar;

/// Executes one verified move from a source directory into a destination
/// directory. Methods must be called in lifecycle order; calling one out of
/// turn is an [`EngineError::InvalidState`].
pub struct VerifiedMover {
    job: TransferJob,
}

impl VerifiedMover {
    pub fn new(source: PathBuf, destination: PathBuf, algorithm: ChecksumAlgorithm) -> Self {
        VerifiedMover {
            job: TransferJob::new(source, destination, algorithm),
        }
    }

    pub fn job(&self) -> &TransferJob {
        &self.job
    }

    pub fn state(&self) -> MoveState {
        self.job.state
    }

    /// Verify preconditions without touching anything.
    ///
    /// Both paths must exist and be directories, and no immediate child of
    /// the source may share a name with an entry already in the destination.
    /// Any collision aborts the job with the full conflict list; the
    /// destination is left byte-identical to its pre-call state.
    pub fn precheck(&mut self) -> Result<(), EngineError> {
        self.expect_state(MoveState::Precheck, "precheck")?;
        self.job.start_time = Some(SystemTime::now());

        if let Err(e) = check_directory(&self.job.source_path)
            .and_then(|_| check_directory(&self.job.destination_path))
        {
            return Err(self.abort(e));
        }

        let source_children = match fs_ops::child_names(&self.job.source_path) {
            Ok(names) => names,
            Err(e) => return Err(self.abort(e)),
        };
        let conflicts: Vec<PathBuf> = source_children
            .iter()
            .filter(|name| self.job.destination_path.join(name).exists())
            .map(|name| self.job.destination_path.join(name))
            .collect();
        if !conflicts.is_empty() {
            warn!(
                "job {}: {} destination collision(s), aborting before any copy",
                self.job.id,
                conflicts.len()
            );
            return Err(self.abort(EngineError::DestinationConflict { conflicts }));
        }

        self.job.state = MoveState::HashingSource;
        Ok(())
    }

    /// Write a digest inventory into every directory of the source tree.
    ///
    /// Existing inventories are overwritten so the copy always carries
    /// digests of the bytes about to be transferred.
    pub fn hash_source(&mut self, progress: &dyn MoveProgress) -> Result<(), EngineError> {
        self.expect_state(MoveState::HashingSource, "hash_source")?;
        progress.on_phase_started(&self.job, MoveState::HashingSource);

        let stats = sidecar::hash_tree(&self.job.source_path, self.job.algorithm, true)?;
        info!(
            "job {}: hashed {} source file(s), {} byte(s)",
            self.job.id, stats.files, stats.bytes
        );

        self.job.state = MoveState::Copying;
        Ok(())
    }

    /// Copy every child of the source into the destination, inventories
    /// included, preserving file modification times.
    pub fn copy(&mut self, progress: &dyn MoveProgress) -> Result<(), EngineError> {
        self.expect_state(MoveState::Copying, "copy")?;
        progress.on_phase_started(&self.job, MoveState::Copying);

        let stats = fs_ops::copy_tree(
            &self.job.source_path,
            &self.job.destination_path,
            |path, bytes| progress.on_file_copied(path, bytes),
        )?;
        info!(
            "job {}: copied {} file(s), {} byte(s) to {}",
            self.job.id,
            stats.files,
            stats.bytes,
            self.job.destination_path.display()
        );

        self.job.state = MoveState::Validating;
        Ok(())
    }

    /// Re-hash the destination against the inventories carried by the copy.
    ///
    /// Walks every directory under the destination, loads its inventory and
    /// recomputes the digest of each listed file. Collected per file:
    /// a digest disagreement is a mismatch, an expected file that is absent
    /// is missing, and a file (or non-empty directory) with no inventory
    /// entry at all is reported separately. Unlisted files are expected when
    /// the destination held content before the move; they are reported but
    /// do not dirty the copy. The report is stored on the job; a clean
    /// report advances the state, a dirty one leaves the job in `Validating`
    /// so only an explicit force can reach deletion.
    pub fn validate(&mut self, progress: &dyn MoveProgress) -> Result<ValidationReport, EngineError> {
        self.expect_state(MoveState::Validating, "validate")?;
        progress.on_phase_started(&self.job, MoveState::Validating);

        let report = verify_tree(&self.job.destination_path, self.job.algorithm)?;

        if report.is_clean() {
            info!("job {}: validation clean, {}", self.job.id, report);
            if report.has_unlisted() {
                warn!(
                    "job {}: destination holds {} file(s) without inventory entry",
                    self.job.id,
                    report.missing_inventory.len()
                );
            }
            self.job.state = MoveState::DeletingSource;
        } else {
            warn!("job {}: validation dirty, {}", self.job.id, report);
        }
        self.job.validation = Some(report.clone());
        progress.on_validated(&self.job, &report);
        Ok(report)
    }

    /// Remove every immediate child of the source directory.
    ///
    /// Refused while the last validation report is dirty unless `force` is
    /// set; the caller, not the engine, owns the decision to discard source
    /// data in the face of mismatches.
    pub fn delete_source(
        &mut self,
        force: bool,
        progress: &dyn MoveProgress,
    ) -> Result<(), EngineError> {
        match self.job.state {
            MoveState::DeletingSource => {}
            MoveState::Validating if force => {
                warn!(
                    "job {}: deleting source despite dirty validation (forced)",
                    self.job.id
                );
            }
            MoveState::Validating => {
                let report = self.job.validation.as_ref();
                return Err(EngineError::ValidationFailed {
                    mismatches: report.map(|r| r.mismatches.len()).unwrap_or(0),
                    missing: report.map(|r| r.missing.len()).unwrap_or(0),
                    unlisted: report.map(|r| r.missing_inventory.len()).unwrap_or(0),
                });
            }
            other => {
                return Err(EngineError::InvalidState {
                    reason: format!("delete_source called in state {}", other),
                })
            }
        }
        progress.on_phase_started(&self.job, MoveState::DeletingSource);

        let removed = fs_ops::remove_children(&self.job.source_path)?;
        info!(
            "job {}: removed {} source item(s) from {}",
            self.job.id,
            removed.len(),
            self.job.source_path.display()
        );

        self.job.state = MoveState::Done;
        self.job.end_time = Some(SystemTime::now());
        progress.on_job_finished(&self.job);
        Ok(())
    }

    fn expect_state(&self, want: MoveState, operation: &str) -> Result<(), EngineError> {
        if self.job.state != want {
            return Err(EngineError::InvalidState {
                reason: format!(
                    "{} called in state {}, expected {}",
                    operation, self.job.state, want
                ),
            });
        }
        Ok(())
    }

    fn abort(&mut self, error: EngineError) -> EngineError {
        self.job.state = MoveState::Aborted;
        self.job.end_time = Some(SystemTime::now());
        let message = error.to_string();
        self.job.error = Some(EngineError::Unknown { message });
        error
    }
}

/// Re-hash every inventoried file under `root` and compare against the
/// recorded digests.
///
/// Continue-and-collect: the whole tree is always walked and every finding
/// is reported; nothing aborts at the first problem. Usable standalone for
/// auditing a tree in place, and by [`VerifiedMover::validate`] against a
/// freshly copied destination.
pub fn verify_tree(
    root: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ValidationReport, EngineError> {
    check_directory(root)?;

    let mut report = ValidationReport::default();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        verify_dir(entry.path(), algorithm, &mut report)?;
    }
    Ok(report)
}

fn verify_dir(
    dir: &Path,
    algorithm: ChecksumAlgorithm,
    report: &mut ValidationReport,
) -> Result<(), EngineError> {
    let expected = sidecar::load_expected(dir)?;
    let present = sidecar::regular_file_names(dir)?;

    if expected.is_empty() && !sidecar::sidecar_path(dir).exists() {
        // A non-empty directory with no inventory at all is unaccounted-for
        // data, not a silent pass
        for name in &present {
            report.missing_inventory.push(dir.join(name));
        }
        return Ok(());
    }

    for (name, expected_digest) in expected.iter() {
        let file_path = dir.join(name);
        if !file_path.exists() {
            report.missing.push(file_path);
            continue;
        }
        let actual = compute_file_digest(&file_path, algorithm)?;
        report.files_checked += 1;
        if &actual != expected_digest {
            report.mismatches.push(Mismatch {
                path: file_path,
                expected: expected_digest.clone(),
                actual,
            });
        }
    }

    for name in present {
        if !expected.contains(&name) {
            report.missing_inventory.push(dir.join(name));
        }
    }
    Ok(())
}

fn check_directory(path: &Path) -> Result<(), EngineError> {
    if !path.exists() {
        return Err(EngineError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    let metadata = fs::metadata(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_dir() {
        return Err(EngineError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(())
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
    use crate::progress::NoProgress;
    use crate::sidecar::SIDECAR_FILENAME;
    use std::collections::BTreeSet;

    fn make_source(root: &Path) -> PathBuf {
        let src = root.join("A");
        fs::create_dir_all(src.join("B")).unwrap();
        fs::write(src.join("f1"), b"first payload").unwrap();
        fs::write(src.join("B/f2"), b"second payload").unwrap();
        src
    }

    fn make_dest(root: &Path) -> PathBuf {
        let dst = root.join("Z");
        fs::create_dir(&dst).unwrap();
        dst
    }

    fn snapshot_tree(root: &Path) -> BTreeSet<(PathBuf, Vec<u8>)> {
        let mut set = BTreeSet::new();
        for entry in WalkDir::new(root) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                set.insert((
                    entry.path().to_path_buf(),
                    fs::read(entry.path()).unwrap(),
                ));
            }
        }
        set
    }

    #[test]
    fn test_full_move_empties_source_and_verifies_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());

        let mut mover =
            VerifiedMover::new(src.clone(), dst.clone(), ChecksumAlgorithm::Md5);
        mover.precheck().expect("precheck failed");
        mover.hash_source(&NoProgress).expect("hashing failed");
        mover.copy(&NoProgress).expect("copy failed");
        let report = mover.validate(&NoProgress).expect("validate failed");
        assert!(report.is_clean());
        assert_eq!(report.files_checked, 2);
        mover.delete_source(false, &NoProgress).expect("delete failed");

        assert_eq!(mover.state(), MoveState::Done);
        // Destination carries data and inventories
        assert!(dst.join("f1").exists());
        assert!(dst.join("B/f2").exists());
        assert!(dst.join(SIDECAR_FILENAME).exists());
        assert!(dst.join("B").join(SIDECAR_FILENAME).exists());
        // Source directory remains but is empty
        assert!(src.is_dir());
        assert_eq!(fs::read_dir(&src).unwrap().count(), 0);
    }

    #[test]
    fn test_precheck_collision_aborts_without_touching_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());
        fs::write(dst.join("f1"), b"already here").unwrap();

        let before = snapshot_tree(&dst);
        let mut mover = VerifiedMover::new(src, dst.clone(), ChecksumAlgorithm::Md5);
        let err = mover.precheck().expect_err("collision must fail precheck");

        match err {
            EngineError::DestinationConflict { conflicts } => {
                assert_eq!(conflicts, vec![dst.join("f1")]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(mover.state(), MoveState::Aborted);
        // Destination byte-identical to its pre-call state
        assert_eq!(snapshot_tree(&dst), before);
        // Lifecycle cannot be resumed past the abort
        assert!(matches!(
            mover.hash_source(&NoProgress),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_precheck_missing_source_aborts() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = make_dest(temp_dir.path());

        let mut mover = VerifiedMover::new(
            temp_dir.path().join("no-such-dir"),
            dst,
            ChecksumAlgorithm::Md5,
        );
        assert!(matches!(
            mover.precheck(),
            Err(EngineError::PathNotFound { .. })
        ));
        assert_eq!(mover.state(), MoveState::Aborted);
    }

    #[test]
    fn test_validate_reports_exactly_the_flipped_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());

        let mut mover = VerifiedMover::new(src, dst.clone(), ChecksumAlgorithm::Md5);
        mover.precheck().expect("precheck failed");
        mover.hash_source(&NoProgress).expect("hashing failed");
        mover.copy(&NoProgress).expect("copy failed");

        // Corrupt one destination file after the copy
        fs::write(dst.join("B/f2"), b"second paylo4d").unwrap();

        let report = mover.validate(&NoProgress).expect("validate failed");
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].path, dst.join("B/f2"));
        assert_ne!(
            report.mismatches[0].expected,
            report.mismatches[0].actual
        );
        assert!(report.missing.is_empty());
        assert!(report.missing_inventory.is_empty());
    }

    #[test]
    fn test_delete_refused_after_dirty_validation() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());

        let mut mover = VerifiedMover::new(src.clone(), dst.clone(), ChecksumAlgorithm::Md5);
        mover.precheck().expect("precheck failed");
        mover.hash_source(&NoProgress).expect("hashing failed");
        mover.copy(&NoProgress).expect("copy failed");

        fs::remove_file(dst.join("f1")).unwrap();
        let report = mover.validate(&NoProgress).expect("validate failed");
        assert_eq!(report.missing, vec![dst.join("f1")]);

        let err = mover
            .delete_source(false, &NoProgress)
            .expect_err("dirty validation must refuse deletion");
        assert!(matches!(
            err,
            EngineError::ValidationFailed { mismatches: 0, missing: 1, unlisted: 0 }
        ));
        // Source untouched
        assert!(src.join("f1").exists());

        // An explicit force overrides the refusal
        mover
            .delete_source(true, &NoProgress)
            .expect("forced delete failed");
        assert_eq!(mover.state(), MoveState::Done);
        assert_eq!(fs::read_dir(&src).unwrap().count(), 0);
    }

    #[test]
    fn test_validate_flags_files_without_inventory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());

        let mut mover = VerifiedMover::new(src, dst.clone(), ChecksumAlgorithm::Md5);
        mover.precheck().expect("precheck failed");
        mover.hash_source(&NoProgress).expect("hashing failed");
        mover.copy(&NoProgress).expect("copy failed");

        // A file that appeared at the destination after hashing
        fs::write(dst.join("B/stray"), b"untracked").unwrap();

        let report = mover.validate(&NoProgress).expect("validate failed");
        assert_eq!(report.missing_inventory, vec![dst.join("B/stray")]);
        assert!(report.has_unlisted());
        // Unlisted files are reported but do not dirty the copy
        assert!(report.is_clean());
        assert_eq!(mover.state(), MoveState::DeletingSource);
    }

    #[test]
    fn test_move_into_populated_destination_completes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());
        // Pre-existing destination content with no name collision
        fs::write(dst.join("resident"), b"was here first").unwrap();

        let mut mover = VerifiedMover::new(src.clone(), dst.clone(), ChecksumAlgorithm::Md5);
        mover.precheck().expect("precheck failed");
        mover.hash_source(&NoProgress).expect("hashing failed");
        mover.copy(&NoProgress).expect("copy failed");

        let report = mover.validate(&NoProgress).expect("validate failed");
        assert!(report.is_clean());
        assert_eq!(report.missing_inventory, vec![dst.join("resident")]);

        // The resident file must not block an unforced deletion
        mover.delete_source(false, &NoProgress).expect("delete failed");
        assert_eq!(mover.state(), MoveState::Done);
        assert_eq!(fs::read_dir(&src).unwrap().count(), 0);
        assert!(dst.join("resident").exists());
        assert!(dst.join("f1").exists());
    }

    #[test]
    fn test_verify_tree_standalone_audit() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        sidecar::hash_tree(&src, ChecksumAlgorithm::Md5, true).expect("hashing failed");

        let clean = verify_tree(&src, ChecksumAlgorithm::Md5).expect("verify failed");
        assert!(clean.is_clean());
        assert_eq!(clean.files_checked, 2);

        fs::write(src.join("f1"), b"tampered").unwrap();
        let dirty = verify_tree(&src, ChecksumAlgorithm::Md5).expect("verify failed");
        assert_eq!(dirty.mismatches.len(), 1);
        assert_eq!(dirty.mismatches[0].path, src.join("f1"));
    }

    #[test]
    fn test_operations_enforce_lifecycle_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = make_source(temp_dir.path());
        let dst = make_dest(temp_dir.path());

        let mut mover = VerifiedMover::new(src, dst, ChecksumAlgorithm::Md5);
        assert!(matches!(
            mover.copy(&NoProgress),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            mover.validate(&NoProgress),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            mover.delete_source(false, &NoProgress),
            Err(EngineError::InvalidState { .. })
        ));
    }
}

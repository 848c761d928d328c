//! Batch driver over a list of transfer jobs.
//!
//! Runs each `(source, destination)` pair through the full verified-move
//! pipeline. Failures are per-job and non-fatal: a precheck abort or an
//! integrity failure is recorded and the remaining jobs still run. Source
//! data is never deleted for a job whose validation was dirty; the report
//! surfaces that to the operator instead.

use std::path::PathBuf;

use log::{info, warn};

use crate::checksums::ChecksumAlgorithm;
use crate::config::TransferSpec;
use crate::error::EngineError;
use crate::model::ValidationReport;
use crate::mover::VerifiedMover;
use crate::progress::MoveProgress;

/// Terminal outcome of one job in a batch.
#[derive(Debug)]
pub enum JobOutcome {
    /// Moved, validated clean, source emptied
    Done { validation: ValidationReport },
    /// Precheck found name collisions; nothing was copied
    Conflicts { conflicts: Vec<PathBuf> },
    /// Copied but validation was dirty; source left in place
    IntegrityFailed { validation: ValidationReport },
    /// Stopped by an error elsewhere in the pipeline
    Errored { error: EngineError },
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }
}

/// One job's pairing and outcome.
#[derive(Debug)]
pub struct JobResult {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub outcome: JobOutcome,
}

/// Aggregate outcome of a whole batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.completed()
    }

    pub fn all_done(&self) -> bool {
        self.failed() == 0
    }
}

/// Run every transfer in order, collecting per-job outcomes.
pub fn run_batch(
    transfers: &[TransferSpec],
    algorithm: ChecksumAlgorithm,
    progress: &dyn MoveProgress,
) -> BatchReport {
    let mut report = BatchReport::default();
    for spec in transfers {
        info!(
            "transfer job: {} -> {}",
            spec.source.display(),
            spec.destination.display()
        );
        let outcome = run_one(spec, algorithm, progress);
        match &outcome {
            JobOutcome::Done { validation } => {
                info!("job done: {}", validation);
            }
            JobOutcome::Conflicts { conflicts } => {
                warn!("job skipped: {} destination collision(s)", conflicts.len());
            }
            JobOutcome::IntegrityFailed { validation } => {
                warn!("job kept source, validation dirty: {}", validation);
            }
            JobOutcome::Errored { error } => {
                warn!("job failed: {}", error);
            }
        }
        report.results.push(JobResult {
            source: spec.source.clone(),
            destination: spec.destination.clone(),
            outcome,
        });
    }
    info!(
        "batch finished: {} done, {} failed of {}",
        report.completed(),
        report.failed(),
        report.results.len()
    );
    report
}

fn run_one(
    spec: &TransferSpec,
    algorithm: ChecksumAlgorithm,
    progress: &dyn MoveProgress,
) -> JobOutcome {
    let mut mover = VerifiedMover::new(spec.source.clone(), spec.destination.clone(), algorithm);

    match mover.precheck() {
        Ok(()) => {}
        Err(EngineError::DestinationConflict { conflicts }) => {
            return JobOutcome::Conflicts { conflicts }
        }
        Err(error) => return JobOutcome::Errored { error },
    }
    if let Err(error) = mover.hash_source(progress) {
        return JobOutcome::Errored { error };
    }
    if let Err(error) = mover.copy(progress) {
        return JobOutcome::Errored { error };
    }
    let validation = match mover.validate(progress) {
        Ok(report) => report,
        Err(error) => return JobOutcome::Errored { error },
    };
    if !validation.is_clean() {
        // Policy: never discard source data over a dirty validation;
        // the operator decides what to do with it
        return JobOutcome::IntegrityFailed { validation };
    }
    if let Err(error) = mover.delete_source(false, progress) {
        return JobOutcome::Errored { error };
    }
    JobOutcome::Done { validation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MoveState, TransferJob};
    use crate::progress::NoProgress;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    fn make_job_dirs(root: &Path, name: &str) -> TransferSpec {
        let source = root.join(format!("src_{}", name));
        let destination = root.join(format!("dst_{}", name));
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&destination).unwrap();
        fs::write(source.join("payload.bin"), name.as_bytes()).unwrap();
        TransferSpec {
            source,
            destination,
        }
    }

    #[test]
    fn test_batch_moves_all_clean_jobs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let transfers = vec![
            make_job_dirs(temp_dir.path(), "one"),
            make_job_dirs(temp_dir.path(), "two"),
        ];

        let report = run_batch(&transfers, ChecksumAlgorithm::Md5, &NoProgress);
        assert_eq!(report.completed(), 2);
        assert!(report.all_done());

        for spec in &transfers {
            assert!(spec.destination.join("payload.bin").exists());
            assert_eq!(fs::read_dir(&spec.source).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_conflict_job_is_non_fatal_for_the_rest() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocked = make_job_dirs(temp_dir.path(), "blocked");
        fs::write(blocked.destination.join("payload.bin"), b"occupied").unwrap();
        let clean = make_job_dirs(temp_dir.path(), "clean");

        let transfers = vec![blocked.clone(), clean.clone()];
        let report = run_batch(&transfers, ChecksumAlgorithm::Md5, &NoProgress);

        assert_eq!(report.completed(), 1);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.results[0].outcome,
            JobOutcome::Conflicts { .. }
        ));
        // Blocked job's source untouched, destination content intact
        assert!(blocked.source.join("payload.bin").exists());
        assert_eq!(
            fs::read(blocked.destination.join("payload.bin")).unwrap(),
            b"occupied"
        );
        // The clean job still completed
        assert!(matches!(report.results[1].outcome, JobOutcome::Done { .. }));
        assert_eq!(fs::read_dir(&clean.source).unwrap().count(), 0);
    }

    /// Corrupts a destination file the moment validation begins, modelling
    /// bit rot between copy and verification.
    struct CorruptOnValidate {
        target: Mutex<Option<std::path::PathBuf>>,
    }

    impl MoveProgress for CorruptOnValidate {
        fn on_phase_started(&self, _job: &TransferJob, phase: MoveState) {
            if phase == MoveState::Validating {
                if let Some(path) = self.target.lock().unwrap().take() {
                    fs::write(path, b"rotten").unwrap();
                }
            }
        }
    }

    #[test]
    fn test_dirty_validation_keeps_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let spec = make_job_dirs(temp_dir.path(), "rot");
        let progress = CorruptOnValidate {
            target: Mutex::new(Some(spec.destination.join("payload.bin"))),
        };

        let report = run_batch(
            std::slice::from_ref(&spec),
            ChecksumAlgorithm::Md5,
            &progress,
        );

        assert_eq!(report.completed(), 0);
        match &report.results[0].outcome {
            JobOutcome::IntegrityFailed { validation } => {
                assert_eq!(validation.mismatches.len(), 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // Source survived the integrity failure
        assert!(spec.source.join("payload.bin").exists());
    }
}

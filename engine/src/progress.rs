//! Progress reporting trait.
//!
//! Decouples the move engine from any particular front end. The CLI
//! implements this for stdout output; all methods default to no-ops so
//! implementors subscribe only to the events they care about.

use std::path::Path;

use crate::model::{MoveState, TransferJob, ValidationReport};

/// Receives callbacks while a verified move executes.
///
/// All methods are called synchronously from the executing thread.
pub trait MoveProgress: Send {
    /// Called when the job enters a new lifecycle state.
    fn on_phase_started(&self, _job: &TransferJob, _phase: MoveState) {}

    /// Called after each source file has been hashed into its inventory.
    fn on_file_hashed(&self, _path: &Path) {}

    /// Called after each file has been copied to the destination.
    fn on_file_copied(&self, _path: &Path, _bytes: u64) {}

    /// Called once validation of the destination has finished.
    fn on_validated(&self, _job: &TransferJob, _report: &ValidationReport) {}

    /// Called when the job reaches a terminal state.
    fn on_job_finished(&self, _job: &TransferJob) {}
}

/// Progress sink that ignores every event.
pub struct NoProgress;

impl MoveProgress for NoProgress {}

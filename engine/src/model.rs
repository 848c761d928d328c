//! Core data model for verified moves.
//!
//! - `TransferJob`: one source-to-destination tree relocation
//! - `MoveState`: the job's forward-only lifecycle
//! - `ValidationReport` / `Mismatch`: the outcome of destination validation

use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

use crate::checksums::{ChecksumAlgorithm, Digest};

/// One tree relocation from a source directory to a destination directory.
///
/// A job tracks where it is in the move lifecycle and, after validation,
/// carries the report that decides whether the source may be deleted.
#[derive(Debug)]
pub struct TransferJob {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Root source directory
    pub source_path: PathBuf,

    /// Root destination directory
    pub destination_path: PathBuf,

    /// Digest algorithm used for hashing and validation
    pub algorithm: ChecksumAlgorithm,

    /// Current lifecycle state
    pub state: MoveState,

    /// Report from the most recent validation pass, if any
    pub validation: Option<ValidationReport>,

    /// Job-level error (set when the job aborts)
    pub error: Option<crate::error::EngineError>,

    /// When the job was created
    pub created_at: SystemTime,

    /// When execution started
    pub start_time: Option<SystemTime>,

    /// When execution reached a terminal state
    pub end_time: Option<SystemTime>,
}

impl TransferJob {
    pub fn new(
        source_path: PathBuf,
        destination_path: PathBuf,
        algorithm: ChecksumAlgorithm,
    ) -> Self {
        TransferJob {
            id: Uuid::new_v4(),
            source_path,
            destination_path,
            algorithm,
            state: MoveState::Precheck,
            validation: None,
            error: None,
            created_at: SystemTime::now(),
            start_time: None,
            end_time: None,
        }
    }
}

/// Lifecycle of a verified move. States only advance; any failure that
/// stops the job lands in `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    /// Checking preconditions; nothing has been touched yet
    Precheck,
    /// Writing digest inventories into the source tree
    HashingSource,
    /// Copying the source tree (inventories included) to the destination
    Copying,
    /// Re-hashing the destination against the copied inventories
    Validating,
    /// Validation passed; removing the source contents
    DeletingSource,
    /// Move complete, source emptied
    Done,
    /// Stopped without completing; source contents are still in place
    Aborted,
}

impl MoveState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MoveState::Done | MoveState::Aborted)
    }
}

impl std::fmt::Display for MoveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MoveState::Precheck => "Precheck",
            MoveState::HashingSource => "HashingSource",
            MoveState::Copying => "Copying",
            MoveState::Validating => "Validating",
            MoveState::DeletingSource => "DeletingSource",
            MoveState::Done => "Done",
            MoveState::Aborted => "Aborted",
        };
        write!(f, "{}", s)
    }
}

/// One file whose destination digest did not match its recorded digest.
#[derive(Debug, Clone)]
pub struct Mismatch {
    /// Destination path of the corrupted file
    pub path: PathBuf,
    /// Digest recorded in the inventory
    pub expected: Digest,
    /// Digest actually computed at the destination
    pub actual: Digest,
}

/// Outcome of re-hashing a destination tree against its copied inventories.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Files whose recomputed digest disagreed with the inventory
    pub mismatches: Vec<Mismatch>,
    /// Files listed in an inventory but absent from the destination
    pub missing: Vec<PathBuf>,
    /// Files present at the destination but absent from every inventory
    pub missing_inventory: Vec<PathBuf>,
    /// Total files whose digests were recomputed
    pub files_checked: u64,
}

impl ValidationReport {
    /// True when every copied file arrived intact: no mismatches and nothing
    /// missing. Files already present at the destination before the move show
    /// up in `missing_inventory` and are reported but do not make the copy
    /// unclean.
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.missing.is_empty()
    }

    /// True when the destination holds files no inventory accounts for.
    pub fn has_unlisted(&self) -> bool {
        !self.missing_inventory.is_empty()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} file(s) checked, {} mismatch(es), {} missing, {} without inventory entry",
            self.files_checked,
            self.mismatches.len(),
            self.missing.len(),
            self.missing_inventory.len()
        )
    }
}

//! # zonemove Engine - Verified Zone Transfer Library
//!
//! A headless engine for moving directory trees between storage zones with
//! checksum verification at every step.
//!
//! ## Overview
//!
//! The engine never deletes source data it cannot prove was copied intact.
//! It provides:
//! - Per-directory digest inventories (hidden sidecar files)
//! - Resumable, crash-recoverable whole-tree checksum snapshots
//! - A verified move pipeline: precheck, hash, copy, validate, delete
//! - A batch orchestrator with per-job, non-fatal failure handling
//! - Directory-structure snapshots for added/removed change reports
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{ChecksumAlgorithm, NoProgress, VerifiedMover};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut mover = VerifiedMover::new(
//!     "/zone_s/project".into(),
//!     "/zone_w/project".into(),
//!     ChecksumAlgorithm::Md5,
//! );
//!
//! mover.precheck()?;
//! mover.hash_source(&NoProgress)?;
//! mover.copy(&NoProgress)?;
//! let report = mover.validate(&NoProgress)?;
//! if report.is_clean() {
//!     mover.delete_source(false, &NoProgress)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **checksums**: Streaming file digests
//! - **sidecar**: Per-directory digest inventories
//! - **snapshot**: Resumable whole-tree checksum snapshots
//! - **mover**: The verified move state machine
//! - **orchestrator**: Batch execution over a transfer list
//! - **dirsnapshot**: Directory-structure snapshots and diffs
//! - **config**: Zone and transfer-batch JSON configuration
//! - **history**: Shared history-file naming and formatting
//! - **model**: Job, state, and report types
//! - **error**: Error types
//! - **fs_ops**: Low-level filesystem operations
//! - **progress**: Progress callback trait

pub mod checksums;
pub mod config;
pub mod dirsnapshot;
pub mod error;
pub mod fs_ops;
pub mod history;
pub mod model;
pub mod mover;
pub mod orchestrator;
pub mod progress;
pub mod sidecar;
pub mod snapshot;

// Re-export main types and functions
pub use checksums::{compute_bytes_digest, compute_file_digest, ChecksumAlgorithm, Digest};
pub use config::{load_monitoring, load_transfers, load_zone, TransferSpec, ZoneConfig};
pub use dirsnapshot::{DirectorySnapshot, StructureConfig};
pub use error::EngineError;
pub use model::{Mismatch, MoveState, TransferJob, ValidationReport};
pub use mover::{verify_tree, VerifiedMover};
pub use orchestrator::{run_batch, BatchReport, JobOutcome, JobResult};
pub use progress::{MoveProgress, NoProgress};
pub use snapshot::{ChecksumSnapshotEngine, RunSummary, SnapshotConfig, SnapshotStatus};

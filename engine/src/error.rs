//! Error types for the zone-transfer engine.
//!
//! `EngineError` covers everything that can stop an operation: precondition
//! failures detected before any mutation (missing paths, destination
//! conflicts), I/O failures mid-operation, and post-copy integrity failures
//! that must block source deletion. Per-file mismatch details are carried in
//! `ValidationReport`, not in this enum.

use std::error::Error;
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;

/// Errors raised by the engine.
///
/// Precondition variants (`PathNotFound`, `NotADirectory`,
/// `DestinationConflict`) are always detected before any mutation and abort
/// only the job that raised them. `ValidationFailed` is raised when a source
/// delete is requested while the last validation reported problems.
#[derive(Debug)]
pub enum EngineError {
    /// A required source or destination path does not exist
    PathNotFound { path: PathBuf },

    /// A path exists but is not a directory
    NotADirectory { path: PathBuf },

    /// Entries with the same names already exist at the destination.
    /// Nothing was copied; the full conflict list is included.
    DestinationConflict { conflicts: Vec<PathBuf> },

    /// Failed to read a file (open or mid-stream)
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write a file
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// A sidecar hash file could not be parsed
    SidecarParse { path: PathBuf, line: usize },

    /// A sidecar hash file already exists and overwrite was not requested
    SidecarExists { path: PathBuf },

    /// A persisted snapshot could not be read back
    SnapshotCorrupt { path: PathBuf, reason: String },

    /// A configuration file could not be parsed
    ConfigParse { path: PathBuf, reason: String },

    /// A lock file is already held, presumably by another engine
    Locked { path: PathBuf },

    /// An operation was invoked in the wrong lifecycle state
    InvalidState { reason: String },

    /// Source deletion refused: the last validation reported problems
    ValidationFailed { mismatches: usize, missing: usize, unlisted: usize },

    /// Catch-all for unexpected errors
    Unknown { message: String },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathNotFound { path } => {
                write!(f, "Path not found: {}", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Not a directory: {}", path.display())
            }
            Self::DestinationConflict { conflicts } => {
                write!(
                    f,
                    "{} item(s) already exist in the destination; nothing was copied",
                    conflicts.len()
                )
            }
            Self::ReadError { path, .. } => {
                write!(f, "Failed to read file: {}", path.display())
            }
            Self::WriteError { path, .. } => {
                write!(f, "Failed to write file: {}", path.display())
            }
            Self::EnumerationFailed { path, .. } => {
                write!(f, "Failed to enumerate directory: {}", path.display())
            }
            Self::DirectoryCreationFailed { path, .. } => {
                write!(f, "Failed to create directory: {}", path.display())
            }
            Self::SidecarParse { path, line } => {
                write!(
                    f,
                    "Malformed sidecar hash file {} at line {}",
                    path.display(),
                    line
                )
            }
            Self::SidecarExists { path } => {
                write!(f, "Sidecar hash file already exists: {}", path.display())
            }
            Self::SnapshotCorrupt { path, reason } => {
                write!(f, "Corrupt snapshot file {}: {}", path.display(), reason)
            }
            Self::ConfigParse { path, reason } => {
                write!(f, "Malformed configuration file {}: {}", path.display(), reason)
            }
            Self::Locked { path } => {
                write!(
                    f,
                    "Lock file {} already exists; another engine may be running",
                    path.display()
                )
            }
            Self::InvalidState { reason } => {
                write!(f, "Invalid state: {}", reason)
            }
            Self::ValidationFailed { mismatches, missing, unlisted } => {
                write!(
                    f,
                    "Refusing to delete source: validation reported {} mismatch(es), {} missing file(s), {} file(s) without inventory entry",
                    mismatches, missing, unlisted
                )
            }
            Self::Unknown { message } => {
                write!(f, "Engine error: {}", message)
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Unknown {
            message: err.to_string(),
        }
    }
}

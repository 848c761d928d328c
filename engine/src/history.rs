//! Snapshot history bookkeeping.
//!
//! Both snapshot flavors (checksum and directory-structure) persist into a
//! history directory as sequence-numbered, dated JSON files:
//! `0007-20260829-VS.json`. The helpers here handle the shared naming scheme,
//! the number formatting used inside the records, and atomic JSON writes.

use crate::error::EngineError;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Well-known name of the resumable in-progress snapshot in a history
/// directory. Its presence signals an active or interrupted run.
pub const IN_PROGRESS_FILENAME: &str = "xxxx-inprogress.json";

/// Filename suffix shared by finished snapshot files.
pub const SNAPSHOT_SUFFIX: &str = "-VS.json";

/// List finished history filenames (those starting with a 4-digit sequence).
/// A missing history directory yields an empty list.
pub fn history_file_list(history_dir: &Path) -> Result<Vec<String>, EngineError> {
    let mut names = Vec::new();
    if !history_dir.exists() {
        return Ok(names);
    }
    let entries = fs::read_dir(history_dir).map_err(|e| EngineError::EnumerationFailed {
        path: history_dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: history_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if sequence_number(&name).is_some() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Parse the 4-digit sequence prefix of a history filename.
fn sequence_number(filename: &str) -> Option<u32> {
    let prefix = filename.get(0..4)?;
    if prefix.bytes().all(|b| b.is_ascii_digit()) {
        prefix.parse().ok()
    } else {
        None
    }
}

/// Highest sequence number present in the history directory (0 if empty).
pub fn last_snapshot_number(history_dir: &Path) -> Result<u32, EngineError> {
    let names = history_file_list(history_dir)?;
    Ok(names
        .iter()
        .filter_map(|n| sequence_number(n))
        .max()
        .unwrap_or(0))
}

/// Filename of the newest finished snapshot with the given suffix, if any.
pub fn last_snapshot_filename(
    history_dir: &Path,
    suffix: &str,
) -> Result<Option<String>, EngineError> {
    let mut best: Option<(u32, String)> = None;
    for name in history_file_list(history_dir)? {
        if !name.ends_with(suffix) {
            continue;
        }
        if let Some(nr) = sequence_number(&name) {
            if best.as_ref().map_or(true, |(n, _)| nr > *n) {
                best = Some((nr, name));
            }
        }
    }
    Ok(best.map(|(_, name)| name))
}

/// Filename of the finished snapshot with the given sequence number, if any.
pub fn snapshot_filename_for(
    history_dir: &Path,
    number: u32,
    suffix: &str,
) -> Result<Option<String>, EngineError> {
    Ok(history_file_list(history_dir)?
        .into_iter()
        .find(|n| n.ends_with(suffix) && sequence_number(n) == Some(number)))
}

/// Next filename in the sequence: `{nnnn}-{YYYYMMDD}{suffix}`.
pub fn next_snapshot_filename(history_dir: &Path, suffix: &str) -> Result<String, EngineError> {
    let next_nr = last_snapshot_number(history_dir)? + 1;
    let date = chrono::Local::now().format("%Y%m%d");
    Ok(format!("{:04}-{}{}", next_nr, date, suffix))
}

/// Render a byte count with apostrophe digit grouping: `1'234'567`.
pub fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('\'');
        }
        grouped.push(ch);
    }
    grouped
}

/// Render an elapsed-seconds accumulator as `Runtime: <s>.<ms> seconds`.
pub fn format_runtime(runtime: f64) -> String {
    let seconds = runtime as u64;
    // Round, then clamp so 1.9999 prints as 1.999 rather than 1.1000
    let milliseconds = (((runtime - seconds as f64) * 1000.0).round() as u64).min(999);
    format!("Runtime: {}.{:03} seconds", seconds, milliseconds)
}

/// Write a value as 4-space-indented JSON, atomically (temp file + rename).
///
/// The in-progress snapshot is the sole recovery point after a crash, so it
/// must never be observable half-written.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| EngineError::Unknown {
            message: format!("JSON serialization failed: {}", e),
        })?;

    // The temp file must not start with digits or a crash would leave behind
    // a name that counts as a snapshot and burns its sequence slot
    let file_name = path.file_name().ok_or_else(|| EngineError::Unknown {
        message: format!("not a file path: {}", path.display()),
    })?;
    let tmp_path = path.with_file_name(format!(".tmp-{}", file_name.to_string_lossy()));
    let mut tmp = fs::File::create(&tmp_path).map_err(|e| EngineError::WriteError {
        path: tmp_path.clone(),
        source: e,
    })?;
    tmp.write_all(&buf).map_err(|e| EngineError::WriteError {
        path: tmp_path.clone(),
        source: e,
    })?;
    drop(tmp);
    fs::rename(&tmp_path, path).map_err(|e| EngineError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

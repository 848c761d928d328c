//! Low-level filesystem operations: tree copies with metadata
//! preservation, directory creation, and source-content removal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::EngineError;

/// Names of the immediate children of a directory, sorted.
///
/// Used by the move precheck to detect destination collisions before
/// anything is written.
pub fn child_names(dir: &Path) -> Result<Vec<String>, EngineError> {
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
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Copy a file from source to destination, preserving the modification time.
///
/// Returns the number of bytes copied. The destination's parent directory is
/// created if needed.
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_mtime = src_metadata.modified().ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;

    // Best effort; a copy with a fresh mtime is still a correct copy
    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Totals returned by [`copy_tree`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyStats {
    pub files: u64,
    pub bytes: u64,
}

/// Recursively copy the contents of `src` into `dst`, calling `on_file`
/// after each copied file.
///
/// Empty directories are recreated; file modification times are preserved.
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    mut on_file: impl FnMut(&Path, u64),
) -> Result<CopyStats, EngineError> {
    let mut stats = CopyStats::default();

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| EngineError::Unknown {
                message: format!("walked outside of {}", src.display()),
            })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| EngineError::DirectoryCreationFailed {
                path: target.clone(),
                source: e,
            })?;
        } else {
            let bytes = copy_file_with_metadata(entry.path(), &target)?;
            stats.files += 1;
            stats.bytes += bytes;
            on_file(entry.path(), bytes);
        }
    }

    Ok(stats)
}

/// Remove every immediate child of `dir`, leaving `dir` itself in place.
///
/// Returns the paths that were removed.
pub fn remove_children(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| EngineError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| EngineError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        } else {
            fs::remove_file(&path).map_err(|e| EngineError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        }
        removed.push(path);
    }
    Ok(removed)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        match fs::metadata(parent) {
            Ok(metadata) => {
                if metadata.is_dir() {
                    Ok(())
                } else {
                    Err(EngineError::DirectoryCreationFailed {
                        path: parent.to_path_buf(),
                        source: io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "Parent path exists but is not a directory",
                        ),
                    })
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => Err(EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            }),
        }
    } else {
        Ok(())
    }
}

fn walk_error(root: &Path, e: walkdir::Error) -> EngineError {
    let path = e
        .path()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());
    let source = e
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed"));
    EngineError::EnumerationFailed { path, source }
}

//! Content digest computation.
//!
//! This module provides:
//! - Multiple digest algorithms (MD5, SHA-256, BLAKE3)
//! - Streaming file digests with bounded memory
//!
//! MD5 is the default because the persisted sidecar and snapshot formats
//! interoperate with existing `.md5_hashes.txt` history. Each computation
//! owns its own hasher state, so calls on disjoint files are safe from
//! multiple threads.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Files are read in fixed chunks so memory stays bounded regardless of size.
const CHUNK_SIZE: usize = 4096;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    /// MD5 (default; matches the on-disk sidecar/snapshot history)
    #[default]
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl ChecksumAlgorithm {
    /// Parse algorithm from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha256" => Some(Self::Sha256),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

/// A computed content digest, stored as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wrap an already-computed hex digest (e.g. parsed from a sidecar file)
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Digest(hex.into())
    }

    /// Get the hex string representation
    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental hasher state; one instance per computation.
enum Hasher {
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => {
                use sha2::Digest as _;
                Hasher::Sha256(sha2::Sha256::new())
            }
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => {
                use sha2::Digest as _;
                h.update(data);
            }
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Digest {
        match self {
            Hasher::Md5(ctx) => Digest(format!("{:x}", ctx.compute())),
            Hasher::Sha256(h) => {
                use sha2::Digest as _;
                Digest(format!("{:x}", h.finalize()))
            }
            Hasher::Blake3(h) => Digest(h.finalize().to_hex().to_string()),
        }
    }
}

/// Compute the digest of a file by streaming fixed-size chunks.
///
/// Fails with a read error if the file cannot be opened or disappears
/// mid-stream. Deterministic: the same byte content always yields the
/// same digest.
pub fn compute_file_digest(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<Digest, EngineError> {
    let mut file = File::open(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
    Ok(hasher.finalize())
}

/// Compute the digest of an in-memory byte slice.
pub fn compute_bytes_digest(data: &[u8], algorithm: ChecksumAlgorithm) -> Digest {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Md5.to_string(), "md5");
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(ChecksumAlgorithm::from_str("md5"), Some(ChecksumAlgorithm::Md5));
        assert_eq!(ChecksumAlgorithm::from_str("SHA256"), Some(ChecksumAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::from_str("blake3"), Some(ChecksumAlgorithm::Blake3));
        assert_eq!(ChecksumAlgorithm::from_str("crc32"), None);
    }

    #[test]
    fn test_md5_known_value() {
        let digest = compute_bytes_digest(b"hello", ChecksumAlgorithm::Md5);
        assert_eq!(digest.hex(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_sha256_known_value() {
        let digest = compute_bytes_digest(b"hello", ChecksumAlgorithm::Sha256);
        assert_eq!(
            digest.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_file_digest_matches_bytes_digest() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.bin");

        // Larger than one chunk so the streaming loop is exercised
        let content = vec![0xA5u8; CHUNK_SIZE * 3 + 17];
        let mut f = std::fs::File::create(&path).expect("Failed to create file");
        f.write_all(&content).expect("Failed to write file");
        drop(f);

        for algo in [
            ChecksumAlgorithm::Md5,
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Blake3,
        ] {
            let from_file = compute_file_digest(&path, algo).expect("Failed to hash file");
            let from_bytes = compute_bytes_digest(&content, algo);
            assert_eq!(from_file, from_bytes, "algorithm {}", algo);
        }
    }

    #[test]
    fn test_file_digest_is_deterministic() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.txt");
        std::fs::write(&path, b"some stable content").expect("Failed to write file");

        let first = compute_file_digest(&path, ChecksumAlgorithm::Md5).expect("hash failed");
        let second = compute_file_digest(&path, ChecksumAlgorithm::Md5).expect("hash failed");
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_byte_change_alters_digest() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.txt");

        std::fs::write(&path, b"content A").expect("Failed to write file");
        let before = compute_file_digest(&path, ChecksumAlgorithm::Md5).expect("hash failed");

        std::fs::write(&path, b"content B").expect("Failed to write file");
        let after = compute_file_digest(&path, ChecksumAlgorithm::Md5).expect("hash failed");

        assert_ne!(before, after);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nonexistent.txt");

        let result = compute_file_digest(&path, ChecksumAlgorithm::Md5);
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }
}

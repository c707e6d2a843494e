//! Streaming content fingerprints and modification-time lookups.
//!
//! The digest is SHA-256, hex encoded. It is an integrity checksum applied
//! identically at registration and on every rescan, not a tamper seal.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use fim_core::Fingerprint;

use crate::error::FingerprintError;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Hash the bytes of `path` without loading the whole file.
///
/// The handle is dropped on every return path, including read failures.
pub fn fingerprint(path: &Path) -> Result<Fingerprint, FingerprintError> {
    let read_err = |source| FingerprintError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(read_err)?;
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Modification time of `path`; `Ok(None)` when nothing exists there.
pub fn modified_at(path: &Path) -> io::Result<Option<DateTime<Utc>>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hashes_known_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(fingerprint(&path).unwrap().as_str(), HELLO_SHA256);
    }

    #[test]
    fn content_larger_than_buffer_matches_one_shot_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let bytes: Vec<u8> = (0..(READ_BUFFER_BYTES * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        std::fs::write(&path, &bytes).unwrap();

        let expected = hex::encode(Sha256::digest(&bytes));
        assert_eq!(fingerprint(&path).unwrap().0, expected);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        let err = fingerprint(&path).unwrap_err();
        assert_eq!(err.path(), path.as_path());
        assert!(err.to_string().contains("gone.txt"));
    }

    #[test]
    fn modified_at_reports_mtime_and_absence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.txt");
        assert_eq!(modified_at(&path).unwrap(), None);

        std::fs::write(&path, "x").unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_file_mtime(&path, FileTime::from_system_time(stamp)).unwrap();
        assert_eq!(
            modified_at(&path).unwrap(),
            Some(DateTime::<Utc>::from(stamp))
        );
    }
}

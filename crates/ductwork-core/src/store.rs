//! Data and file collaborators the responder resolves requests against.
//!
//! The transport is data-agnostic; these stores give it something to
//! serve. [`DataStore`] answers point queries against per-subject CSV
//! files sampled at a fixed interval; [`FileStore`] serves byte ranges of
//! arbitrary files under a root directory.

use crate::config::ProtocolConfig;
use crate::error::{DuctworkError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Per-subject CSV readings: one file `<root>/<subject>.csv`, rows of
/// `time,v1,v2` at [`ProtocolConfig::SAMPLE_INTERVAL`] spacing.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    /// Open a data store rooted at `root`. The directory must exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DuctworkError::Validation {
                field: "data_root".to_string(),
                message: format!("{} is not a directory", root.display()),
            });
        }
        Ok(Self { root })
    }

    /// Resolve one reading: `subject` at `time` on stream `stream` (1 or 2).
    ///
    /// The row is selected by index `round(time / SAMPLE_INTERVAL)`; a
    /// fixed dataset therefore answers the same query with the same value
    /// every time. An unknown subject is `SubjectNotFound`; a bad stream or
    /// an out-of-range time is a validation error, not protocol corruption.
    pub fn lookup(&self, subject: i32, time: f64, stream: i32) -> Result<f64> {
        if !(1..=2).contains(&stream) {
            return Err(DuctworkError::Validation {
                field: "stream".to_string(),
                message: format!("stream must be 1 or 2, got {stream}"),
            });
        }
        if time < 0.0 || !time.is_finite() {
            return Err(DuctworkError::Validation {
                field: "time".to_string(),
                message: format!("time must be finite and non-negative, got {time}"),
            });
        }

        let path = self.root.join(format!("{subject}.csv"));
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DuctworkError::SubjectNotFound { subject }
            } else {
                DuctworkError::io_with_path(e, &path)
            }
        })?;

        let row = (time / ProtocolConfig::SAMPLE_INTERVAL).round() as usize;
        let line = BufReader::new(file)
            .lines()
            .nth(row)
            .transpose()
            .map_err(|e| DuctworkError::io_with_path(e, &path))?
            .ok_or_else(|| DuctworkError::Validation {
                field: "time".to_string(),
                message: format!("no row {row} for subject {subject} (time {time})"),
            })?;

        let value = line
            .split(',')
            .nth(stream as usize)
            .and_then(|field| field.trim().parse::<f64>().ok())
            .ok_or_else(|| DuctworkError::Validation {
                field: "data_row".to_string(),
                message: format!("malformed row {row} in {}", path.display()),
            })?;

        debug!(subject, time, stream, value, "data lookup");
        Ok(value)
    }
}

/// Byte-range file serving under a fixed root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a file store rooted at `root`. The directory must exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DuctworkError::Validation {
                field: "file_root".to_string(),
                message: format!("{} is not a directory", root.display()),
            });
        }
        Ok(Self { root })
    }

    /// Total byte length of `name`.
    pub fn length(&self, name: &str) -> Result<i64> {
        let path = self.resolve(name)?;
        let meta = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DuctworkError::FileNotFound(path.clone())
            } else {
                DuctworkError::io_with_path(e, &path)
            }
        })?;
        if !meta.is_file() {
            return Err(DuctworkError::FileNotFound(path));
        }
        Ok(meta.len() as i64)
    }

    /// Read exactly `length` bytes of `name` starting at `offset`.
    ///
    /// The requester only asks for ranges inside the length it was told, so
    /// a range past end-of-file means the file changed underneath the
    /// transfer and is reported as an IO error.
    pub fn read_chunk(&self, name: &str, offset: i64, length: i64) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DuctworkError::FileNotFound(path.clone())
            } else {
                DuctworkError::io_with_path(e, &path)
            }
        })?;

        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| DuctworkError::io_with_path(e, &path))?;

        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)
            .map_err(|e| DuctworkError::io_with_path(e, &path))?;

        debug!(file = name, offset, length, "chunk read");
        Ok(buf)
    }

    /// Map a requested name to a path under the root, rejecting anything
    /// that would escape it.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let requested = Path::new(name);
        let escapes = requested.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if name.is_empty() || escapes {
            return Err(DuctworkError::Validation {
                field: "filename".to_string(),
                message: format!("illegal file name {name:?}"),
            });
        }
        Ok(self.root.join(requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn seed_subject(dir: &Path, subject: i32, rows: usize) {
        let mut f = File::create(dir.join(format!("{subject}.csv"))).unwrap();
        for i in 0..rows {
            let t = i as f64 * ProtocolConfig::SAMPLE_INTERVAL;
            writeln!(f, "{t},{},{}", i as f64 * 0.5, i as f64 * -0.25).unwrap();
        }
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        seed_subject(tmp.path(), 7, 100);
        let store = DataStore::open(tmp.path()).unwrap();

        let first = store.lookup(7, 0.02, 1).unwrap();
        let second = store.lookup(7, 0.02, 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 2.5); // row 5, column 1
    }

    #[test]
    fn test_lookup_stream_two() {
        let tmp = TempDir::new().unwrap();
        seed_subject(tmp.path(), 1, 10);
        let store = DataStore::open(tmp.path()).unwrap();
        assert_eq!(store.lookup(1, 0.004, 2).unwrap(), -0.25);
    }

    #[test]
    fn test_unknown_subject() {
        let tmp = TempDir::new().unwrap();
        let store = DataStore::open(tmp.path()).unwrap();
        let err = store.lookup(99, 0.0, 1).unwrap_err();
        assert!(matches!(
            err,
            DuctworkError::SubjectNotFound { subject: 99 }
        ));
    }

    #[test]
    fn test_bad_stream_and_time() {
        let tmp = TempDir::new().unwrap();
        seed_subject(tmp.path(), 1, 10);
        let store = DataStore::open(tmp.path()).unwrap();
        assert!(store.lookup(1, 0.0, 3).is_err());
        assert!(store.lookup(1, -1.0, 1).is_err());
        assert!(store.lookup(1, 10.0, 1).is_err()); // past last row
    }

    #[test]
    fn test_file_length_and_chunks() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("blob.bin"), vec![0xAB; 300]).unwrap();
        let store = FileStore::open(tmp.path()).unwrap();

        assert_eq!(store.length("blob.bin").unwrap(), 300);
        let chunk = store.read_chunk("blob.bin", 256, 44).unwrap();
        assert_eq!(chunk.len(), 44);
        assert!(chunk.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_missing_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.length("nope.bin").unwrap_err(),
            DuctworkError::FileNotFound(_)
        ));
    }

    #[test]
    fn test_escaping_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(store.length("../etc/passwd").is_err());
        assert!(store.length("/etc/passwd").is_err());
        assert!(store.length("").is_err());
    }
}

/// Cache entry format and file handling
///
/// An entry is a JSON record, zstd compressed. When compression fails the
/// plain JSON is written instead; readers sniff the zstd frame magic and
/// accept both. Entry files and directories are created with permissive
/// modes because cache directories are shared between collaborators.
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// First four bytes of every zstd frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// rw-rw-rw-
pub const ENTRY_FILE_MODE: u32 = 0o666;

/// rwxrwxrwx
pub const DEFAULT_DIR_MODE: u32 = 0o777;

const COMPRESSION_LEVEL: i32 = 3;

/// Entry names are two hex SHA-256 digests: content key hash + chain hash.
const ENTRY_NAME_LEN: usize = 128;

/// Persisted outcome of running a wrapped chain once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Context snapshot after the wrapped chain ran.
    pub data: Map<String, Value>,
    /// The wrapped chain signalled stop.
    pub stopped: bool,
    pub chain_repr: String,
    /// Modification watermark of the wrapped stages, seconds since epoch.
    pub chain_mtime: f64,
}

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("Failed to read cache entry {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache entry {} is corrupted: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },
}

impl EntryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EntryError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Serialize a record; compressed unless compression fails.
pub fn encode(record: &CacheRecord) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(record).context("Failed to serialize cache record")?;
    match zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL) {
        Ok(compressed) => Ok(compressed),
        Err(e) => {
            debug!("zstd compression failed, storing plain JSON: {}", e);
            Ok(json)
        }
    }
}

/// Parse a record from compressed or plain bytes.
pub fn decode(bytes: &[u8]) -> Result<CacheRecord, String> {
    if bytes.starts_with(&ZSTD_MAGIC) {
        let json = zstd::decode_all(bytes).map_err(|e| format!("zstd: {}", e))?;
        serde_json::from_slice(&json).map_err(|e| format!("json: {}", e))
    } else {
        serde_json::from_slice(bytes).map_err(|e| format!("json: {}", e))
    }
}

pub fn read_entry(path: &Path) -> Result<CacheRecord, EntryError> {
    let bytes = fs::read(path).map_err(|source| EntryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes).map_err(|reason| EntryError::Corrupted {
        path: path.to_path_buf(),
        reason,
    })
}

/// Write `record` to `path` through a uniquely named temporary sibling file,
/// then relax its permissions. Concurrent writers of the same entry never
/// share a temporary file; the last rename wins. Failing to relax
/// permissions is not an error.
pub fn write_entry(path: &Path, record: &CacheRecord) -> Result<()> {
    let bytes = encode(record)?;

    let parent = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => anyhow::bail!("Invalid cache entry path: {}", path.display()),
    };
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary entry in {}", parent.display()))?;
    temp.write_all(&bytes)
        .with_context(|| format!("Failed to write cache entry: {}", temp.path().display()))?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move cache entry into place: {}", path.display()))?;

    if let Err(e) = set_mode(path, ENTRY_FILE_MODE) {
        debug!("Could not relax permissions of {}: {}", path.display(), e);
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Create `dir` (and parents) with exactly `mode`, independent of the
/// process umask. A directory created concurrently by someone else is fine.
#[cfg(unix)]
pub fn create_shared_dir(dir: &Path, mode: u32) -> io::Result<()> {
    use nix::sys::stat::{umask, Mode};
    use std::os::unix::fs::DirBuilderExt;

    struct RestoreUmask(Mode);

    impl Drop for RestoreUmask {
        fn drop(&mut self) {
            umask(self.0);
        }
    }

    let _restore = RestoreUmask(umask(Mode::empty()));
    match fs::DirBuilder::new().recursive(true).mode(mode).create(dir) {
        Err(e) if e.kind() != io::ErrorKind::AlreadyExists => Err(e),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
pub fn create_shared_dir(dir: &Path, _mode: u32) -> io::Result<()> {
    match fs::create_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::AlreadyExists => Err(e),
        _ => Ok(()),
    }
}

/// Whether `name` looks like an entry file name.
pub fn is_entry_name(name: &str) -> bool {
    name.len() == ENTRY_NAME_LEN && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Entry files in `dir`, sorted by name. Temporary and foreign files are
/// ignored.
pub fn list_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    if !dir.exists() {
        return Ok(entries);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_entry_name(name) {
                entries.push(entry.path());
            }
        }
    }

    entries.sort();
    Ok(entries)
}

/// Seconds since the epoch, 0.0 when unknown.
pub fn epoch_secs(time: Option<SystemTime>) -> f64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record() -> CacheRecord {
        let mut data = Map::new();
        data.insert("input".to_string(), json!(10));
        data.insert("output".to_string(), json!(23));
        CacheRecord {
            data,
            stopped: false,
            chain_repr: "Add(val=13)".to_string(),
            chain_mtime: 0.0,
        }
    }

    #[test]
    fn test_written_entry_is_compressed_and_readable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a".repeat(128));

        write_entry(&path, &record()).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(&ZSTD_MAGIC));
        assert_eq!(read_entry(&path).unwrap(), record());
    }

    #[test]
    fn test_plain_json_is_accepted() {
        let bytes = serde_json::to_vec(&record()).unwrap();
        assert_eq!(decode(&bytes).unwrap(), record());
    }

    #[test]
    fn test_truncated_entry_is_corrupted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("b".repeat(128));
        write_entry(&path, &record()).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let err = read_entry(&path).unwrap_err();
        assert!(matches!(err, EntryError::Corrupted { .. }));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = read_entry(&temp.path().join("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_entries_skips_foreign_files() {
        let temp = TempDir::new().unwrap();
        write_entry(&temp.path().join("c".repeat(128)), &record()).unwrap();
        fs::write(temp.path().join("notes.txt"), "x").unwrap();
        fs::write(temp.path().join(format!("{}.tmp.1", "d".repeat(128))), "x").unwrap();

        let entries = list_entries(temp.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_leave_one_readable_entry() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("e".repeat(128));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        write_entry(&path, &record()).unwrap();
                    }
                });
            }
        });

        assert_eq!(read_entry(&path).unwrap(), record());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    #[serial_test::serial]
    fn test_shared_dir_ignores_umask() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("shared").join("cache");
        create_shared_dir(&dir, 0o777).unwrap();
        create_shared_dir(&dir, 0o777).unwrap();

        let mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o777);
    }
}

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::credential::CredentialRecord;
use crate::error::StoreError;

/// Durable home of the single credential record.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<CredentialRecord, StoreError>;
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;
}

/// JSON file store, owner-only permissions on the file and its directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the stored record. Returns whether a record existed.
    pub fn remove(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<CredentialRecord, StoreError> {
        let data = std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                self.io_error(source)
            }
        })?;
        serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)
                    .map_err(|e| self.io_error(e))?;
                restrict_directory(parent);
                parent
            }
            None => Path::new("."),
        };

        let data = serde_json::to_string_pretty(record).map_err(StoreError::Serialize)?;

        // Every save gets its own sibling temp file, renamed over the record
        // only once fully written. Dropping it on error removes it.
        let written = (|| -> std::io::Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(".credential-")
                .suffix(".tmp")
                .tempfile_in(dir)?;
            if let Some(permissions) = owner_only(0o600) {
                tmp.as_file().set_permissions(permissions)?;
            }
            tmp.write_all(data.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|err| err.error)?;
            Ok(())
        })();
        written.map_err(|e| self.io_error(e))
    }
}

/// Tighten an existing directory to owner-only access. Sticky shared
/// directories such as `/tmp` are left alone.
#[cfg(unix)]
fn restrict_directory(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let mode = match std::fs::metadata(dir) {
        Ok(meta) => meta.permissions().mode(),
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot inspect credential directory");
            return;
        }
    };
    if mode & 0o077 == 0 || mode & 0o1000 != 0 {
        return;
    }
    if let Err(err) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
        tracing::warn!(
            dir = %dir.display(),
            mode = %format!("{:o}", mode & 0o7777),
            error = %err,
            "credential directory is accessible to other users"
        );
    }
}

#[cfg(not(unix))]
fn restrict_directory(_dir: &Path) {}

#[cfg(unix)]
fn owner_only(mode: u32) -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn owner_only(_mode: u32) -> Option<std::fs::Permissions> {
    None
}

/// A simple in-memory store, mainly for testing.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    pub fn current(&self) -> Option<CredentialRecord> {
        self.record.lock().ok()?.clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<CredentialRecord, StoreError> {
        self.record
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?
            .clone()
            .ok_or_else(|| StoreError::NotFound {
                path: PathBuf::from("<memory>"),
            })
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        *self
            .record
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))? =
            Some(record.clone());
        Ok(())
    }
}

#[cfg(unix)]
use std::os::unix::fs::DirBuilderExt;

// Directory mode bits are a no-op off unix.
#[cfg(not(unix))]
trait DirBuilderExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl DirBuilderExt for std::fs::DirBuilder {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample() -> CredentialRecord {
        CredentialRecord {
            access_token: "test-access-token".to_string(),
            refresh_token: "test-refresh-token".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn save_then_load_returns_same_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("token.json"));
        let record = sample();
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), record);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("missing.json"));
        assert!(matches!(store.load(), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn load_invalid_json_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalid-token.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileCredentialStore::new(path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn save_creates_nested_directories_and_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("token.json");
        let store = FileCredentialStore::new(&path);
        store.save(&sample()).unwrap();

        let mut second = sample();
        second.access_token = "rotated".to_string();
        store.save(&second).unwrap();

        assert_eq!(store.load().unwrap().access_token, "rotated");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn record_and_directory_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure").join("dir").join("token.json");
        let store = FileCredentialStore::new(&path);
        store.save(&sample()).unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o077, 0, "file mode {file_mode:o}");
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o077, 0, "dir mode {dir_mode:o}");
    }

    #[cfg(unix)]
    #[test]
    fn failed_save_keeps_previous_record() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = FileCredentialStore::new(&path);
        let previous = sample();
        store.save(&previous).unwrap();

        // Read-only directory: the temp file cannot be created.
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o500)).unwrap();
        let mut next = sample();
        next.access_token = "never-written".to_string();
        let result = store.save(&next);
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();

        // Root ignores directory permissions; only assert when the write was refused.
        if result.is_err() {
            assert_eq!(store.load().unwrap(), previous);
        }
    }

    #[cfg(unix)]
    #[test]
    fn existing_directory_is_tightened() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("mcp-google-sheets");
        std::fs::create_dir(&shared).unwrap();
        std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = FileCredentialStore::new(shared.join("token.json"));
        store.save(&sample()).unwrap();

        let dir_mode = std::fs::metadata(&shared).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700, "dir mode {dir_mode:o}");
    }

    #[test]
    fn concurrent_saves_never_tear_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("token.json"));
        store.save(&sample()).unwrap();

        std::thread::scope(|scope| {
            for writer in 0..4usize {
                let store = &store;
                scope.spawn(move || {
                    for round in 0..50usize {
                        let mut record = sample();
                        record.access_token = "x".repeat(1 + writer * 300 + round);
                        store.save(&record).unwrap();
                    }
                });
            }
            let store = &store;
            scope.spawn(move || {
                for _ in 0..200 {
                    let record = store.load().unwrap();
                    assert!(record.access_token.bytes().all(|b| b == b'x') || record.access_token == "test-access-token");
                }
            });
        });

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        assert!(store.load().is_ok());
    }

    #[test]
    fn remove_reports_whether_record_existed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("token.json"));
        assert!(!store.remove().unwrap());
        store.save(&sample()).unwrap();
        assert!(store.remove().unwrap());
        assert!(matches!(store.load(), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().is_err());
        store.save(&sample()).unwrap();
        assert_eq!(store.current().unwrap().access_token, "test-access-token");
    }
}

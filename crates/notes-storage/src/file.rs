//! File-backed storage for machines without a usable keyring.

use crate::{SecureStorage, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

type Entries = BTreeMap<String, String>;

/// Stores all entries as one JSON object in a file only the owner can read.
///
/// Writes go to a sibling temp file that is renamed over the original, so a
/// reader never sees a partially written map.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Open storage at `path`, creating parent directories.
    pub fn new(path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(entries)?;

        let write_result = (|| -> std::io::Result<()> {
            let mut file = open_private(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }

    fn update<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> StorageResult<T> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        let result = f(&mut entries);
        self.write_entries(&entries)?;
        Ok(result)
    }
}

/// Create `path` readable and writable by the owner only. A leftover file is
/// removed first so its permissions are never reused.
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl SecureStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(path = %self.path.display(), key = %key, "Setting file entry");
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(path = %self.path.display(), key = %key, "Deleting file entry");
        self.update(|entries| entries.remove(key).is_some())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        self.update(|stored| {
            for (key, value) in entries {
                stored.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn get_many(&self, keys: &[&str]) -> StorageResult<Vec<Option<String>>> {
        let _guard = self.lock.lock();
        let stored = self.read_entries()?;
        Ok(keys.iter().map(|key| stored.get(*key).cloned()).collect())
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<usize> {
        self.update(|stored| keys.iter().filter(|key| stored.remove(**key).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let storage = FileStorage::new(path.clone()).unwrap();
        storage.set_many(&[("accessToken", "a1"), ("refreshToken", "r1")]).unwrap();

        let reopened = FileStorage::new(path).unwrap();
        assert_eq!(reopened.get("accessToken").unwrap(), Some("a1".to_string()));
        assert_eq!(reopened.get("refreshToken").unwrap(), Some("r1".to_string()));
    }

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested").join("creds.json")).unwrap();

        assert_eq!(storage.get("accessToken").unwrap(), None);
        assert!(!storage.delete("accessToken").unwrap());
    }

    #[test]
    fn test_file_storage_delete_many() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("creds.json")).unwrap();
        storage.set_many(&[("a", "1"), ("b", "2"), ("c", "3")]).unwrap();

        assert_eq!(storage.delete_many(&["a", "c", "zzz"]).unwrap(), 2);
        assert_eq!(
            storage.get_many(&["a", "b", "c"]).unwrap(),
            vec![None, Some("2".to_string()), None]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("creds.json")).unwrap();
        storage.set("user", "{}").unwrap();

        let mode = fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_leftover_temp_file_is_made_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let tmp_path = dir.path().join("creds.json.tmp");
        fs::write(&tmp_path, "stale").unwrap();
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o644)).unwrap();

        let file = open_private(&tmp_path).unwrap();

        let mode = file.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert_eq!(fs::read_to_string(&tmp_path).unwrap(), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_new_temp_file_has_no_group_or_other_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let file = open_private(&dir.path().join("fresh.tmp")).unwrap();

        assert_eq!(file.metadata().unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.json");
        // a non-empty directory in place of the file makes the rename fail
        fs::create_dir_all(path.join("occupied")).unwrap();
        let storage = FileStorage {
            path: path.clone(),
            lock: Mutex::new(()),
        };

        assert!(storage.write_entries(&Entries::new()).is_err());
        assert!(!path.with_extension("json.tmp").exists());
    }
}

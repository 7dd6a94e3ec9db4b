//! Storage trait definitions.

use crate::StorageResult;

/// Trait for secure storage backends
pub trait SecureStorage: Send + Sync {
    /// Store a value securely
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether the key existed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Store several entries. Backends that can write in one step override this.
    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Read several keys, preserving order.
    fn get_many(&self, keys: &[&str]) -> StorageResult<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Delete several keys. Returns how many existed.
    fn delete_many(&self, keys: &[&str]) -> StorageResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

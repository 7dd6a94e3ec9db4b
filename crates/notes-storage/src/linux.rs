//! Linux Secret Service backend.

use crate::{SecureStorage, StorageError, StorageResult};
use secret_service::blocking::{Collection, SecretService};
use secret_service::EncryptionType;
use std::collections::HashMap;
use tracing::debug;

fn platform_err(e: secret_service::Error) -> StorageError {
    StorageError::Platform(e.to_string())
}

/// Items in the default Secret Service collection, looked up by the
/// `service` and `key` attributes.
pub struct SecretServiceStorage {
    service_name: String,
}

impl SecretServiceStorage {
    /// Connects once up front so a missing D-Bus session fails early.
    pub fn new(service_name: &str) -> StorageResult<Self> {
        SecretService::connect(EncryptionType::Dh).map_err(|e| {
            StorageError::Platform(format!("Failed to connect to Secret Service: {}", e))
        })?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    /// Run `f` against the unlocked default collection over one connection.
    fn with_collection<T>(
        &self,
        f: impl FnOnce(&Collection<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let ss = SecretService::connect(EncryptionType::Dh).map_err(platform_err)?;
        let collection = ss.get_default_collection().map_err(platform_err)?;

        if collection.is_locked().unwrap_or(false) {
            collection.unlock().map_err(|e| {
                StorageError::Platform(format!("Failed to unlock collection: {}", e))
            })?;
        }

        f(&collection)
    }

    fn attributes<'a>(&'a self, key: &'a str) -> HashMap<&'a str, &'a str> {
        HashMap::from([("service", self.service_name.as_str()), ("key", key)])
    }

    fn write(&self, collection: &Collection<'_>, key: &str, value: &str) -> StorageResult<()> {
        let label = format!("{}/{}", self.service_name, key);
        collection
            .create_item(&label, self.attributes(key), value.as_bytes(), true, "text/plain")
            .map_err(platform_err)?;
        Ok(())
    }

    fn read(&self, collection: &Collection<'_>, key: &str) -> StorageResult<Option<String>> {
        let items = collection
            .search_items(self.attributes(key))
            .map_err(platform_err)?;

        let Some(item) = items.first() else {
            return Ok(None);
        };

        let secret = item.get_secret().map_err(platform_err)?;
        String::from_utf8(secret)
            .map(Some)
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }

    fn remove(&self, collection: &Collection<'_>, key: &str) -> StorageResult<bool> {
        let items = collection
            .search_items(self.attributes(key))
            .map_err(platform_err)?;

        let existed = !items.is_empty();
        for item in items {
            item.delete().map_err(platform_err)?;
        }
        Ok(existed)
    }
}

impl SecureStorage for SecretServiceStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Setting secret");
        self.with_collection(|collection| self.write(collection, key, value))
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(service = %self.service_name, key = %key, "Getting secret");
        self.with_collection(|collection| self.read(collection, key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(service = %self.service_name, key = %key, "Deleting secret");
        self.with_collection(|collection| self.remove(collection, key))
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        self.with_collection(|collection| {
            for (key, value) in entries {
                self.write(collection, key, value)?;
            }
            Ok(())
        })
    }

    fn get_many(&self, keys: &[&str]) -> StorageResult<Vec<Option<String>>> {
        self.with_collection(|collection| {
            keys.iter().map(|key| self.read(collection, key)).collect()
        })
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<usize> {
        self.with_collection(|collection| {
            let mut removed = 0;
            for key in keys {
                if self.remove(collection, key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }
}

//! Secure credential storage for the notes client.
//!
//! Backends:
//! - **macOS**: Keychain Access via `security-framework`
//! - **Linux**: Secret Service (GNOME Keyring / KWallet) via `secret-service`
//! - **File**: owner-only JSON file, for machines without a keyring
//! - **Memory**: ephemeral, used by tests
//!
//! [`CredentialStore`] sits on top of a backend and keeps the access/refresh
//! token pair consistent.

mod credentials;
mod file;
mod keys;
mod memory;
mod traits;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
mod linux;

pub use credentials::{CredentialPair, CredentialStore, StoredSession, User};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use notes_config_and_utils::StorageBackendKind;
pub use traits::SecureStorage;

use notes_config_and_utils::Paths;
use thiserror::Error;

/// Service name used for all keyring entries.
pub const SERVICE_NAME: &str = "com.notes.app";

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Platform-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create a storage backend of the requested kind.
///
/// `paths` locates the credentials file for [`StorageBackendKind::File`].
pub fn create_storage(
    kind: StorageBackendKind,
    paths: &Paths,
) -> StorageResult<Box<dyn SecureStorage>> {
    match kind {
        StorageBackendKind::Platform => create_platform_storage(),
        StorageBackendKind::File => Ok(Box::new(FileStorage::new(paths.credentials_file())?)),
        StorageBackendKind::Memory => Ok(Box::new(MemoryStorage::new())),
    }
}

fn create_platform_storage() -> StorageResult<Box<dyn SecureStorage>> {
    #[cfg(target_os = "macos")]
    {
        let storage = macos::KeychainStorage::new(SERVICE_NAME)?;
        Ok(Box::new(storage))
    }

    #[cfg(target_os = "linux")]
    {
        let storage = linux::SecretServiceStorage::new(SERVICE_NAME)?;
        Ok(Box::new(storage))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Err(StorageError::Platform(
            "No secure storage implementation available for this platform; use the file backend"
                .to_string(),
        ))
    }
}

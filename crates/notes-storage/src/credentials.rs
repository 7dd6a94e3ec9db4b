//! Credential store: the persisted session on top of a [`SecureStorage`] backend.
//!
//! The access and refresh tokens are only ever written and read together,
//! under one lock, so readers see either the old pair or the new pair.

use crate::{SecureStorage, StorageKeys, StorageResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bearer access token plus the refresh token that renews it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

/// Signed-in user profile, stored as JSON under [`StorageKeys::USER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Everything the store knows about the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSession {
    pub pair: Option<CredentialPair>,
    pub user: Option<User>,
}

struct Inner {
    storage: Box<dyn SecureStorage>,
    /// Bumped whenever a session starts or ends.
    epoch: u64,
}

/// Durable session storage shared by the session controller and the token
/// refresh coordinator.
pub struct CredentialStore {
    inner: RwLock<Inner>,
}

impl CredentialStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self {
            inner: RwLock::new(Inner { storage, epoch: 0 }),
        }
    }

    /// Current session epoch. A refresh captures this before calling the
    /// server and hands it back to [`replace_tokens`](Self::replace_tokens).
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// Read the token pair. A half-stored pair counts as no pair.
    pub fn pair(&self) -> StorageResult<Option<CredentialPair>> {
        let inner = self.inner.read();
        read_pair(inner.storage.as_ref())
    }

    pub fn access_token(&self) -> StorageResult<Option<String>> {
        Ok(self.pair()?.map(|pair| pair.access_token))
    }

    pub fn refresh_token(&self) -> StorageResult<Option<String>> {
        Ok(self.pair()?.map(|pair| pair.refresh_token))
    }

    /// Read the stored user. Unparseable JSON is treated as absent.
    pub fn user(&self) -> StorageResult<Option<User>> {
        let inner = self.inner.read();
        read_user(inner.storage.as_ref())
    }

    /// Read the pair and user in one consistent snapshot.
    pub fn load(&self) -> StorageResult<StoredSession> {
        let inner = self.inner.read();
        Ok(StoredSession {
            pair: read_pair(inner.storage.as_ref())?,
            user: read_user(inner.storage.as_ref())?,
        })
    }

    /// True when no session key is stored at all.
    pub fn is_empty(&self) -> StorageResult<bool> {
        let inner = self.inner.read();
        let values = inner.storage.get_many(&StorageKeys::ALL)?;
        Ok(values.iter().all(Option::is_none))
    }

    /// Persist a fresh session and start a new epoch.
    pub fn save_session(&self, pair: &CredentialPair, user: Option<&User>) -> StorageResult<()> {
        let user_json = user.map(serde_json::to_string).transpose()?;

        let mut inner = self.inner.write();
        let mut entries = vec![
            (StorageKeys::ACCESS_TOKEN, pair.access_token.as_str()),
            (StorageKeys::REFRESH_TOKEN, pair.refresh_token.as_str()),
        ];
        if let Some(json) = user_json.as_deref() {
            entries.push((StorageKeys::USER, json));
        }

        if let Err(e) = inner.storage.set_many(&entries) {
            // Never leave half a session behind
            let _ = inner.storage.delete_many(&StorageKeys::ALL);
            inner.epoch += 1;
            return Err(e);
        }
        if user_json.is_none() {
            inner.storage.delete(StorageKeys::USER)?;
        }

        inner.epoch += 1;
        debug!(epoch = inner.epoch, has_user = user.is_some(), "Session saved");
        Ok(())
    }

    /// Replace the tokens of the current session.
    ///
    /// Writes nothing and returns `Ok(false)` when the epoch moved since
    /// `expected_epoch` was read (a logout or another login happened) or when
    /// no session is stored. A missing `refresh_token` keeps the stored one.
    pub fn replace_tokens(
        &self,
        expected_epoch: u64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> StorageResult<bool> {
        let inner = self.inner.write();
        if inner.epoch != expected_epoch {
            debug!(
                expected_epoch,
                epoch = inner.epoch,
                "Session changed, discarding token update"
            );
            return Ok(false);
        }

        let Some(previous) = read_pair(inner.storage.as_ref())? else {
            debug!("No stored session, discarding token update");
            return Ok(false);
        };

        let refresh_token = refresh_token.unwrap_or(&previous.refresh_token);
        let result = inner.storage.set_many(&[
            (StorageKeys::ACCESS_TOKEN, access_token),
            (StorageKeys::REFRESH_TOKEN, refresh_token),
        ]);

        if let Err(e) = result {
            warn!(error = %e, "Token update failed, restoring previous pair");
            let _ = inner.storage.set_many(&[
                (StorageKeys::ACCESS_TOKEN, previous.access_token.as_str()),
                (StorageKeys::REFRESH_TOKEN, previous.refresh_token.as_str()),
            ]);
            return Err(e);
        }

        Ok(true)
    }

    /// Overwrite the stored user without touching the tokens.
    pub fn set_user(&self, user: &User) -> StorageResult<()> {
        let json = serde_json::to_string(user)?;
        let inner = self.inner.write();
        inner.storage.set(StorageKeys::USER, &json)
    }

    /// Delete every session key and start a new epoch.
    pub fn clear(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        inner.epoch += 1;
        let removed = inner.storage.delete_many(&StorageKeys::ALL)?;
        debug!(epoch = inner.epoch, removed, "Session cleared");
        Ok(())
    }

    /// [`clear`](Self::clear), but only if the epoch still equals `expected_epoch`.
    pub fn clear_if_current(&self, expected_epoch: u64) -> StorageResult<bool> {
        let mut inner = self.inner.write();
        if inner.epoch != expected_epoch {
            return Ok(false);
        }
        inner.epoch += 1;
        inner.storage.delete_many(&StorageKeys::ALL)?;
        debug!(epoch = inner.epoch, "Session cleared after failed refresh");
        Ok(true)
    }
}

fn read_pair(storage: &dyn SecureStorage) -> StorageResult<Option<CredentialPair>> {
    let values = storage.get_many(&[StorageKeys::ACCESS_TOKEN, StorageKeys::REFRESH_TOKEN])?;
    match <[Option<String>; 2]>::try_from(values) {
        Ok([Some(access_token), Some(refresh_token)]) => Ok(Some(CredentialPair {
            access_token,
            refresh_token,
        })),
        Ok([None, None]) => Ok(None),
        Ok(_) => {
            warn!("Only one of the session tokens is stored, treating session as absent");
            Ok(None)
        }
        Err(_) => Ok(None),
    }
}

fn read_user(storage: &dyn SecureStorage) -> StorageResult<Option<User>> {
    let Some(json) = storage.get(StorageKeys::USER)? else {
        return Ok(None);
    };
    match serde_json::from_str(&json) {
        Ok(user) => Ok(Some(user)),
        Err(e) => {
            warn!(error = %e, "Stored user is not valid JSON, ignoring it");
            Ok(None)
        }
    }
}

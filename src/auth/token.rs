//! Token records and their on-disk store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors that can occur while reading or writing the token file
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// OAuth tokens held for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Access token for API calls
    pub access_token: String,

    /// Refresh token for obtaining new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Epoch millis when the access token expires; `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,

    /// Space-separated scopes granted to this token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client ID the tokens were issued to, reused for refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret presented with the code, reused for refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Create a non-expiring bearer record
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
            scope: None,
            client_id: None,
            client_secret: None,
        }
    }

    /// Whether the access token has expired at `now` (epoch millis)
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Whether the access token expires within `skew_ms` of `now`
    #[must_use]
    pub fn expires_within(&self, now: u64, skew_ms: u64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now.saturating_add(skew_ms) >= expires_at)
    }

    /// Remaining validity in millis, if the token expires and has not yet
    #[must_use]
    pub fn remaining_millis(&self, now: u64) -> Option<u64> {
        self.expires_at
            .and_then(|expires_at| expires_at.checked_sub(now))
            .filter(|remaining| *remaining > 0)
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Provider → record map mirrored to a single JSON file
///
/// Every mutation is persisted before the in-memory copy changes, so after a
/// successful call memory and disk agree.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, TokenRecord>>,
}

impl TokenStore {
    /// Open the store at `path`, loading whatever it currently holds
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_file(&path);
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Get the storage path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, TokenRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-read the file, replacing the in-memory copy
    pub fn load(&self) {
        let records = load_file(&self.path);
        *self.lock() = records;
    }

    /// Write the current in-memory copy to disk
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<(), StorageError> {
        let records = self.lock();
        write_file(&self.path, &records)
    }

    /// Record for `provider`, if any
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<TokenRecord> {
        self.lock().get(provider).cloned()
    }

    /// Insert or replace the record for `provider`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written; memory is left unchanged.
    pub fn set(&self, provider: &str, record: TokenRecord) -> Result<(), StorageError> {
        let mut records = self.lock();
        let mut next = records.clone();
        next.insert(provider.to_string(), record);
        write_file(&self.path, &next)?;
        *records = next;
        Ok(())
    }

    /// Remove the record for `provider`; succeeds when nothing is stored
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written; memory is left unchanged.
    pub fn delete(&self, provider: &str) -> Result<bool, StorageError> {
        let mut records = self.lock();
        if !records.contains_key(provider) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(provider);
        write_file(&self.path, &next)?;
        *records = next;
        Ok(true)
    }

    /// Providers that currently have a record
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

fn load_file(path: &Path) -> BTreeMap<String, TokenRecord> {
    match read_file(path) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                "Ignoring unreadable token file: {e}"
            );
            BTreeMap::new()
        }
    }
}

fn read_file(path: &Path) -> Result<BTreeMap<String, TokenRecord>, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Atomically replace the token file: write a sibling temp file, then rename
fn write_file(path: &Path, records: &BTreeMap<String, TokenRecord>) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(records)?;
    let temp_path = path.with_extension("json.tmp");
    let result = write_temp(&temp_path, content.as_bytes())
        .and_then(|()| std::fs::rename(&temp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result.map_err(StorageError::from)
}

/// Write `content` to a user-only file, syncing before returning
fn write_temp(temp_path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(temp_path)?;
    // A leftover temp file keeps its old mode through open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)?;
    file.write_all(b"\n")?;
    file.sync_all()
}

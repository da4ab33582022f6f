//! Persisted credential pair storage
//!
//! Holds the current access/refresh token pair in memory behind a tokio Mutex
//! and mirrors it to a JSON file with two fixed keys. All writes go through
//! temp-file + rename, so the file holds either the previous pair or the new
//! one, never a mix. The in-memory pair is only replaced after the file write
//! succeeds.
//!
//! Reads clone a snapshot under the lock, so a caller can never observe the
//! access token of one exchange next to the refresh token of another.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Access and refresh token issued by the same exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(rename = "accessToken")]
    pub access: Secret<String>,
    #[serde(rename = "refreshToken")]
    pub refresh: Secret<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: Secret::new(refresh.into()),
        }
    }
}

/// On-disk shape. Both keys are optional here so a half-written file from an
/// older client can be detected and discarded instead of failing the load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTokens {
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    access: Option<Secret<String>>,
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    refresh: Option<Secret<String>>,
}

impl PersistedTokens {
    fn into_pair(self, path: &Path) -> Option<CredentialPair> {
        match (self.access, self.refresh) {
            (Some(access), Some(refresh)) => Some(CredentialPair { access, refresh }),
            (None, None) => None,
            _ => {
                warn!(path = %path.display(), "credential file holds a single token, discarding");
                None
            }
        }
    }
}

impl From<&CredentialPair> for PersistedTokens {
    fn from(pair: &CredentialPair) -> Self {
        Self {
            access: Some(pair.access.clone()),
            refresh: Some(pair.refresh.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    pair: Option<CredentialPair>,
    /// Bumped on every write or clear that changes the stored pair
    revision: u64,
}

/// Process-wide credential store.
///
/// `path: None` keeps the pair in memory only (tests, ephemeral sessions).
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl CredentialStore {
    /// Load the credential pair from the given file path.
    ///
    /// A missing file is a signed-out client. Unparseable content or a file
    /// holding only one token is also treated as signed out.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let pair = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            match serde_json::from_str::<PersistedTokens>(&contents) {
                Ok(tokens) => tokens.into_pair(&path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "credential file unreadable, starting signed out");
                    None
                }
            }
        } else {
            None
        };
        info!(path = %path.display(), signed_in = pair.is_some(), "loaded credentials");

        Ok(Self {
            path: Some(path),
            state: Mutex::new(StoreState { pair, revision: 0 }),
        })
    }

    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// In-memory store seeded with a pair.
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState {
                pair: Some(pair),
                revision: 0,
            }),
        }
    }

    /// Snapshot of the current pair.
    pub async fn get(&self) -> Option<CredentialPair> {
        self.state.lock().await.pair.clone()
    }

    pub async fn access_token(&self) -> Option<Secret<String>> {
        self.state.lock().await.pair.as_ref().map(|p| p.access.clone())
    }

    pub async fn refresh_token(&self) -> Option<Secret<String>> {
        self.state
            .lock()
            .await
            .pair
            .as_ref()
            .map(|p| p.refresh.clone())
    }

    pub async fn revision(&self) -> u64 {
        self.state.lock().await.revision
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pair.is_none()
    }

    /// Pair and revision read under one lock.
    pub async fn snapshot(&self) -> (Option<CredentialPair>, u64) {
        let state = self.state.lock().await;
        (state.pair.clone(), state.revision)
    }

    /// Replace the stored pair.
    ///
    /// On a write failure the previous pair stays in place, both on disk and
    /// in memory.
    pub async fn set(&self, pair: CredentialPair) -> Result<()> {
        let mut state = self.state.lock().await;
        self.store_locked(&mut state, pair).await
    }

    /// Replace the stored pair only if nothing changed it since `expected`.
    ///
    /// Returns `Ok(false)` without touching the store when the revision has
    /// moved on (a logout, login or clear happened in between).
    pub async fn set_if_revision(&self, pair: CredentialPair, expected: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.revision != expected {
            debug!(
                revision = state.revision,
                expected, "store changed, discarding credential pair"
            );
            return Ok(false);
        }
        self.store_locked(&mut state, pair).await?;
        Ok(true)
    }

    /// Drop both tokens and return the revision after the clear.
    ///
    /// Always clears in memory. A failure to remove the file is logged; the
    /// next successful write or clear will overwrite it.
    pub async fn clear(&self) -> u64 {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state).await;
        state.revision
    }

    /// Clear only if the store is still at `expected`.
    pub async fn clear_if_revision(&self, expected: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.revision != expected {
            return false;
        }
        self.clear_locked(&mut state).await;
        true
    }

    async fn store_locked(&self, state: &mut StoreState, pair: CredentialPair) -> Result<()> {
        if let Some(path) = &self.path {
            write_atomic(path, &PersistedTokens::from(&pair)).await?;
        }
        state.pair = Some(pair);
        state.revision += 1;
        debug!(revision = state.revision, "stored credential pair");
        Ok(())
    }

    async fn clear_locked(&self, state: &mut StoreState) {
        if state.pair.take().is_some() {
            state.revision += 1;
            debug!(revision = state.revision, "cleared credential pair");
        }
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove credential file")
                }
            }
        }
    }
}

/// Write tokens to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over the
/// target. Sets permissions to 0600 since the file contains bearer tokens.
async fn write_atomic(path: &Path, tokens: &PersistedTokens) -> Result<()> {
    let json = serde_json::to_string_pretty(tokens)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        store.set(CredentialPair::new("A1", "R1")).await.unwrap();

        let store2 = CredentialStore::load(path).await.unwrap();
        let pair = store2.get().await.unwrap();
        assert_eq!(pair.access.expose_str(), "A1");
        assert_eq!(pair.refresh.expose_str(), "R1");
    }

    #[tokio::test]
    async fn file_uses_fixed_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set(CredentialPair::new("A1", "R1")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["accessToken"], "A1");
        assert_eq!(parsed["refreshToken"], "R1");
    }

    #[tokio::test]
    async fn missing_file_starts_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.is_none());
        assert!(!path.exists(), "loading must not create the file");
    }

    #[tokio::test]
    async fn half_populated_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, r#"{"accessToken":"A1"}"#)
            .await
            .unwrap();

        let store = CredentialStore::load(path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn garbage_file_is_treated_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "not json {{{").await.unwrap();

        let store = CredentialStore::load(path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_both_tokens_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set(CredentialPair::new("A1", "R1")).await.unwrap();
        assert!(path.exists());

        store.clear().await;
        assert!(store.access_token().await.is_none());
        assert!(store.refresh_token().await.is_none());
        assert!(!path.exists());

        let reloaded = CredentialStore::load(path).await.unwrap();
        assert!(reloaded.is_empty().await);
    }

    #[tokio::test]
    async fn revision_tracks_state_changes_only() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.revision().await, 0);
        assert_eq!(store.clear().await, 0, "clearing an empty store is a no-op");

        store.set(CredentialPair::new("A1", "R1")).await.unwrap();
        assert_eq!(store.revision().await, 1);
        assert_eq!(store.clear().await, 2);
        assert_eq!(store.clear().await, 2);
    }

    #[tokio::test]
    async fn set_if_revision_rejects_stale_writer() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        let (_, seen) = store.snapshot().await;

        store.clear().await;
        let written = store
            .set_if_revision(CredentialPair::new("A2", "R2"), seen)
            .await
            .unwrap();

        assert!(!written, "a pair read before the clear must not come back");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn set_if_revision_writes_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set(CredentialPair::new("A1", "R1")).await.unwrap();
        let (_, seen) = store.snapshot().await;

        let written = store
            .set_if_revision(CredentialPair::new("A2", "R2"), seen)
            .await
            .unwrap();

        assert!(written);
        assert_eq!(store.revision().await, seen + 1);
        let on_disk = CredentialStore::load(path).await.unwrap().get().await;
        assert_eq!(on_disk, Some(CredentialPair::new("A2", "R2")));
    }

    #[tokio::test]
    async fn clear_if_revision_spares_newer_login() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        let (_, seen) = store.snapshot().await;
        store.set(CredentialPair::new("B1", "S1")).await.unwrap();

        assert!(!store.clear_if_revision(seen).await);
        assert_eq!(store.get().await, Some(CredentialPair::new("B1", "S1")));

        let (_, current) = store.snapshot().await;
        assert!(store.clear_if_revision(current).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        // Parent is a regular file, so create_dir_all fails.
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, "x").await.unwrap();
        let store = CredentialStore {
            path: Some(blocker.join("credentials.json")),
            state: Mutex::new(StoreState {
                pair: Some(CredentialPair::new("A1", "R1")),
                revision: 3,
            }),
        };

        let result = store.set(CredentialPair::new("A2", "R2")).await;
        assert!(result.is_err());
        let pair = store.get().await.unwrap();
        assert_eq!(pair.access.expose_str(), "A1");
        assert_eq!(pair.refresh.expose_str(), "R1");
        assert_eq!(store.revision().await, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set(CredentialPair::new("A1", "R1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_leave_a_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(CredentialPair::new(format!("A{i}"), format!("R{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let pair = store.get().await.unwrap();
        assert_eq!(
            &pair.access.expose_str()[1..],
            &pair.refresh.expose_str()[1..],
            "access and refresh must come from the same write"
        );

        let on_disk = CredentialStore::load(path).await.unwrap().get().await.unwrap();
        assert_eq!(on_disk, pair);
    }
}

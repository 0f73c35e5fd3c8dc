//! On-disk credential cache.
//!
//! Two restricted-permission files live under the credential directory:
//! the serialized [`TokenState`] and a one-line bearer header for HTTP layers
//! that read authentication headers from a file.

use crate::error::AuthError;
use std::path::{Path, PathBuf};

use super::TokenState;

/// Persistent home of the current [`TokenState`]
#[derive(Clone, Debug)]
pub struct CredentialStore {
    token_path: PathBuf,
    header_path: PathBuf,
}

impl CredentialStore {
    /// Store writing to the given token and header paths
    pub fn new(token_path: impl Into<PathBuf>, header_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            header_path: header_path.into(),
        }
    }

    /// Store using `token.json` and `bearer_header` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("token.json"), dir.join("bearer_header"))
    }

    /// Path of the serialized token state
    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Path of the bearer header file
    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    /// Load the persisted state
    ///
    /// A missing file is not an error. A corrupt file is logged and treated as
    /// absent so the manager falls through to password authentication.
    pub async fn load(&self) -> Result<Option<TokenState>, AuthError> {
        let bytes = match tokio::fs::read(&self.token_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(&self.token_path, e)),
        };

        match serde_json::from_slice::<TokenState>(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(
                    path = %self.token_path.display(),
                    error = %e,
                    "ignoring unreadable token cache"
                );
                Ok(None)
            }
        }
    }

    /// Persist the state atomically with owner-only permissions
    pub async fn save(&self, state: &TokenState) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(state).map_err(|e| AuthError::Store {
            path: self.token_path.clone(),
            reason: e.to_string(),
        })?;
        write_restricted(&self.token_path, &json).await
    }

    /// Write `Authorization: Bearer <token>` for downstream HTTP readers
    pub async fn write_header(&self, access_token: &str) -> Result<(), AuthError> {
        let line = format!("Authorization: Bearer {access_token}\n");
        write_restricted(&self.header_path, line.as_bytes()).await
    }

    /// Remove both files; missing files are fine
    pub async fn clear(&self) -> Result<(), AuthError> {
        for path in [&self.token_path, &self.header_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(store_error(path, e)),
            }
        }
        Ok(())
    }
}

fn store_error(path: &Path, e: std::io::Error) -> AuthError {
    AuthError::Store {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Write to a sibling temp file with mode 0600, then rename over `path`
async fn write_restricted(path: &Path, contents: &[u8]) -> Result<(), AuthError> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| store_error(parent, e))?;
    }

    let tmp = crate::utils::partial_path(path);
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp).await.map_err(|e| store_error(&tmp, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| store_error(&tmp, e))?;
    file.sync_all().await.map_err(|e| store_error(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| store_error(path, e))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn state() -> TokenState {
        let now = Utc::now();
        TokenState {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            access_expires_at: now + Duration::seconds(270),
            refresh_expires_at: now + Duration::seconds(3540),
        }
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_returns_same_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path().join("nested"));
        let original = state();

        store.save(&original).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded, original);
        assert!(
            !crate::utils::partial_path(store.token_path()).exists(),
            "temp file must be renamed away"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path());
        store.save(&state()).await.unwrap();
        store.write_header("abc").await.unwrap();

        for path in [store.token_path(), store.header_path()] {
            let mode = std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600, "{} has mode {:o}", path.display(), mode);
        }
    }

    #[tokio::test]
    async fn header_file_contains_bearer_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path());
        store.write_header("tok-123").await.unwrap();

        let contents = std::fs::read_to_string(store.header_path()).unwrap();
        assert_eq!(contents, "Authorization: Bearer tok-123\n");
    }

    #[tokio::test]
    async fn corrupt_cache_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path());
        std::fs::write(store.token_path(), b"{not json").unwrap();

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path());
        store.save(&state()).await.unwrap();
        store.write_header("abc").await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(!store.token_path().exists());
        assert!(!store.header_path().exists());
    }
}

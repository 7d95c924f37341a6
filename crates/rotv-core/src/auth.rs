//! Per-module persisted credentials and provider tokens.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Credential + token bundle for one module.
///
/// `auth_tokens` is either empty (unauthenticated) or ordered with the most
/// recently usable token first. Mutated only after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub username: String,
    pub password: String,
    pub auth_tokens: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl Default for AuthRecord {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            auth_tokens: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl AuthRecord {
    /// True when the first token exists and is non-empty. A non-empty list
    /// with a blank first token does not count as authenticated.
    pub fn has_token(&self) -> bool {
        self.auth_tokens.first().is_some_and(|t| !t.is_empty())
    }

    pub fn primary_token(&self) -> Option<&str> {
        self.auth_tokens.first().map(String::as_str).filter(|t| !t.is_empty())
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum AuthStoreError {
    #[error("failed to persist auth record for '{module}': {source}")]
    Io {
        module: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize auth record for '{module}': {source}")]
    Serialize {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed store of [`AuthRecord`]s, one JSON file per module.
///
/// Saves are atomic (write temp, then rename) so a crash mid-write never
/// corrupts the on-disk record; the last successful save wins wholesale.
#[derive(Debug, Clone)]
pub struct AuthStore {
    dir: PathBuf,
}

impl AuthStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, module_id: &str) -> PathBuf {
        self.dir.join(format!("{module_id}.json"))
    }

    /// Loads the record for `module_id`. A missing or unreadable file
    /// degrades to the zero-value record instead of failing the request.
    pub fn load(&self, module_id: &str) -> AuthRecord {
        let path = self.record_path(module_id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return AuthRecord::default(),
            Err(e) => {
                warn!(module = module_id, error = %e, "Failed to read auth record");
                return AuthRecord::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(module = module_id, error = %e, "Ignoring corrupt auth record");
                AuthRecord::default()
            }
        }
    }

    pub fn save(&self, module_id: &str, record: &AuthRecord) -> Result<(), AuthStoreError> {
        let io_err = |source| AuthStoreError::Io {
            module: module_id.to_string(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(record).map_err(|source| {
            AuthStoreError::Serialize {
                module: module_id.to_string(),
                source,
            }
        })?;

        let path = self.record_path(module_id);
        let tmp = self.dir.join(format!("{module_id}.json.tmp"));
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (AuthStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("rotv-auth-{}", uuid::Uuid::new_v4()));
        (AuthStore::new(&dir), dir)
    }

    #[test]
    fn load_missing_returns_default() {
        let (store, dir) = temp_store();
        let record = store.load("antena-play");
        assert!(record.auth_tokens.is_empty());
        assert!(!record.has_token());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_then_load_roundtrip() {
        let (store, dir) = temp_store();
        let record = AuthRecord {
            username: "user@example.com".into(),
            password: "secret".into(),
            auth_tokens: vec!["tok-1".into(), "refresh-1".into()],
            last_updated: Utc::now(),
        };
        store.save("antena-play", &record).unwrap();

        let loaded = store.load("antena-play");
        assert_eq!(loaded.username, "user@example.com");
        assert_eq!(loaded.auth_tokens, vec!["tok-1", "refresh-1"]);
        assert_eq!(loaded.primary_token(), Some("tok-1"));
        assert!(loaded.has_token());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_overwrites_entirely() {
        let (store, dir) = temp_store();
        let mut record = AuthRecord {
            username: "u".into(),
            password: "p".into(),
            auth_tokens: vec!["old".into(), "old-refresh".into()],
            last_updated: Utc::now(),
        };
        store.save("demo", &record).unwrap();

        record.auth_tokens = vec!["new".into()];
        store.save("demo", &record).unwrap();

        assert_eq!(store.load("demo").auth_tokens, vec!["new"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_record_degrades_to_default() {
        let (store, dir) = temp_store();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("demo.json"), b"{{{").unwrap();

        let record = store.load("demo");
        assert!(record.auth_tokens.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn blank_first_token_is_not_authenticated() {
        let record = AuthRecord {
            auth_tokens: vec![String::new(), "x".into()],
            ..AuthRecord::default()
        };
        assert!(!record.has_token());
        assert_eq!(record.primary_token(), None);
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let (store, dir) = temp_store();
        store.save("demo", &AuthRecord::default()).unwrap();
        assert!(!dir.join("demo.json.tmp").exists());
        assert!(dir.join("demo.json").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}

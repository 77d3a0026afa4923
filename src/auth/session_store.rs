//! Cached session tokens with expiry and owner-only file permissions.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::auth::credentials;
use crate::common::config;

/// Archive sessions expire server-side after inactivity; the cache assumes
/// this lifetime when the server does not say otherwise.
pub const SESSION_LIFETIME_HOURS: i64 = 12;

/// Cached session token with metadata. Written once per successful
/// authentication, invalidated on logout or detected expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub token: String,
    pub url: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedSession {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }
}

/// File-backed store for one cached session. All mutation goes through
/// `save`/`clear`; readers get owned copies.
#[derive(Debug, Clone)]
pub struct SessionStore {
    cache_file: PathBuf,
}

impl SessionStore {
    pub fn new(cache_file: PathBuf) -> Self {
        Self { cache_file }
    }

    pub fn default_location() -> Self {
        Self::new(config::session_cache_path())
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Persist a freshly issued token. Restrictive permissions are best
    /// effort: failure to chmod is reported, not fatal.
    pub fn save(&self, token: &str, url: &str, username: &str) -> Result<CachedSession> {
        let now = Utc::now();
        let session = CachedSession {
            token: token.to_string(),
            url: url.to_string(),
            username: username.to_string(),
            created_at: now,
            expires_at: Some(now + Duration::hours(SESSION_LIFETIME_HOURS)),
        };

        if let Some(parent) = self.cache_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let body = serde_json::to_vec(&session).context("Failed to serialize session cache")?;
        std::fs::write(&self.cache_file, body)
            .with_context(|| format!("Failed to write {}", self.cache_file.display()))?;

        restrict_permissions(&self.cache_file);

        Ok(session)
    }

    /// Load the cached session, filtering by owning URL. Expired or
    /// unreadable entries are cleared and reported as absent.
    pub fn load(&self, url: Option<&str>) -> Option<CachedSession> {
        let raw = std::fs::read(&self.cache_file).ok()?;

        let session: CachedSession = match serde_json::from_slice(&raw) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(
                    path = %self.cache_file.display(),
                    error = %err,
                    "discarding unreadable session cache"
                );
                self.clear();
                return None;
            }
        };

        if let Some(url) = url {
            if session.url != url {
                return None;
            }
        }

        if session.is_expired() {
            self.clear();
            return None;
        }

        Some(session)
    }

    /// Remove the cache file. Returns whether anything was deleted.
    pub fn clear(&self) -> bool {
        match std::fs::remove_file(&self.cache_file) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                tracing::warn!(
                    path = %self.cache_file.display(),
                    error = %err,
                    "failed to remove session cache"
                );
                false
            }
        }
    }

    /// Token resolution: environment first, then the cache.
    pub fn session_token(&self, url: Option<&str>) -> Option<String> {
        if let Some(token) = credentials::token_from_env() {
            return Some(token);
        }
        self.load(url).map(|session| session.token)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let restricted = std::fs::Permissions::from_mode(0o600);
    if let Err(err) = std::fs::set_permissions(path, restricted) {
        tracing::warn!(
            path = %path.display(),
            error = %err,
            "failed to restrict session cache permissions"
        );
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SessionStore {
        SessionStore::new(dir.path().join(".session"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .save("tok-123", "https://archive.example.org", "alice")
            .unwrap();
        let session = store
            .load(Some("https://archive.example.org"))
            .expect("session should load");

        assert_eq!(session.token, "tok-123");
        assert_eq!(session.username, "alice");
        assert!(!session.is_expired());
    }

    #[test]
    fn url_mismatch_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .save("tok-123", "https://archive.example.org", "alice")
            .unwrap();
        assert!(store.load(Some("https://other.example.org")).is_none());
    }

    #[test]
    fn expired_session_is_cleared_on_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut session = store
            .save("tok-123", "https://archive.example.org", "alice")
            .unwrap();
        session.expires_at = Some(Utc::now() - Duration::hours(1));
        std::fs::write(store.cache_file(), serde_json::to_vec(&session).unwrap()).unwrap();

        assert!(store.load(None).is_none());
        assert!(!store.cache_file().exists());
    }

    #[test]
    fn garbage_cache_is_cleared_on_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        std::fs::write(store.cache_file(), b"not json").unwrap();
        assert!(store.load(None).is_none());
        assert!(!store.cache_file().exists());
    }

    #[test]
    fn clear_reports_whether_anything_was_removed() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(!store.clear());
        store
            .save("tok-123", "https://archive.example.org", "alice")
            .unwrap();
        assert!(store.clear());
    }

    #[cfg(unix)]
    #[test]
    fn cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .save("tok-123", "https://archive.example.org", "alice")
            .unwrap();

        let mode = std::fs::metadata(store.cache_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

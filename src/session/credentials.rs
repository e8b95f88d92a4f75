//! Persistent credential storage
//!
//! The session triple survives between runs in `session.json` under the
//! config directory. Writes take an exclusive `fs2` lock on a sidecar
//! lock file and go through a temp file plus rename, so a crash never
//! leaves a half-written session on disk.
//!
//! A browser cookie string in `BILIBILI_COOKIE` can stand in for a QR
//! login.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::Session;
use crate::error::{FavError, Result};

pub const COOKIE_ENV: &str = "BILIBILI_COOKIE";

/// Get/set of the persisted session
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file store with exclusive locking
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes writers within this process; `fs2` covers other processes
    write_guard: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    /// Store at `<config_dir>/favsort/session.json`
    pub fn default_location() -> Self {
        Self::new(crate::config::config_dir().join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FavError::storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        Ok(())
    }

    /// Open and exclusively lock the sidecar file; the lock lives as long as the handle
    fn acquire_lock(&self) -> Result<File> {
        self.ensure_dir()?;
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| FavError::storage(format!("Failed to open lock file: {}", e)))?;

        lock_file
            .lock_exclusive()
            .map_err(|e| FavError::storage(format!("Failed to acquire lock: {}", e)))?;

        Ok(lock_file)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)
            .map_err(|e| FavError::storage(format!("Failed to read session file: {}", e)))?;

        match serde_json::from_str::<Session>(&json) {
            Ok(session) => {
                tracing::debug!(path = %self.path.display(), user_id = %session.user_id, "Loaded stored session");
                Ok(Some(session))
            }
            Err(e) => {
                // A corrupt file is treated as "no session"; the next login overwrites it
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| FavError::storage("Session store lock poisoned"))?;
        let _lock = self.acquire_lock()?;

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;

        fs::write(&temp_path, json)
            .map_err(|e| FavError::storage(format!("Failed to write session temp file: {}", e)))?;
        restrict_permissions(&temp_path);
        fs::rename(&temp_path, &self.path)
            .map_err(|e| FavError::storage(format!("Failed to rename session file: {}", e)))?;

        tracing::info!(path = %self.path.display(), user_id = %session.user_id, "Saved session");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| FavError::storage("Session store lock poisoned"))?;
        let _lock = self.acquire_lock()?;

        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| FavError::storage(format!("Failed to delete session file: {}", e)))?;
            tracing::info!(path = %self.path.display(), "Cleared stored session");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::debug!(error = %e, "Could not restrict session file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Session from a browser cookie string in `BILIBILI_COOKIE`.
///
/// Unset or blank is `Ok(None)`; a cookie missing any of the three
/// required fields is a configuration error.
pub fn session_from_env<F>(lookup: F) -> Result<Option<Session>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(cookie) = lookup(COOKIE_ENV).filter(|c| !c.trim().is_empty()) else {
        return Ok(None);
    };
    Session::from_cookie_str(&cookie).map(Some).ok_or_else(|| {
        FavError::config(format!(
            "{} must contain SESSDATA, bili_jct and DedeUserID",
            COOKIE_ENV
        ))
    })
}

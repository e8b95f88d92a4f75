use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyring::Entry;
use std::fs;
use std::path::PathBuf;

use crate::error::{FavError, Result};

const SERVICE_NAME: &str = "com.favsort.cli";
const ACCOUNT: &str = "ai_api_key";

/// Keychain storage for the AI API key, with a file fallback in debug builds
pub struct CredentialManager;

impl CredentialManager {
    /// Fallback file for storing the key (dev mode only)
    fn get_fallback_path() -> PathBuf {
        crate::config::config_dir().join("ai_key")
    }

    /// Store the API key in the keychain (with file fallback in dev mode)
    pub fn store_api_key(api_key: &str) -> Result<()> {
        match Entry::new(SERVICE_NAME, ACCOUNT) {
            Ok(entry) => {
                if entry.set_password(api_key).is_ok() {
                    tracing::debug!("Stored AI API key in keychain");
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Keychain unavailable");
            }
        }

        if !cfg!(debug_assertions) {
            return Err(FavError::storage(
                "Secure credential storage (keychain) unavailable",
            ));
        }

        let path = Self::get_fallback_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FavError::storage(format!("Failed to create config directory: {}", e)))?;
        }

        // Minimal obfuscation only; dev builds never rely on this for secrecy
        fs::write(&path, STANDARD.encode(api_key))
            .map_err(|e| FavError::storage(format!("Failed to write API key: {}", e)))?;

        tracing::warn!(path = %path.display(), "DEV MODE: stored AI API key in file");
        Ok(())
    }

    /// Get the API key from the keychain (with file fallback in dev mode)
    pub fn get_api_key() -> Result<String> {
        if let Ok(entry) = Entry::new(SERVICE_NAME, ACCOUNT) {
            if let Ok(password) = entry.get_password() {
                tracing::debug!("Retrieved AI API key from keychain");
                return Ok(password);
            }
        }

        if cfg!(debug_assertions) {
            let path = Self::get_fallback_path();
            if path.exists() {
                let encoded = fs::read_to_string(&path)
                    .map_err(|e| FavError::storage(format!("Failed to read API key: {}", e)))?;
                return decode_key(&encoded);
            }
        }

        Err(FavError::config("AI API key not found"))
    }

    /// Delete the API key from the keychain and file storage
    pub fn delete_api_key() -> Result<()> {
        if let Ok(entry) = Entry::new(SERVICE_NAME, ACCOUNT) {
            let _ = entry.delete_credential();
            tracing::debug!("Deleted AI API key from keychain");
        }

        if cfg!(debug_assertions) {
            let path = Self::get_fallback_path();
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| FavError::storage(format!("Failed to delete API key file: {}", e)))?;
            }
        }

        Ok(())
    }
}

fn decode_key(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| FavError::storage(format!("Corrupt API key file: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| FavError::storage(format!("Invalid UTF-8 in API key file: {}", e)))
}

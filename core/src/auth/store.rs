//! Durable persistence for the session's two bearer tokens.
//!
//! The store mirrors a browser profile's key/value storage: one JSON file
//! in the profile directory that survives process restarts and may be
//! wiped externally (another client logging out) at any time. Callers
//! treat a subsequent load miss as "not authenticated".

use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File holding the persisted token pair.
const TOKENS_FILE: &str = "tokens.json";

/// Persistence failures for the profile-directory JSON files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed store file: {0}")]
    Json(#[from] serde_json::Error),
}

/// The durable projection of the session's two token fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl PersistedTokens {
    /// Both tokens present, the precondition for restoring a session.
    pub fn is_complete(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }
}

/// File-backed store for the access/refresh token pair.
///
/// No network or retry logic lives here; the store only reads and writes
/// the pair.
#[derive(Debug, Clone)]
pub struct TokenStore {
    home: PathBuf,
}

impl TokenStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    fn file_path(&self) -> PathBuf {
        self.home.join(TOKENS_FILE)
    }

    /// Loads whatever is currently stored. A missing file reads as an
    /// empty pair.
    pub fn load(&self) -> Result<PersistedTokens, StoreError> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(PersistedTokens::default());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes both tokens in one file write, so the pair is never observed
    /// half-written.
    pub fn save(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        self.write(&PersistedTokens {
            access_token: Some(access.to_string()),
            refresh_token: Some(refresh.to_string()),
        })
    }

    /// Replaces the access token, keeping the stored refresh token.
    ///
    /// Used after a successful refresh.
    pub fn save_access(&self, access: &str) -> Result<(), StoreError> {
        let mut tokens = self.load()?;
        tokens.access_token = Some(access.to_string());
        self.write(&tokens)
    }

    /// Removes both tokens. Clearing an already-absent file succeeds.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.file_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, tokens: &PersistedTokens) -> Result<(), StoreError> {
        fs::create_dir_all(&self.home)?;
        let path = self.file_path();

        // Tokens are credentials; keep the file owner-readable only.
        #[cfg(unix)]
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;

        #[cfg(not(unix))]
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let json = serde_json::to_string_pretty(tokens)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

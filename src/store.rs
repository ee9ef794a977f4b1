use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One persisted browser cookie. Expiry is not round-tripped; restored
/// cookies live as session cookies and the login probe catches stale jars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
}

/// Injected capability for login-state persistence between runs.
pub trait SessionStore {
    /// `Ok(None)` when no prior session was saved.
    fn load(&self) -> Result<Option<Vec<StoredCookie>>>;
    fn save(&self, cookies: &[StoredCookie]) -> Result<()>;
}

/// JSON file on disk, one array of cookies.
pub struct JsonCookieFile {
    path: PathBuf,
}

impl JsonCookieFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for JsonCookieFile {
    fn load(&self) -> Result<Option<Vec<StoredCookie>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading cookie jar {}", self.path.display()))?;
        let cookies = serde_json::from_str(&raw)
            .with_context(|| format!("parsing cookie jar {}", self.path.display()))?;
        Ok(Some(cookies))
    }

    fn save(&self, cookies: &[StoredCookie]) -> Result<()> {
        let raw = serde_json::to_string_pretty(cookies)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing cookie jar {}", self.path.display()))?;
        Ok(())
    }
}

// ── Tests ──

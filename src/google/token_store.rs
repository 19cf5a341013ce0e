//! OAuth token file persistence.

use std::path::{Path, PathBuf};

use super::{GoogleApiError, GoogleToken};

/// JSON token file at a configured path
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<GoogleToken, GoogleApiError> {
        if !self.path.exists() {
            return Err(GoogleApiError::TokenNotFound(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path)?;
        let token: GoogleToken = serde_json::from_str(&content)?;
        Ok(token)
    }

    /// Write the token, readable by the owner only on unix.
    pub fn save(&self, token: &GoogleToken) -> Result<(), GoogleApiError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Sibling file, then rename
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(token)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;

        log::debug!("Saved Google token to {}", self.path.display());
        Ok(())
    }
}

//! Credential handling for the remote mailbox API.
//!
//! Loads a previously provisioned OAuth2 token from the account's data
//! directory and refreshes it against the token endpoint when expired.
//! Interactive consent is out of scope: a missing or unrefreshable token is a
//! fatal precondition, surfaced before any sync state is touched.

use crate::config::AccountConfig;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the token file inside an account's data directory.
pub const TOKEN_FILE_NAME: &str = "token.json";

/// OAuth2 token endpoint for Google accounts.
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry to absorb clock skew.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= at,
            None => false,
        }
    }

    fn load(path: &Path) -> Result<Credentials> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Credential(format!(
                "no usable token at {} ({}); provision one for this account first",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::Credential(format!("malformed token file: {}", e)))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|e| {
            SyncError::Credential(format!("failed to save token to {}: {}", path.display(), e))
        })
    }
}

fn token_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TOKEN_FILE_NAME)
}

/// Retrieve valid credentials for `account`, refreshing and re-persisting the
/// stored token when it has expired.
pub async fn get_credentials(account: &AccountConfig) -> Result<Credentials> {
    let path = token_path(&account.data_dir);
    let mut creds = Credentials::load(&path)?;

    if !creds.is_expired() {
        debug!(account = %account.name, "stored token still valid");
        return Ok(creds);
    }

    let refresh_token = creds.refresh_token.clone().ok_or_else(|| {
        SyncError::Credential("token expired and no refresh token available".to_string())
    })?;

    info!(account = %account.name, "access token expired, refreshing");

    let client = reqwest::Client::new();
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("client_id", account.client_id.as_str()),
            ("client_secret", account.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .map_err(|e| SyncError::Credential(format!("token refresh request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(SyncError::Credential(format!(
            "token refresh rejected with HTTP {}",
            response.status()
        )));
    }

    let refreshed: RefreshResponse = response
        .json()
        .await
        .map_err(|e| SyncError::Credential(format!("malformed token refresh response: {}", e)))?;

    creds.access_token = refreshed.access_token;
    creds.expires_at = refreshed
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs));
    creds.save(&path)?;

    Ok(creds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: Option<DateTime<Utc>>) -> Credentials {
        Credentials {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at,
        }
    }

    #[test]
    fn token_without_expiry_never_expires() {
        assert!(!creds(None).is_expired());
    }

    #[test]
    fn token_expiring_soon_counts_as_expired() {
        // Inside the refresh margin.
        assert!(creds(Some(Utc::now() + Duration::seconds(30))).is_expired());
        assert!(creds(Some(Utc::now() - Duration::hours(1))).is_expired());
        assert!(!creds(Some(Utc::now() + Duration::hours(1))).is_expired());
    }

    #[test]
    fn token_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = token_path(dir.path());

        let original = creds(Some(Utc::now() + Duration::hours(1)));
        original.save(&path).unwrap();

        let loaded = Credentials::load(&path).unwrap();
        assert_eq!(loaded.access_token, original.access_token);
        assert_eq!(loaded.refresh_token, original.refresh_token);
    }

    #[test]
    fn missing_token_is_a_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Credentials::load(&token_path(dir.path())).unwrap_err();
        assert!(matches!(err, SyncError::Credential(_)));
    }
}

//! OAuth token storage
//!
//! Persists delivered OAuth tokens to disk so an integration stays connected
//! across restarts until it is explicitly disconnected.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Token material delivered by an OAuth callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,

    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Provider instance URL (e.g. a Salesforce org)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,

    /// Provider subdomain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    /// Additional named values from the token response
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,

    /// When the tokens arrived
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl TokenSet {
    /// Create a token set holding only an access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            instance_url: None,
            subdomain: None,
            extras: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Look up a value usable for substitution and injection
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        match name {
            "instance_url" => self.instance_url.as_deref(),
            "subdomain" => self.subdomain.as_deref(),
            other => self.extras.get(other).map(String::as_str),
        }
        .filter(|v| !v.is_empty())
    }

    /// All non-empty substitution values carried by the tokens
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, String> {
        let mut values: BTreeMap<String, String> = self
            .extras
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(url) = self.value("instance_url") {
            values.insert("instance_url".to_string(), url.to_string());
        }
        if let Some(sub) = self.value("subdomain") {
            values.insert("subdomain".to_string(), sub.to_string());
        }
        values
    }
}

/// File-backed token storage, one JSON file per integration
pub struct TokenStorage {
    base_dir: PathBuf,
}

impl TokenStorage {
    /// Create a token storage in the given directory
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)?;
        }

        Ok(Self { base_dir })
    }

    /// Create token storage in the default location (~/.integration-tester/tokens)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Internal("Cannot determine home directory".to_string()))?;

        Self::new(home.join(".integration-tester").join("tokens"))
    }

    fn storage_key(integration: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(integration.as_bytes());
        let hash = hex::encode(hasher.finalize());
        hash[..16].to_string()
    }

    fn token_path(&self, integration: &str) -> PathBuf {
        let key = Self::storage_key(integration);
        self.base_dir.join(format!("{key}_tokens.json"))
    }

    /// Load tokens for an integration
    pub fn load(&self, integration: &str) -> Option<TokenSet> {
        let path = self.token_path(integration);

        if !path.exists() {
            debug!(integration = %integration, "No stored tokens found");
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<TokenSet>(&content) {
                Ok(tokens) => {
                    info!(integration = %integration, received_at = %tokens.received_at, "Loaded stored tokens");
                    Some(tokens)
                }
                Err(e) => {
                    warn!(integration = %integration, error = %e, "Failed to parse stored tokens");
                    None
                }
            },
            Err(e) => {
                warn!(integration = %integration, error = %e, "Failed to read token file");
                None
            }
        }
    }

    /// Save tokens for an integration
    pub fn save(&self, integration: &str, tokens: &TokenSet) -> Result<()> {
        let path = self.token_path(integration);

        let content = serde_json::to_string_pretty(tokens)?;
        fs::write(&path, content)?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms);
        }

        info!(integration = %integration, "Saved OAuth tokens");
        Ok(())
    }

    /// Delete tokens for an integration
    pub fn delete(&self, integration: &str) -> Result<()> {
        let path = self.token_path(integration);

        if path.exists() {
            fs::remove_file(&path)?;
            info!(integration = %integration, "Deleted OAuth tokens");
        }

        Ok(())
    }
}

//! Per-integration authentication state
//!
//! Holds session credentials for API key and basic auth, OAuth tokens
//! delivered by an external redirect flow, and the single pending-OAuth
//! marker used to attribute an incoming token delivery.
//!
//! OAuth state per integration:
//!
//! ```text
//! Unauthenticated ──begin_oauth──▶ Authenticating ──complete_oauth──▶ Authenticated
//!        ▲                                                                  │
//!        └──────────────────────────── disconnect ─────────────────────────┘
//! ```
//!
//! Credentials are never logged.

mod storage;

pub use storage::{TokenSet, TokenStorage};

use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{AuthScheme, TokenPlacement};
use crate::{Error, Result};

/// Authentication status of one integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// No usable credential
    Unauthenticated,
    /// An OAuth flow was started and no token has arrived yet
    Authenticating,
    /// Credential material is present
    Authenticated,
}

/// Concrete credential placement derived from the auth state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthInjection {
    /// Header entry
    Header {
        /// Header name
        name: String,
        /// Header value
        value: String,
    },
    /// Query string entry
    Query {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },
}

/// One-shot OAuth token delivery from an external callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenDelivery {
    /// Integration the tokens belong to, when the callback knows it
    #[serde(default)]
    pub integration: Option<String>,
    /// Access token
    pub access_token: String,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Provider instance URL
    #[serde(default)]
    pub instance_url: Option<String>,
    /// Provider subdomain
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Additional named values
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl TokenDelivery {
    /// Delivery carrying only an access token
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: token.into(),
            ..Self::default()
        }
    }

    fn into_tokens(self) -> TokenSet {
        let mut tokens = TokenSet::new(self.access_token);
        tokens.refresh_token = self.refresh_token;
        tokens.instance_url = self.instance_url;
        tokens.subdomain = self.subdomain;
        tokens.extras = self.extras;
        tokens
    }
}

#[derive(Default)]
struct AuthStateInner {
    /// Session credentials (API key / basic), keyed by integration
    credentials: HashMap<String, BTreeMap<String, String>>,
    /// OAuth tokens, keyed by integration
    tokens: HashMap<String, TokenSet>,
    /// Integration awaiting a token delivery
    pending: Option<String>,
    /// Currently selected integration
    selected: Option<String>,
}

/// Per-integration credential cache with an explicit pending-OAuth marker
#[derive(Default)]
pub struct AuthStateManager {
    inner: RwLock<AuthStateInner>,
    default_target: Option<String>,
    storage: Option<TokenStorage>,
}

impl AuthStateManager {
    /// Create an empty manager without persistence
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Integration receiving tokens delivered while no flow is pending
    #[must_use]
    pub fn with_default_target(mut self, key: impl Into<String>) -> Self {
        self.default_target = Some(key.into());
        self
    }

    /// Persist OAuth tokens through the given storage
    #[must_use]
    pub fn with_storage(mut self, storage: TokenStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Record the selected integration
    ///
    /// Switching to a different integration discards every non-OAuth session
    /// credential. OAuth tokens are kept. Returns whether the selection changed.
    pub fn select_integration(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.selected.as_deref() == Some(key) {
            return false;
        }

        let dropped = inner.credentials.len();
        inner.credentials.retain(|k, _| k == key);
        if dropped > inner.credentials.len() {
            debug!(integration = %key, "Cleared session credentials on integration switch");
        }
        inner.selected = Some(key.to_string());
        true
    }

    /// Mark `key` as the target of the next token delivery
    pub fn begin_oauth(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.pending.as_deref() {
            Some(pending) if pending != key => Err(Error::Conflict(pending.to_string())),
            _ => {
                inner.pending = Some(key.to_string());
                info!(integration = %key, "OAuth flow started");
                Ok(())
            }
        }
    }

    /// Abandon a pending OAuth flow for `key`
    pub fn cancel_oauth(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.pending.as_deref() == Some(key) {
            inner.pending = None;
            info!(integration = %key, "OAuth flow cancelled");
            true
        } else {
            false
        }
    }

    /// Integration currently awaiting a token delivery
    #[must_use]
    pub fn pending(&self) -> Option<String> {
        self.inner.read().pending.clone()
    }

    /// Attribute delivered tokens and store them
    ///
    /// The target is the pending integration, else the integration named by
    /// the delivery, else the configured default target. Returns the key the
    /// tokens were attributed to.
    pub fn complete_oauth(&self, delivery: TokenDelivery) -> Result<String> {
        if delivery.access_token.is_empty() {
            return Err(Error::invalid_parameter("access_token", "must not be empty"));
        }

        let pending = self.pending();
        let target = pending
            .clone()
            .or_else(|| delivery.integration.clone())
            .or_else(|| {
                self.default_target.clone().inspect(|key| {
                    warn!(integration = %key, "Token delivery without pending flow, using default target");
                })
            })
            .ok_or_else(|| {
                Error::Config("Token delivery has no pending flow and no default target".to_string())
            })?;

        let tokens = delivery.into_tokens();
        if let Some(storage) = &self.storage {
            storage.save(&target, &tokens)?;
        }

        let mut inner = self.inner.write();
        inner.tokens.insert(target.clone(), tokens);
        // a flow begun while the file was written stays pending
        if inner.pending == pending {
            inner.pending = None;
        }
        info!(integration = %target, "OAuth tokens received");
        Ok(target)
    }

    /// Store session credentials (API key / basic) for an integration
    pub fn set_credential(&self, key: &str, fields: BTreeMap<String, String>) {
        debug!(integration = %key, fields = fields.len(), "Session credentials updated");
        self.inner.write().credentials.insert(key.to_string(), fields);
    }

    /// OAuth tokens for an integration, falling back to persisted storage
    pub fn tokens(&self, key: &str) -> Option<TokenSet> {
        if let Some(tokens) = self.inner.read().tokens.get(key) {
            return Some(tokens.clone());
        }

        let tokens = self.storage.as_ref()?.load(key)?;
        self.inner
            .write()
            .tokens
            .entry(key.to_string())
            .or_insert(tokens)
            .clone()
            .into()
    }

    /// Values an OAuth token delivery contributed for substitution
    ///
    /// Only the instance URL, the subdomain and the extras named in the
    /// scheme's `extra_params` are returned.
    #[must_use]
    pub fn auth_values(&self, key: &str, scheme: &AuthScheme) -> BTreeMap<String, String> {
        let names = scheme.auth_value_names();
        let Some(tokens) = self.tokens(key) else {
            return BTreeMap::new();
        };
        tokens
            .values()
            .into_iter()
            .filter(|(name, _)| names.contains(name.as_str()))
            .collect()
    }

    fn credential(&self, key: &str, field: &str) -> Option<String> {
        self.inner
            .read()
            .credentials
            .get(key)
            .and_then(|fields| fields.get(field))
            .filter(|v| !v.is_empty())
            .cloned()
    }

    /// Whether every credential field required by the scheme is present
    #[must_use]
    pub fn has_credentials(&self, key: &str, scheme: &AuthScheme) -> bool {
        match scheme {
            AuthScheme::None => true,
            AuthScheme::OAuth { .. } => self.tokens(key).is_some(),
            _ => scheme
                .credential_fields()
                .iter()
                .all(|field| self.credential(key, field).is_some()),
        }
    }

    /// Authentication status of an integration
    #[must_use]
    pub fn status(&self, key: &str, scheme: &AuthScheme) -> AuthStatus {
        if scheme.requires_credentials() && !self.has_credentials(key, scheme) {
            if scheme.is_oauth() && self.inner.read().pending.as_deref() == Some(key) {
                AuthStatus::Authenticating
            } else {
                AuthStatus::Unauthenticated
            }
        } else {
            AuthStatus::Authenticated
        }
    }

    /// Derive the credential placement for an integration
    ///
    /// Returns `None` when the scheme needs no credential or when the
    /// credential is absent.
    #[must_use]
    pub fn get_auth_header(&self, key: &str, scheme: &AuthScheme) -> Option<AuthInjection> {
        match scheme {
            AuthScheme::None => None,
            AuthScheme::ApiKey { header, prefix } => {
                let api_key = self.credential(key, "api_key")?;
                Some(AuthInjection::Header {
                    name: header.clone(),
                    value: format!("{}{api_key}", prefix.as_deref().unwrap_or("")),
                })
            }
            AuthScheme::Basic => {
                let username = self.credential(key, "username")?;
                let password = self.credential(key, "password")?;
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Some(AuthInjection::Header {
                    name: "Authorization".to_string(),
                    value: format!("Basic {encoded}"),
                })
            }
            AuthScheme::OAuth {
                token_placement, ..
            } => {
                let tokens = self.tokens(key)?;
                Some(match token_placement {
                    TokenPlacement::Header => AuthInjection::Header {
                        name: "Authorization".to_string(),
                        value: format!("Bearer {}", tokens.access_token),
                    },
                    TokenPlacement::Query { param } => AuthInjection::Query {
                        name: param.clone(),
                        value: tokens.access_token,
                    },
                })
            }
        }
    }

    /// Clear all state for an integration, including persisted tokens
    pub fn disconnect(&self, key: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.credentials.remove(key);
            inner.tokens.remove(key);
            if inner.pending.as_deref() == Some(key) {
                inner.pending = None;
            }
        }

        if let Some(storage) = &self.storage {
            storage.delete(key)?;
        }

        info!(integration = %key, "Disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn creds(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn oauth() -> AuthScheme {
        AuthScheme::OAuth {
            extra_params: Default::default(),
            token_placement: TokenPlacement::Header,
        }
    }

    #[test]
    fn test_basic_header() {
        let auth = AuthStateManager::new();
        auth.set_credential("zendesk", creds(&[("username", "u"), ("password", "p")]));

        let header = auth.get_auth_header("zendesk", &AuthScheme::Basic);
        assert_eq!(
            header,
            Some(AuthInjection::Header {
                name: "Authorization".into(),
                value: "Basic dTpw".into()
            })
        );
    }

    #[test]
    fn test_basic_needs_both_fields() {
        let auth = AuthStateManager::new();
        auth.set_credential("zendesk", creds(&[("username", "u"), ("password", "")]));
        assert_eq!(auth.get_auth_header("zendesk", &AuthScheme::Basic), None);
        assert_eq!(
            auth.status("zendesk", &AuthScheme::Basic),
            AuthStatus::Unauthenticated
        );
    }

    #[test]
    fn test_api_key_with_prefix() {
        let auth = AuthStateManager::new();
        auth.set_credential("hubspot", creds(&[("api_key", "abc")]));
        let scheme = AuthScheme::ApiKey {
            header: "X-Token".into(),
            prefix: Some("Bearer ".into()),
        };
        assert_eq!(
            auth.get_auth_header("hubspot", &scheme),
            Some(AuthInjection::Header {
                name: "X-Token".into(),
                value: "Bearer abc".into()
            })
        );
    }

    #[test]
    fn test_switch_clears_session_credentials() {
        let auth = AuthStateManager::new();
        let scheme = AuthScheme::ApiKey {
            header: "X-Key".into(),
            prefix: None,
        };

        auth.select_integration("A");
        auth.set_credential("A", creds(&[("api_key", "k")]));
        assert!(auth.get_auth_header("A", &scheme).is_some());

        auth.select_integration("B");
        auth.select_integration("A");
        assert_eq!(auth.get_auth_header("A", &scheme), None);
    }

    #[test]
    fn test_switch_keeps_oauth_tokens() {
        let auth = AuthStateManager::new();
        auth.select_integration("box");
        auth.begin_oauth("box").unwrap();
        auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap();

        auth.select_integration("meraki");
        auth.select_integration("box");
        assert_eq!(
            auth.get_auth_header("box", &oauth()),
            Some(AuthInjection::Header {
                name: "Authorization".into(),
                value: "Bearer tok".into()
            })
        );
    }

    #[test]
    fn test_oauth_state_machine() {
        let auth = AuthStateManager::new();
        let scheme = oauth();
        assert_eq!(auth.status("box", &scheme), AuthStatus::Unauthenticated);

        auth.begin_oauth("box").unwrap();
        assert_eq!(auth.status("box", &scheme), AuthStatus::Authenticating);

        let target = auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap();
        assert_eq!(target, "box");
        assert_eq!(auth.status("box", &scheme), AuthStatus::Authenticated);
        assert_eq!(auth.pending(), None);

        auth.disconnect("box").unwrap();
        assert_eq!(auth.status("box", &scheme), AuthStatus::Unauthenticated);
    }

    #[test]
    fn test_second_begin_conflicts() {
        let auth = AuthStateManager::new();
        auth.begin_oauth("box").unwrap();
        // same integration may restart its own flow
        auth.begin_oauth("box").unwrap();

        let err = auth.begin_oauth("dropbox").unwrap_err();
        assert!(matches!(err, Error::Conflict(ref k) if k == "box"));

        assert!(auth.cancel_oauth("box"));
        auth.begin_oauth("dropbox").unwrap();
    }

    #[test]
    fn test_complete_without_begin_uses_default_target() {
        let auth = AuthStateManager::new().with_default_target("salesforce");
        let target = auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap();
        assert_eq!(target, "salesforce");
        assert!(auth.tokens("salesforce").is_some());
    }

    #[test]
    fn test_complete_without_any_target_is_an_error() {
        let auth = AuthStateManager::new();
        let result = auth.complete_oauth(TokenDelivery::access_token("tok"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_pending_wins_over_named_delivery() {
        let auth = AuthStateManager::new();
        auth.begin_oauth("box").unwrap();
        let delivery = TokenDelivery {
            integration: Some("dropbox".into()),
            ..TokenDelivery::access_token("tok")
        };
        assert_eq!(auth.complete_oauth(delivery).unwrap(), "box");
    }

    #[test]
    fn test_token_in_query() {
        let auth = AuthStateManager::new();
        auth.begin_oauth("gdrive").unwrap();
        auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap();
        let scheme = AuthScheme::OAuth {
            extra_params: Default::default(),
            token_placement: TokenPlacement::Query {
                param: "access_token".into(),
            },
        };
        assert_eq!(
            auth.get_auth_header("gdrive", &scheme),
            Some(AuthInjection::Query {
                name: "access_token".into(),
                value: "tok".into()
            })
        );
    }

    #[test]
    fn test_tokens_persist_across_managers() {
        let dir = TempDir::new().unwrap();
        let first = AuthStateManager::new()
            .with_storage(TokenStorage::new(dir.path().to_path_buf()).unwrap());
        first.begin_oauth("salesforce").unwrap();
        first
            .complete_oauth(TokenDelivery {
                instance_url: Some("https://na1.salesforce.com".into()),
                ..TokenDelivery::access_token("tok")
            })
            .unwrap();

        let second = AuthStateManager::new()
            .with_storage(TokenStorage::new(dir.path().to_path_buf()).unwrap());
        assert_eq!(
            second
                .auth_values("salesforce", &oauth())
                .get("instance_url")
                .map(String::as_str),
            Some("https://na1.salesforce.com")
        );

        second.disconnect("salesforce").unwrap();
        let third = AuthStateManager::new()
            .with_storage(TokenStorage::new(dir.path().to_path_buf()).unwrap());
        assert!(third.tokens("salesforce").is_none());
    }

    #[test]
    fn test_auth_values_limited_to_declared_extras() {
        let auth = AuthStateManager::new();
        auth.begin_oauth("docusign").unwrap();
        auth.complete_oauth(TokenDelivery {
            subdomain: Some("acme".into()),
            extras: creds(&[("account_id", "acc-1"), ("scope", "signature")]),
            ..TokenDelivery::access_token("tok")
        })
        .unwrap();

        let scheme = AuthScheme::OAuth {
            extra_params: ["account_id".to_string()].into(),
            token_placement: TokenPlacement::Header,
        };
        let values = auth.auth_values("docusign", &scheme);
        assert_eq!(values.get("account_id").map(String::as_str), Some("acc-1"));
        assert_eq!(values.get("subdomain").map(String::as_str), Some("acme"));
        assert!(!values.contains_key("scope"));

        // undeclared extras are dropped, built-in token values are not
        let values = auth.auth_values("docusign", &oauth());
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["subdomain"]);

        // non-OAuth schemes contribute nothing
        assert!(auth.auth_values("docusign", &AuthScheme::Basic).is_empty());
    }

    #[test]
    fn test_complete_persists_and_clears_pending() {
        let dir = TempDir::new().unwrap();
        let auth = AuthStateManager::new()
            .with_storage(TokenStorage::new(dir.path().to_path_buf()).unwrap());
        auth.begin_oauth("box").unwrap();
        assert_eq!(auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap(), "box");
        assert_eq!(auth.pending(), None);
        assert!(dir.path().read_dir().unwrap().next().is_some());
    }

    #[test]
    fn test_failed_save_keeps_flow_pending() {
        let dir = TempDir::new().unwrap();
        let storage = TokenStorage::new(dir.path().join("tokens")).unwrap();
        let auth = AuthStateManager::new().with_storage(storage);
        std::fs::remove_dir_all(dir.path().join("tokens")).unwrap();

        auth.begin_oauth("box").unwrap();
        let err = auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(auth.pending().as_deref(), Some("box"));
        assert!(auth.inner.read().tokens.is_empty());
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let auth = AuthStateManager::new().with_default_target("box");
        assert!(auth.complete_oauth(TokenDelivery::access_token("")).is_err());
    }
}

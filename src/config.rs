//! Configuration management

use std::{env, path::Path, path::PathBuf, sync::LazyLock, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthStateManager, TokenStorage};
use crate::{Error, Result};

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("env var pattern is valid")
});

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Catalog sources
    pub catalog: CatalogConfig,
    /// OAuth token handling
    pub oauth: OAuthConfig,
    /// Outbound transport
    pub transport: TransportConfig,
    /// Request resolution
    pub resolver: ResolverConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

/// Where integration descriptors are loaded from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// YAML files or directories, loaded in order
    pub paths: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            paths: vec!["catalog".to_string()],
        }
    }
}

/// OAuth token delivery and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Integration that receives tokens delivered while no flow is pending
    pub default_target: Option<String>,
    /// Persist delivered tokens to disk
    pub persist: bool,
    /// Token directory (default: ~/.integration-tester/tokens)
    pub token_dir: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            default_target: None,
            persist: true,
            token_dir: None,
        }
    }
}

impl OAuthConfig {
    /// Build the auth state manager this configuration describes
    pub fn auth_manager(&self) -> Result<AuthStateManager> {
        let mut manager = AuthStateManager::new();
        if let Some(target) = &self.default_target {
            manager = manager.with_default_target(target.clone());
        }
        if self.persist {
            let storage = match &self.token_dir {
                Some(dir) => TokenStorage::new(expand_home(dir))?,
                None => TokenStorage::default_location()?,
            };
            manager = manager.with_storage(storage);
        }
        Ok(manager)
    }
}

/// Outbound transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Request resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Reject number/select values that do not match their declared type
    pub strict_validation: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strict_validation: true,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // INTEGRATION_TESTER_SERVER__PORT=8080 etc.
        figment = figment.merge(Env::prefixed("INTEGRATION_TESTER_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files must be loaded before ${VAR} expansion
        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = expand_home(path_str);
            if path.exists() {
                match dotenvy::from_path(&path) {
                    Ok(()) => tracing::info!(path = %path.display(), "Loaded env file"),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to load env file"),
                }
            } else {
                tracing::debug!(path = %path.display(), "Env file not found (skipped)");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} in path-like values
    fn expand_env_vars(&mut self) {
        for path in &mut self.catalog.paths {
            *path = expand_string(path);
        }
        if let Some(dir) = &mut self.oauth.token_dir {
            *dir = expand_string(dir);
        }
        if let Some(target) = &mut self.oauth.default_target {
            *target = expand_string(target);
        }
    }

    /// Catalog paths with `~` expanded
    #[must_use]
    pub fn catalog_paths(&self) -> Vec<PathBuf> {
        self.catalog.paths.iter().map(|p| expand_home(p)).collect()
    }
}

/// Expand environment variables in a string
fn expand_string(value: &str) -> String {
    ENV_VAR
        .replace_all(value, |caps: &regex::Captures| {
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

/// Serde helpers for human-readable durations ("30s", "5m", "500ms")
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize a duration as whole seconds (e.g. "30s")
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize "500ms", "30s", "5m" or a bare number of seconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };

        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

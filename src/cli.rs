//! Command-line interface

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::Result;
use crate::auth::{AuthStateManager, TokenDelivery};
use crate::config::OAuthConfig;
use crate::resolver::ParamValues;

/// Integration tester - declarative REST catalog with an authenticated proxy
#[derive(Parser, Debug)]
#[command(name = "integration-tester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "INTEGRATION_TESTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "INTEGRATION_TESTER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "INTEGRATION_TESTER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Catalog inspection commands
    #[command(subcommand)]
    Catalog(CatalogCommand),

    /// Build a request without sending it
    Resolve(RequestArgs),

    /// Build a request and send it
    Execute(RequestArgs),
}

/// Catalog subcommands
#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// List integrations and their endpoints
    List {
        /// Catalog file or directory (default: configured paths)
        path: Option<PathBuf>,
    },

    /// Validate catalog files
    Validate {
        /// Catalog files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Inputs for a single request
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Integration key
    #[arg(short, long)]
    pub integration: String,

    /// Endpoint id
    #[arg(short, long)]
    pub endpoint: String,

    /// Parameter or config value (repeatable)
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Credential field such as `api_key`, `username`, `password` (repeatable)
    #[arg(long = "credential", value_name = "FIELD=VALUE", value_parser = parse_key_val)]
    pub credentials: Vec<(String, String)>,

    /// OAuth access token for this invocation only
    #[arg(long, env = "INTEGRATION_TESTER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Instance URL delivered alongside the token
    #[arg(long, requires = "token")]
    pub instance_url: Option<String>,

    /// Subdomain delivered alongside the token
    #[arg(long, requires = "token")]
    pub subdomain: Option<String>,
}

impl RequestArgs {
    /// Parameter values as a map; later duplicates win
    #[must_use]
    pub fn values(&self) -> ParamValues {
        self.params.iter().cloned().collect()
    }

    /// Auth state for this invocation
    ///
    /// A token passed on the command line is kept in memory only; otherwise
    /// persisted tokens are available per `oauth`.
    pub fn auth_manager(&self, oauth: &OAuthConfig) -> Result<AuthStateManager> {
        let auth = if self.token.is_some() {
            AuthStateManager::new()
        } else {
            oauth.auth_manager()?
        };

        if !self.credentials.is_empty() {
            let fields: BTreeMap<String, String> = self.credentials.iter().cloned().collect();
            auth.set_credential(&self.integration, fields);
        }

        if let Some(token) = &self.token {
            auth.complete_oauth(TokenDelivery {
                integration: Some(self.integration.clone()),
                instance_url: self.instance_url.clone(),
                subdomain: self.subdomain.clone(),
                ..TokenDelivery::access_token(token.clone())
            })?;
        }

        Ok(auth)
    }
}

/// Parse `NAME=VALUE`; the value may itself contain `=`
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

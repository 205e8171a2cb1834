//! Integration Tester Library
//!
//! Configuration-driven tester for third-party REST APIs. A declarative YAML
//! catalog describes each integration (base URL, auth scheme, endpoints,
//! parameters); the resolver turns a selected endpoint, the user's parameter
//! values and the current auth state into a complete outbound request.
//!
//! # Features
//!
//! - **Declarative catalog**: adding a provider is a data change, not code
//! - **Auth schemes**: API key, HTTP basic, and externally-delivered OAuth tokens
//! - **Deterministic resolution**: path substitution, query/body partitioning,
//!   header merging and declared injections, all before any network call
//! - **Proxy server**: JSON API for listing, auth actions, dry runs and execution
//! - **CLI**: catalog validation, `resolve` dry runs and one-shot `execute`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod resolver;
pub mod server;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to initialize tracing: {e}")))
}

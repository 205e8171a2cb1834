//! HTTP proxy server
//!
//! A thin JSON API in front of the catalog, the auth state and the resolver.
//! Requests are built locally and forwarded to the provider through the
//! configured [`Transport`](crate::transport::Transport).

mod router;

pub use router::{ApiError, AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::resolver::RequestResolver;
use crate::transport::HttpTransport;
use crate::{Error, Result};

/// Integration tester server
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Load the catalog and build shared state
    pub async fn new(config: Config) -> Result<Self> {
        let catalog = Catalog::load_paths(&config.catalog_paths()).await?;

        if let Some(target) = &config.oauth.default_target {
            let integration = catalog.get_integration(target).map_err(|_| {
                Error::Config(format!("OAuth default target '{target}' is not in the catalog"))
            })?;
            if !integration.auth.is_oauth() {
                return Err(Error::Config(format!(
                    "OAuth default target '{target}' does not use OAuth"
                )));
            }
        }

        let auth = config.oauth.auth_manager()?;
        let resolver =
            RequestResolver::new().with_strict_validation(config.resolver.strict_validation);
        let transport = HttpTransport::new(config.transport.timeout)?;

        info!(integrations = catalog.len(), "Catalog loaded");

        let state = Arc::new(AppState::new(
            Arc::new(catalog),
            Arc::new(auth),
            resolver,
            Arc::new(transport),
        ));

        Ok(Self { config, state })
    }

    /// Shared state, for embedding the router elsewhere
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            integrations = self.state.catalog.len(),
            "Listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

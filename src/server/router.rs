//! HTTP router and handlers
//!
//! # Security
//!
//! Credentials only flow inbound. Responses never echo stored credentials,
//! and resolved URLs are not logged.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::auth::{AuthStateManager, TokenDelivery};
use crate::catalog::{AuthScheme, Catalog};
use crate::resolver::{FormState, ParamValues, RequestResolver, ResolvedRequest};
use crate::transport::Transport;
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Integration catalog
    pub catalog: Arc<Catalog>,
    /// Credential and token cache
    pub auth: Arc<AuthStateManager>,
    /// Current selection and form values
    pub form: Mutex<FormState>,
    /// Request builder
    pub resolver: RequestResolver,
    /// Outbound executor
    pub transport: Arc<dyn Transport>,
    /// Single permit: at most one execution in flight
    pub inflight: Semaphore,
}

impl AppState {
    /// Create application state with an empty form
    pub fn new(
        catalog: Arc<Catalog>,
        auth: Arc<AuthStateManager>,
        resolver: RequestResolver,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            catalog,
            auth,
            form: Mutex::new(FormState::new()),
            resolver,
            transport,
            inflight: Semaphore::new(1),
        }
    }

    /// Select `key` (and optionally an endpoint) in both auth and form state
    fn select(&self, key: &str, endpoint: Option<&str>) -> Result<FormState> {
        let integration = self.catalog.get_integration(key)?;
        self.auth.select_integration(key);

        let mut form = self.form.lock();
        match endpoint {
            Some(id) => form.select_endpoint(integration, id)?,
            None => form.select_integration(integration),
        }
        Ok(form.clone())
    }

    /// Resolve one submission: sticky values and defaults overlaid with `values`
    fn resolve(&self, key: &str, endpoint_id: &str, values: ParamValues) -> Result<ResolvedRequest> {
        let integration = self.catalog.get_integration(key)?;
        let endpoint = self.catalog.get_endpoint(key, endpoint_id)?;
        self.auth.select_integration(key);

        let values = {
            let mut form = self.form.lock();
            form.select_endpoint(integration, endpoint_id)?;
            form.submission(integration, values)
        };

        self.resolver.resolve(integration, endpoint, &values, &self.auth)
    }

    fn auth_status(&self, key: &str) -> Result<Value> {
        let integration = self.catalog.get_integration(key)?;
        Ok(json!({
            "integration": key,
            "scheme": integration.auth.label(),
            "status": self.auth.status(key, &integration.auth),
            "fields": integration.auth.credential_fields(),
        }))
    }
}

/// Error body: `{"error": message, "kind": kind}`
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            debug!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        (
            status,
            Json(json!({
                "error": self.0.to_string(),
                "kind": self.0.kind(),
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/integrations", get(list_integrations_handler))
        .route("/api/integrations/{key}", get(get_integration_handler))
        .route("/api/integrations/{key}/select", post(select_handler))
        .route(
            "/api/integrations/{key}/endpoints/{id}/resolve",
            post(resolve_handler),
        )
        .route(
            "/api/integrations/{key}/endpoints/{id}/execute",
            post(execute_handler),
        )
        .route("/api/auth/{key}", get(auth_status_handler).delete(disconnect_handler))
        .route("/api/auth/{key}/credentials", post(credentials_handler))
        .route("/api/auth/{key}/oauth/begin", post(begin_oauth_handler))
        .route("/api/auth/{key}/oauth", delete(cancel_oauth_handler))
        .route("/api/oauth/complete", post(complete_oauth_handler))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "integrations": state.catalog.len(),
    }))
}

async fn list_integrations_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.list_integrations())
}

async fn get_integration_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let integration = state.catalog.get_integration(&key)?;
    Ok(Json(json!({
        "integration": integration,
        "auth_status": state.auth.status(&key, &integration.auth),
    })))
}

#[derive(Debug, Default, Deserialize)]
struct SelectBody {
    #[serde(default)]
    endpoint: Option<String>,
}

async fn select_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Option<Json<SelectBody>>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let form = state.select(&key, body.endpoint.as_deref())?;
    Ok(Json(form))
}

#[derive(Debug, Default, Deserialize)]
struct ValuesBody {
    #[serde(default)]
    values: ParamValues,
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path((key, id)): Path<(String, String)>,
    body: Option<Json<ValuesBody>>,
) -> ApiResult<impl IntoResponse> {
    let values = body.map(|Json(b)| b.values).unwrap_or_default();
    let request = state.resolve(&key, &id, values)?;
    Ok(Json(request))
}

async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Path((key, id)): Path<(String, String)>,
    body: Option<Json<ValuesBody>>,
) -> ApiResult<impl IntoResponse> {
    let _permit = state.inflight.try_acquire().map_err(|_| Error::Busy)?;

    let values = body.map(|Json(b)| b.values).unwrap_or_default();
    let request = state.resolve(&key, &id, values)?;
    let response = state.transport.send(&request).await?;

    info!(
        integration = %key,
        endpoint = %id,
        method = %request.method,
        status = response.status,
        "Executed request"
    );
    Ok(Json(response))
}

async fn auth_status_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.auth_status(&key)?))
}

async fn credentials_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let integration = state.catalog.get_integration(&key)?;
    if matches!(integration.auth, AuthScheme::None | AuthScheme::OAuth { .. }) {
        return Err(Error::invalid_parameter(
            "credentials",
            format!("integration '{key}' uses {} authentication", integration.auth.label()),
        )
        .into());
    }
    if let Some(unknown) = fields
        .keys()
        .find(|f| !integration.auth.credential_fields().contains(&f.as_str()))
    {
        return Err(Error::invalid_parameter(unknown.as_str(), "not a credential field").into());
    }

    state.auth.set_credential(&key, fields);
    Ok(Json(state.auth_status(&key)?))
}

async fn begin_oauth_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let integration = state.catalog.get_integration(&key)?;
    if !integration.auth.is_oauth() {
        return Err(Error::invalid_parameter(
            "integration",
            format!("'{key}' does not use OAuth"),
        )
        .into());
    }

    state.auth.begin_oauth(&key)?;
    Ok((StatusCode::ACCEPTED, Json(state.auth_status(&key)?)))
}

async fn cancel_oauth_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.catalog.get_integration(&key)?;
    let cancelled = state.auth.cancel_oauth(&key);
    Ok(Json(json!({ "integration": key, "cancelled": cancelled })))
}

async fn complete_oauth_handler(
    State(state): State<Arc<AppState>>,
    Json(delivery): Json<TokenDelivery>,
) -> ApiResult<impl IntoResponse> {
    if let Some(key) = &delivery.integration {
        let integration = state.catalog.get_integration(key)?;
        if !integration.auth.is_oauth() {
            return Err(Error::invalid_parameter(
                "integration",
                format!("'{key}' does not use OAuth"),
            )
            .into());
        }
    }

    let target = state.auth.complete_oauth(delivery)?;
    if state.catalog.get_integration(&target).is_err() {
        warn!(integration = %target, "Tokens attributed to an integration missing from the catalog");
    }
    Ok(Json(json!({ "integration": target, "status": "authenticated" })))
}

async fn disconnect_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.catalog.get_integration(&key)?;
    state.auth.disconnect(&key)?;
    Ok(Json(state.auth_status(&key)?))
}

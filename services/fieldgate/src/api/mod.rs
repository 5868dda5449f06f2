//! Thin HTTP wiring over the core services.
//!
//! Handlers translate the wire shapes of the device and admin clients onto
//! the core contracts; no business rule lives here.

pub mod handlers;

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::session::SessionService;
use crate::auth::tokens::TokenService;
use crate::authz::engine::AuthorizationEngine;
use crate::policy::issuer::PolicyIssuer;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionService,
    pub tokens: Arc<TokenService>,
    pub authz: AuthorizationEngine,
    pub policy: PolicyIssuer,
}

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/auth/login", post(handlers::login))
        .route("/v1/auth/refresh", post(handlers::refresh))
        .route("/v1/auth/logout", post(handlers::logout))
        .route("/v1/auth/override", post(handlers::supervisor_override))
        .route("/v1/auth/whoami", get(handlers::whoami))
        .route("/v1/auth/check", post(handlers::check_access))
        .route("/v1/policy", get(handlers::policy))
        .route("/v1/policy/key", get(handlers::policy_key))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server loop fails.
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!("Listening on port {port}");
    axum::serve(listener, router(state))
        .await
        .context("server loop failed")
}

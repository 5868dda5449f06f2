//! Request handlers for the device-facing and admin-facing endpoints.

use axum::{
    Extension, Json,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::AppState;
use crate::auth::tokens::TokenKind;
use crate::authz::engine::ResourceDescriptor;
use crate::authz::model::{Action, Resource};
use crate::error::Error;
use crate::store::{DirectoryStore, PolicyStore};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Unauthenticated | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
        Error::InsufficientPermissions { .. }
        | Error::TeamBoundaryViolation
        | Error::SystemSettingsAccessDenied
        | Error::SystemSettingsAccessDeniedNationalSupport => StatusCode::FORBIDDEN,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::AccountLocked { .. } => StatusCode::LOCKED,
        Error::NotFound(_) | Error::DeviceNotFound => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Internal error serving request: {err}");
    }
    let body = ErrorBody {
        code: err.code(),
        // The client-facing message stays generic; precise denial reasons
        // live in the audit log only.
        message: err.code().to_string(),
        retry_after: err.retry_after().map(|duration| duration.as_secs()),
    };
    (status, Json(body)).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract a client IP for audit rows from common proxy headers.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub async fn health() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "userCode")]
    pub user_code: String,
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session: SessionBody,
    pub access_token: String,
    pub refresh_token: String,
    pub policy_version: i64,
}

pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let source_ip = client_ip(&headers);
    let outcome = match state
        .sessions
        .login(
            &request.device_id,
            &request.user_code,
            &request.pin,
            source_ip.as_deref(),
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return error_response(&err),
    };

    // The current policy version lets the device decide whether to re-fetch.
    let policy_version = match state
        .store
        .next_policy_version(outcome.session.device_id)
        .await
    {
        Ok(next) => next - 1,
        Err(err) => return error_response(&Error::from(err)),
    };

    let body = LoginResponse {
        session: SessionBody {
            session_id: outcome.session.id,
            user_id: outcome.session.user_id,
            started_at: outcome.session.started_at,
            expires_at: outcome.session.expires_at,
            override_until: outcome.session.override_until,
        },
        access_token: outcome.access_token.token,
        refresh_token: outcome.refresh_token.token,
        policy_version,
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn refresh(
    state: Extension<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    match state.sessions.refresh(&request.refresh_token).await {
        Ok(access) => (
            StatusCode::OK,
            Json(RefreshResponse {
                access_token: access.token,
                expires_at: access.expires_at,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(&Error::Unauthenticated);
    };
    let claims = match state.tokens.verify(&token, TokenKind::Access).await {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let (Some(session_id), Ok(user_id)) = (claims.session_id, claims.sub.parse::<Uuid>()) else {
        return error_response(&Error::Unauthenticated);
    };
    match state.sessions.logout(session_id, user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub supervisor_pin: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub override_until: DateTime<Utc>,
    pub token: String,
}

pub async fn supervisor_override(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<OverrideRequest>,
) -> Response {
    let source_ip = client_ip(&headers);
    match state
        .sessions
        .supervisor_override(
            &request.supervisor_pin,
            &request.device_id,
            source_ip.as_deref(),
        )
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(OverrideResponse {
                override_until: outcome.override_until,
                token: outcome.token.token,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Uuid>,
    pub roles: Vec<String>,
}

pub async fn whoami(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(&Error::Unauthenticated);
    };
    let claims = match state.tokens.verify(&token, TokenKind::Access).await {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let roles = match claims.sub.parse::<Uuid>() {
        Ok(user_id) => match state.authz.compute_effective_permissions(user_id).await {
            Ok(effective) => effective.roles.into_iter().map(|role| role.name).collect(),
            Err(err) => return error_response(&err),
        },
        Err(_) => Vec::new(),
    };
    let body = WhoamiResponse {
        user_id: claims.sub,
        session_id: claims.session_id,
        team_id: claims.team_id,
        roles,
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub resource: Resource,
    pub action: Action,
    #[serde(default)]
    pub team_id: Option<Uuid>,
}

/// Point or contextual permission check for the administration tier. The
/// response is the engine's decision verbatim, including the audit reason.
pub async fn check_access(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<CheckRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(&Error::Unauthenticated);
    };
    let claims = match state.tokens.verify(&token, TokenKind::Access).await {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let Ok(user_id) = claims.sub.parse::<Uuid>() else {
        return error_response(&Error::Unauthenticated);
    };

    let decision = if request.team_id.is_some() {
        state
            .authz
            .check_contextual_access(
                user_id,
                ResourceDescriptor {
                    resource: request.resource,
                    team_id: request.team_id,
                },
                request.action,
            )
            .await
    } else {
        state
            .authz
            .check_permission(user_id, request.resource, request.action)
            .await
    };
    (StatusCode::OK, Json(decision)).into_response()
}

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub policy: String,
    pub version: i64,
}

/// Issue a fresh signed policy for the device bound to the presented token.
/// Access and override tokens both pass the gate.
pub async fn policy(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(&Error::Unauthenticated);
    };
    let claims = match state.tokens.verify_for_override(&token, Utc::now()).await {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let Some(device_id) = claims.device_id else {
        return error_response(&Error::Unauthenticated);
    };
    let device = match state.store.device_by_id(device_id).await {
        Ok(Some(device)) => device,
        Ok(None) => return error_response(&Error::DeviceNotFound),
        Err(err) => return error_response(&Error::from(err)),
    };
    match state
        .policy
        .issue(&device.code, client_ip(&headers).as_deref())
        .await
    {
        Ok(issued) => (
            StatusCode::OK,
            Json(PolicyResponse {
                policy: issued.signed_document,
                version: issued.payload.version,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Serialize)]
pub struct PolicyKeyResponse {
    pub public_key: String,
}

pub async fn policy_key(state: Extension<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(PolicyKeyResponse {
            public_key: state.policy.public_key(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    #[test]
    fn bearer_token_parses_both_prefixes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers), Some("1.2.3.4".to_string()));

        let mut fallback = HeaderMap::new();
        fallback.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&fallback), Some("9.9.9.9".to_string()));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn transient_rejections_carry_retry_after() {
        let response = error_response(&Error::RateLimited {
            retry_after: Duration::from_secs(42),
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = error_response(&Error::AccountLocked {
            retry_after: Duration::from_secs(1800),
        });
        assert_eq!(response.status(), StatusCode::LOCKED);
    }

    #[test]
    fn denials_map_to_forbidden() {
        for err in [
            Error::TeamBoundaryViolation,
            Error::SystemSettingsAccessDenied,
            Error::SystemSettingsAccessDeniedNationalSupport,
            Error::InsufficientPermissions {
                reason: "NO_MATCHING_PERMISSION: DEVICES:READ".to_string(),
            },
        ] {
            assert_eq!(error_response(&err).status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn credential_failures_are_unauthorized_and_generic() {
        let response = error_response(&Error::InvalidCredentials);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

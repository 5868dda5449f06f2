//! Bearer token issuance, verification and revocation.
//!
//! Access, refresh and override tokens share one wire format (the EdDSA
//! document codec) and differ only in their `type` claim and TTL. A token
//! whose jti appears in the revocation store is invalid no matter how sound
//! its signature and expiry are.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ulid::Ulid;
use uuid::Uuid;

use crate::config::{FieldgateConfig, parse_ttl};
use crate::error::Error;
use crate::signer::Signer;
use crate::store::{JwtRevocation, RevocationStore, Store};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Override,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Override => "override",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(rename = "x-device-id", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    #[serde(rename = "x-session-id", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(rename = "x-team-id", skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Uuid>,
}

/// Device/session/team claims attached to a token at issuance.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenBindings {
    pub device_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService {
    signer: Arc<Signer>,
    store: Arc<dyn Store>,
    issuer: String,
    audience: String,
    access_ttl: TimeDelta,
    refresh_ttl: TimeDelta,
    override_ttl: TimeDelta,
}

impl TokenService {
    /// Build the service, parsing configured TTL strings once.
    ///
    /// # Errors
    ///
    /// A malformed TTL configuration is reported here and treated as fatal
    /// at startup, never discovered on a request path.
    pub fn new(
        signer: Arc<Signer>,
        store: Arc<dyn Store>,
        config: &FieldgateConfig,
    ) -> Result<Self, Error> {
        let access_ttl = delta(parse_ttl(config.access_ttl())?);
        let refresh_ttl = delta(parse_ttl(config.refresh_ttl())?);
        let override_ttl = TimeDelta::minutes(i64::from(config.override_minutes()));
        Ok(Self {
            signer,
            store,
            issuer: config.issuer().to_string(),
            audience: config.audience().to_string(),
            access_ttl,
            refresh_ttl,
            override_ttl,
        })
    }

    fn ttl(&self, kind: TokenKind) -> TimeDelta {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Override => self.override_ttl,
        }
    }

    /// Issue a token of `kind` for `subject` with the given bindings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if signing fails.
    pub fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        bindings: TokenBindings,
    ) -> Result<IssuedToken, Error> {
        self.issue_at(kind, subject, bindings, Utc::now())
    }

    pub fn issue_at(
        &self,
        kind: TokenKind,
        subject: &str,
        bindings: TokenBindings,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, Error> {
        let expires_at = now + self.ttl(kind);
        let claims = TokenClaims {
            sub: subject.to_string(),
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Ulid::new().to_string(),
            kind,
            device_id: bindings.device_id,
            session_id: bindings.session_id,
            team_id: bindings.team_id,
        };
        let token = self.signer.sign(&claims)?;
        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Verify a bearer token of the expected kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unauthenticated` for any cryptographic, claim, expiry
    /// or revocation failure; `Error::Internal` only when the revocation
    /// store itself is unavailable.
    pub async fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, Error> {
        self.verify_at(token, expected, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, Error> {
        let claims = self.decode_checked(token, now).await?;
        if claims.kind != expected {
            return Err(Error::Unauthenticated);
        }
        Ok(claims)
    }

    /// Verify a token for an override-gated operation: access and override
    /// kinds both pass. Override tokens relax usage-time policy only; they
    /// never widen what the subject may reach.
    ///
    /// # Errors
    ///
    /// Same surface as [`TokenService::verify`].
    pub async fn verify_for_override(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, Error> {
        let claims = self.decode_checked(token, now).await?;
        match claims.kind {
            TokenKind::Access | TokenKind::Override => Ok(claims),
            TokenKind::Refresh => Err(Error::Unauthenticated),
        }
    }

    async fn decode_checked(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, Error> {
        let claims: TokenClaims = self
            .signer
            .verify(token)
            .map_err(|_| Error::Unauthenticated)?;
        if claims.iss != self.issuer || claims.aud != self.audience {
            return Err(Error::Unauthenticated);
        }
        if claims.exp <= now.timestamp() {
            return Err(Error::Unauthenticated);
        }
        if self.is_revoked(&claims.jti).await? {
            return Err(Error::Unauthenticated);
        }
        Ok(claims)
    }

    /// Append `jti` to the revocation list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the revocation store write fails.
    pub async fn revoke(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        reason: &str,
        revoked_by: Option<Uuid>,
    ) -> Result<(), Error> {
        self.store
            .insert_revocation(JwtRevocation {
                jti: jti.to_string(),
                revoked_at: Utc::now(),
                // Mirror the token's own expiry so list cleanup stays bounded.
                expires_at,
                reason: reason.to_string(),
                revoked_by,
            })
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Error::Internal` if the revocation store read fails.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        Ok(self.store.revocation_by_jti(jti).await?.is_some())
    }
}

fn delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::days(3650))
}

//! Session and supervisor-override state machine.
//!
//! Flow Overview:
//! 1) `login`: rate-limit gate, PIN verification, then a fresh session row
//!    with an access/refresh token pair bound to it.
//! 2) `refresh`/`logout`: driven by the session row, with the expiry
//!    timestamp (not the stored status) deciding usability.
//! 3) `supervisor_override`: team PIN verification, then a time-boxed
//!    extension of the device's open sessions plus an override token.
//!
//! Credential failures collapse into one generic error so callers cannot
//! probe whether the user code or the PIN was wrong.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::auth::credentials::CredentialVerifier;
use crate::auth::rate_limit::{Channel, RateLimiter};
use crate::auth::tokens::{IssuedToken, TokenBindings, TokenKind, TokenService};
use crate::config::{FieldgateConfig, parse_ttl};
use crate::error::Error;
use crate::store::{
    Device, DirectoryStore, PinAttempt, PinAttemptKind, Session, SessionStatus, SessionStore,
    Store, SupervisorPinStore, User,
};

#[derive(Debug)]
pub struct LoginOutcome {
    pub session: Session,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

#[derive(Debug)]
pub struct OverrideOutcome {
    pub override_until: DateTime<Utc>,
    pub token: IssuedToken,
}

pub struct SessionService {
    store: Arc<dyn Store>,
    verifier: CredentialVerifier,
    rate_limiter: Arc<RateLimiter>,
    tokens: Arc<TokenService>,
    session_ttl: TimeDelta,
    override_window: TimeDelta,
}

impl SessionService {
    /// # Errors
    ///
    /// Returns `Error::Validation` if the configured session TTL string does
    /// not parse; treated as fatal at startup.
    pub fn new(
        store: Arc<dyn Store>,
        verifier: CredentialVerifier,
        rate_limiter: Arc<RateLimiter>,
        tokens: Arc<TokenService>,
        config: &FieldgateConfig,
    ) -> Result<Self, Error> {
        let session_ttl = TimeDelta::from_std(parse_ttl(config.session_ttl())?)
            .unwrap_or_else(|_| TimeDelta::hours(12));
        Ok(Self {
            store,
            verifier,
            rate_limiter,
            tokens,
            session_ttl,
            override_window: TimeDelta::minutes(i64::from(config.override_minutes())),
        })
    }

    /// Authenticate a device-bound user and open a session.
    ///
    /// # Errors
    ///
    /// `RATE_LIMITED`/`ACCOUNT_LOCKED` before any verification work;
    /// `INVALID_CREDENTIALS` for every unknown-device, unknown-user and
    /// wrong-PIN case alike.
    pub async fn login(
        &self,
        device_code: &str,
        user_code: &str,
        pin: &str,
        source_ip: Option<&str>,
    ) -> Result<LoginOutcome, Error> {
        if device_code.trim().is_empty() || user_code.trim().is_empty() || pin.trim().is_empty() {
            return Err(Error::Validation(
                "deviceId, userCode and pin are required".to_string(),
            ));
        }
        self.rate_limiter
            .register_attempt(user_code, Channel::Login)?;

        let device = self
            .store
            .device_by_code(device_code)
            .await?
            .filter(|device| device.active);
        let user = self
            .store
            .user_by_code(user_code)
            .await?
            .filter(|user| user.active);
        let (Some(device), Some(user)) = (device, user) else {
            return Err(Error::InvalidCredentials);
        };

        let pin_ok = self.verify_blocking(pin, user.pin.clone()).await?;
        self.record_attempt(user.id, PinAttemptKind::UserPin, pin_ok, source_ip)
            .await?;
        if !pin_ok {
            return Err(Error::InvalidCredentials);
        }
        self.rate_limiter.record_success(user_code, Channel::Login);

        self.open_session(&device, &user).await
    }

    async fn open_session(&self, device: &Device, user: &User) -> Result<LoginOutcome, Error> {
        let now = Utc::now();
        let session_id = Uuid::new_v4();
        let bindings = TokenBindings {
            device_id: Some(device.id),
            session_id: Some(session_id),
            team_id: Some(user.team_id),
        };
        let access_token = self
            .tokens
            .issue(TokenKind::Access, &user.id.to_string(), bindings)?;
        let refresh_token = self
            .tokens
            .issue(TokenKind::Refresh, &user.id.to_string(), bindings)?;

        let session = Session {
            id: session_id,
            user_id: user.id,
            team_id: user.team_id,
            device_id: device.id,
            started_at: now,
            expires_at: now + self.session_ttl,
            ended_at: None,
            status: SessionStatus::Open,
            override_until: None,
            last_activity_at: now,
            jti: access_token.jti.clone(),
        };
        // Last writer wins; a concurrent login for the same pair keeps its
        // own token pair valid either way.
        self.store.insert_session(session.clone()).await?;

        Ok(LoginOutcome {
            session,
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a fresh access token.
    ///
    /// # Errors
    ///
    /// `UNAUTHENTICATED` for bad/expired/revoked refresh tokens and for
    /// sessions past their expiry, whatever their stored status says.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, Error> {
        let claims = self
            .tokens
            .verify(refresh_token, TokenKind::Refresh)
            .await?;
        let session_id = claims.session_id.ok_or(Error::Unauthenticated)?;
        let mut session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(Error::Unauthenticated)?;

        let now = Utc::now();
        if !session.is_usable(now) {
            self.flip_expired_status(&mut session, now).await;
            return Err(Error::Unauthenticated);
        }

        let access = self.tokens.issue(
            TokenKind::Access,
            &claims.sub,
            TokenBindings {
                device_id: Some(session.device_id),
                session_id: Some(session.id),
                team_id: Some(session.team_id),
            },
        )?;
        session.last_activity_at = now;
        session.jti = access.jti.clone();
        self.store.update_session(&session).await?;
        Ok(access)
    }

    /// End a session on the owner's request.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for unknown sessions; `INSUFFICIENT_PERMISSIONS` when the
    /// caller does not own the session.
    pub async fn logout(&self, session_id: Uuid, user_id: Uuid) -> Result<(), Error> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(Error::NotFound("session"))?;
        if session.user_id != user_id {
            return Err(Error::InsufficientPermissions {
                reason: "session belongs to another user".to_string(),
            });
        }
        self.end(session).await
    }

    /// Administrative termination, no ownership check.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for unknown sessions; store failures as `INTERNAL_ERROR`.
    pub async fn end_session(&self, session_id: Uuid) -> Result<(), Error> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(Error::NotFound("session"))?;
        self.end(session).await
    }

    async fn end(&self, mut session: Session) -> Result<(), Error> {
        let now = Utc::now();
        session.ended_at = Some(now);
        session.status = SessionStatus::Ended;
        self.store.update_session(&session).await?;
        self.tokens
            .revoke(
                &session.jti,
                session.expires_at,
                "session ended",
                Some(session.user_id),
            )
            .await
    }

    /// Verify a team's supervisor PIN and attach a time-boxed override
    /// window to the device's open sessions.
    ///
    /// The returned token relaxes usage-time policy only; it grants no
    /// resource permission the holder's access token lacks.
    ///
    /// # Errors
    ///
    /// `RATE_LIMITED`/`ACCOUNT_LOCKED` before verification;
    /// `DEVICE_NOT_FOUND` for unknown devices; `NOT_FOUND` when the team has
    /// no active supervisor PIN; `INVALID_CREDENTIALS` for a wrong PIN.
    pub async fn supervisor_override(
        &self,
        supervisor_pin: &str,
        device_code: &str,
        source_ip: Option<&str>,
    ) -> Result<OverrideOutcome, Error> {
        if supervisor_pin.trim().is_empty() || device_code.trim().is_empty() {
            return Err(Error::Validation(
                "supervisor_pin and deviceId are required".to_string(),
            ));
        }
        self.rate_limiter
            .register_attempt(device_code, Channel::SupervisorPin)?;

        let device = self
            .store
            .device_by_code(device_code)
            .await?
            .filter(|device| device.active)
            .ok_or(Error::DeviceNotFound)?;
        let pin_row = self
            .store
            .active_pin_for_team(device.team_id)
            .await?
            .ok_or(Error::NotFound("supervisor pin"))?;

        let pin_ok = self
            .verify_blocking(supervisor_pin, pin_row.pin.clone())
            .await?;
        self.record_attempt(pin_row.id, PinAttemptKind::SupervisorPin, pin_ok, source_ip)
            .await?;
        if !pin_ok {
            return Err(Error::InvalidCredentials);
        }
        self.rate_limiter
            .record_success(device_code, Channel::SupervisorPin);

        let now = Utc::now();
        let override_until = now + self.override_window;
        for mut session in self.store.open_sessions_for_device(device.id).await? {
            if !session.is_usable(now) {
                continue;
            }
            // Windows only ever extend; an earlier, longer override stays.
            if session
                .override_until
                .is_none_or(|current| override_until > current)
            {
                session.override_until = Some(override_until);
                self.store.update_session(&session).await?;
            }
        }

        let token = self.tokens.issue(
            TokenKind::Override,
            &pin_row.id.to_string(),
            TokenBindings {
                device_id: Some(device.id),
                session_id: None,
                team_id: Some(device.team_id),
            },
        )?;
        Ok(OverrideOutcome {
            override_until,
            token,
        })
    }

    async fn verify_blocking(
        &self,
        secret: &str,
        stored: crate::auth::credentials::CredentialHash,
    ) -> Result<bool, Error> {
        let verifier = self.verifier.clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || verifier.verify(&secret, &stored))
            .await
            .map_err(Error::internal)
    }

    async fn record_attempt(
        &self,
        subject_id: Uuid,
        kind: PinAttemptKind,
        success: bool,
        source_ip: Option<&str>,
    ) -> Result<(), Error> {
        self.store
            .record_pin_attempt(PinAttempt {
                id: Uuid::new_v4(),
                subject_id,
                kind,
                success,
                source_ip: source_ip.map(str::to_string),
                attempted_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Best-effort status flip for audit; expiry itself is already decided
    /// by the timestamp.
    async fn flip_expired_status(&self, session: &mut Session, now: DateTime<Utc>) {
        if session.effective_status(now) == SessionStatus::Expired
            && session.status == SessionStatus::Open
        {
            session.status = SessionStatus::Expired;
            if let Err(err) = self.store.update_session(session).await {
                warn!("Failed to persist expired session status: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::test_kdf;
    use crate::config::RateLimitRule;
    use crate::signer::test_signer;
    use crate::store::memory::MemoryStore;
    use crate::store::SupervisorPin;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: SessionService,
        tokens: Arc<TokenService>,
        team_id: Uuid,
        device_id: Uuid,
        user_id: Uuid,
    }

    fn config() -> FieldgateConfig {
        FieldgateConfig::new().with_login_limit(RateLimitRule::new(
            Duration::from_secs(300),
            3,
            6,
            Duration::from_secs(1800),
        ))
    }

    impl Fixture {
        fn new() -> Self {
            let config = config();
            let store = Arc::new(MemoryStore::new());
            let verifier = CredentialVerifier::new(test_kdf());
            let tokens = Arc::new(
                TokenService::new(
                    Arc::new(test_signer()),
                    store.clone() as Arc<dyn Store>,
                    &config,
                )
                .expect("default ttls parse"),
            );
            let rate_limiter = Arc::new(RateLimiter::new(
                config.login_limit(),
                config.user_pin_limit(),
                config.supervisor_pin_limit(),
            ));
            let service = SessionService::new(
                store.clone() as Arc<dyn Store>,
                verifier.clone(),
                rate_limiter,
                tokens.clone(),
                &config,
            )
            .expect("session ttl parses");

            let team_id = Uuid::new_v4();
            let device_id = Uuid::new_v4();
            let user_id = Uuid::new_v4();
            store.seed_team(crate::store::Team {
                id: team_id,
                name: "Team North".to_string(),
                region: Some("north".to_string()),
                tz: "Africa/Nairobi".to_string(),
                active: true,
            });
            store.seed_device(Device {
                id: device_id,
                team_id,
                code: "dev-1".to_string(),
                active: true,
            });
            store.seed_user(User {
                id: user_id,
                team_id,
                code: "u001".to_string(),
                pin: verifier.hash("123456").expect("hashing works"),
                active: true,
            });

            Self {
                store,
                service,
                tokens,
                team_id,
                device_id,
                user_id,
            }
        }

        fn seed_supervisor_pin(&self, pin: &str) -> Uuid {
            let verifier = CredentialVerifier::new(test_kdf());
            let id = Uuid::new_v4();
            self.store.seed_supervisor_pin(SupervisorPin {
                id,
                team_id: self.team_id,
                name: "duty supervisor".to_string(),
                pin: verifier.hash(pin).expect("hashing works"),
                active: true,
                rotated_at: Utc::now(),
            });
            id
        }
    }

    #[tokio::test]
    async fn login_with_seeded_pin_opens_a_session() -> Result<(), Error> {
        let fixture = Fixture::new();
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", Some("10.0.0.1"))
            .await?;

        assert_eq!(outcome.session.status, SessionStatus::Open);
        assert_eq!(outcome.session.user_id, fixture.user_id);
        assert_eq!(outcome.session.device_id, fixture.device_id);
        assert!(outcome.session.expires_at > Utc::now());
        assert!(!outcome.access_token.token.is_empty());
        assert!(!outcome.refresh_token.token.is_empty());

        // The access token immediately authenticates a whoami-style lookup.
        let claims = fixture
            .tokens
            .verify(&outcome.access_token.token, TokenKind::Access)
            .await?;
        assert_eq!(claims.sub, fixture.user_id.to_string());
        assert_eq!(claims.session_id, Some(outcome.session.id));

        let attempts = fixture.store.pin_attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
        assert_eq!(attempts[0].source_ip.as_deref(), Some("10.0.0.1"));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_pin_and_unknown_user_fail_identically() {
        let fixture = Fixture::new();

        let wrong_pin = fixture
            .service
            .login("dev-1", "u001", "000000", None)
            .await;
        let unknown_user = fixture
            .service
            .login("dev-1", "u999", "123456", None)
            .await;

        assert!(matches!(wrong_pin, Err(Error::InvalidCredentials)));
        assert!(matches!(unknown_user, Err(Error::InvalidCredentials)));

        // No session rows appear on failure.
        let open = fixture
            .store
            .open_sessions_for_device(fixture.device_id)
            .await
            .expect("store is up");
        assert!(open.is_empty());

        // The wrong-PIN attempt is on the audit trail; the unknown-user one
        // has no subject to pin it to.
        let attempts = fixture.store.pin_attempts();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
    }

    #[tokio::test]
    async fn login_rate_limit_trips_on_the_fourth_attempt() {
        let fixture = Fixture::new();
        for _ in 0..3 {
            let _ = fixture.service.login("dev-1", "u001", "000000", None).await;
        }
        let limited = fixture.service.login("dev-1", "u001", "123456", None).await;
        match limited {
            Err(Error::RateLimited { retry_after }) => {
                assert!(retry_after > Duration::from_secs(0));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_rotates_the_access_token() -> Result<(), Error> {
        let fixture = Fixture::new();
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", None)
            .await?;

        let access = fixture.service.refresh(&outcome.refresh_token.token).await?;
        let claims = fixture.tokens.verify(&access.token, TokenKind::Access).await?;
        assert_eq!(claims.session_id, Some(outcome.session.id));

        // The session row tracks the newest access jti.
        let session = fixture
            .store
            .session_by_id(outcome.session.id)
            .await
            .expect("store is up")
            .expect("session exists");
        assert_eq!(session.jti, access.jti);
        Ok(())
    }

    #[tokio::test]
    async fn an_access_token_cannot_refresh() -> Result<(), Error> {
        let fixture = Fixture::new();
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", None)
            .await?;
        let result = fixture.service.refresh(&outcome.access_token.token).await;
        assert!(matches!(result, Err(Error::Unauthenticated)));
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_refuses_refresh_even_with_stale_open_status() -> Result<(), Error> {
        let fixture = Fixture::new();
        let now = Utc::now();
        let session_id = Uuid::new_v4();
        fixture
            .store
            .insert_session(Session {
                id: session_id,
                user_id: fixture.user_id,
                team_id: fixture.team_id,
                device_id: fixture.device_id,
                started_at: now - TimeDelta::hours(13),
                expires_at: now - TimeDelta::hours(1),
                ended_at: None,
                status: SessionStatus::Open,
                override_until: None,
                last_activity_at: now - TimeDelta::hours(2),
                jti: "stale".to_string(),
            })
            .await
            .expect("store is up");

        let refresh = fixture.tokens.issue(
            TokenKind::Refresh,
            &fixture.user_id.to_string(),
            TokenBindings {
                device_id: Some(fixture.device_id),
                session_id: Some(session_id),
                team_id: Some(fixture.team_id),
            },
        )?;
        let result = fixture.service.refresh(&refresh.token).await;
        assert!(matches!(result, Err(Error::Unauthenticated)));

        // The stale status column was flipped for audit.
        let session = fixture
            .store
            .session_by_id(session_id)
            .await
            .expect("store is up")
            .expect("session exists");
        assert_eq!(session.status, SessionStatus::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn logout_ends_the_session_and_revokes_its_token() -> Result<(), Error> {
        let fixture = Fixture::new();
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", None)
            .await?;

        fixture
            .service
            .logout(outcome.session.id, fixture.user_id)
            .await?;

        let session = fixture
            .store
            .session_by_id(outcome.session.id)
            .await
            .expect("store is up")
            .expect("session exists");
        assert_eq!(session.status, SessionStatus::Ended);
        assert!(session.ended_at.is_some());

        let verify = fixture
            .tokens
            .verify(&outcome.access_token.token, TokenKind::Access)
            .await;
        assert!(matches!(verify, Err(Error::Unauthenticated)));
        Ok(())
    }

    #[tokio::test]
    async fn logout_rejects_a_foreign_session() -> Result<(), Error> {
        let fixture = Fixture::new();
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", None)
            .await?;
        let result = fixture
            .service
            .logout(outcome.session.id, Uuid::new_v4())
            .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientPermissions { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn supervisor_override_extends_open_sessions() -> Result<(), Error> {
        let fixture = Fixture::new();
        fixture.seed_supervisor_pin("424242");
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", None)
            .await?;

        let before = Utc::now();
        let granted = fixture
            .service
            .supervisor_override("424242", "dev-1", Some("10.0.0.2"))
            .await?;

        // override_until lands at now + configured minutes (120 by default).
        let expected = before + TimeDelta::minutes(120);
        let slack = TimeDelta::seconds(5);
        assert!(granted.override_until >= expected - slack);
        assert!(granted.override_until <= expected + slack);

        let session = fixture
            .store
            .session_by_id(outcome.session.id)
            .await
            .expect("store is up")
            .expect("session exists");
        assert_eq!(session.override_until, Some(granted.override_until));

        // Override tokens pass the override gate but are not access tokens.
        let claims = fixture
            .tokens
            .verify_for_override(&granted.token.token, Utc::now())
            .await?;
        assert_eq!(claims.kind, TokenKind::Override);
        assert!(matches!(
            fixture
                .tokens
                .verify(&granted.token.token, TokenKind::Access)
                .await,
            Err(Error::Unauthenticated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn override_windows_only_ever_extend() -> Result<(), Error> {
        let fixture = Fixture::new();
        fixture.seed_supervisor_pin("424242");
        let outcome = fixture
            .service
            .login("dev-1", "u001", "123456", None)
            .await?;

        // A longer window is already attached.
        let far = Utc::now() + TimeDelta::hours(6);
        let mut session = fixture
            .store
            .session_by_id(outcome.session.id)
            .await
            .expect("store is up")
            .expect("session exists");
        session.override_until = Some(far);
        fixture
            .store
            .update_session(&session)
            .await
            .expect("store is up");

        fixture
            .service
            .supervisor_override("424242", "dev-1", None)
            .await?;

        let session = fixture
            .store
            .session_by_id(outcome.session.id)
            .await
            .expect("store is up")
            .expect("session exists");
        assert_eq!(session.override_until, Some(far));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_supervisor_pin_is_generic_and_audited() {
        let fixture = Fixture::new();
        let pin_id = fixture.seed_supervisor_pin("424242");

        let result = fixture
            .service
            .supervisor_override("000000", "dev-1", None)
            .await;
        assert!(matches!(result, Err(Error::InvalidCredentials)));

        let attempts = fixture.store.pin_attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].subject_id, pin_id);
        assert_eq!(attempts[0].kind, PinAttemptKind::SupervisorPin);
        assert!(!attempts[0].success);
    }

    #[tokio::test]
    async fn override_for_an_unknown_device_is_not_found() {
        let fixture = Fixture::new();
        fixture.seed_supervisor_pin("424242");
        let result = fixture
            .service
            .supervisor_override("424242", "dev-9", None)
            .await;
        assert!(matches!(result, Err(Error::DeviceNotFound)));
    }
}

//! End-to-end device flows over the in-memory store: login, whoami, policy
//! fetch, supervisor override, refresh, logout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use fieldgate::auth::credentials::CredentialVerifier;
use fieldgate::auth::rate_limit::RateLimiter;
use fieldgate::auth::session::SessionService;
use fieldgate::auth::tokens::{TokenKind, TokenService};
use fieldgate::authz::engine::AuthorizationEngine;
use fieldgate::authz::model::{Action, PermissionScope, Resource, role_names};
use fieldgate::config::{FieldgateConfig, KdfConfig};
use fieldgate::error::Error;
use fieldgate::policy::issuer::PolicyIssuer;
use fieldgate::signer::Signer;
use fieldgate::store::memory::MemoryStore;
use fieldgate::store::{
    Device, Permission, Role, RolePermission, SessionStore, Store, SupervisorPin, Team, User,
    UserRoleAssignment,
};

fn fast_kdf() -> KdfConfig {
    KdfConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
        output_len: 32,
    }
}

struct World {
    store: Arc<MemoryStore>,
    sessions: SessionService,
    tokens: Arc<TokenService>,
    authz: AuthorizationEngine,
    policy: PolicyIssuer,
    team_id: Uuid,
    user_id: Uuid,
    supervisor_pin_id: Uuid,
}

impl World {
    fn new() -> Self {
        let config = FieldgateConfig::new()
            .with_kdf(fast_kdf())
            .with_permission_cache_ttl(Duration::from_secs(300));
        let store = Arc::new(MemoryStore::new());
        let dyn_store = store.clone() as Arc<dyn Store>;
        let signer = Arc::new(Signer::from_signing_key(
            ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]),
        ));
        let verifier = CredentialVerifier::new(config.kdf());

        let tokens = Arc::new(
            TokenService::new(signer.clone(), dyn_store.clone(), &config)
                .expect("default ttls parse"),
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            config.login_limit(),
            config.user_pin_limit(),
            config.supervisor_pin_limit(),
        ));
        let sessions = SessionService::new(
            dyn_store.clone(),
            verifier.clone(),
            rate_limiter,
            tokens.clone(),
            &config,
        )
        .expect("session ttl parses");
        let authz = AuthorizationEngine::new(dyn_store.clone(), &config);
        let policy = PolicyIssuer::new(dyn_store, signer, &config);

        // Seed one team, one device, one enumerator with PIN 123456, and a
        // supervisor PIN.
        let team_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let supervisor_pin_id = Uuid::new_v4();
        store.seed_team(Team {
            id: team_id,
            name: "Team North".to_string(),
            region: Some("north".to_string()),
            tz: "Africa/Nairobi".to_string(),
            active: true,
        });
        store.seed_device(Device {
            id: Uuid::new_v4(),
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
        store.seed_supervisor_pin(SupervisorPin {
            id: supervisor_pin_id,
            team_id,
            name: "duty supervisor".to_string(),
            pin: verifier.hash("873201").expect("hashing works"),
            active: true,
            rotated_at: Utc::now(),
        });

        let role_id = Uuid::new_v4();
        store.seed_role(Role {
            id: role_id,
            name: role_names::ENUMERATOR.to_string(),
            level: 30,
            active: true,
        });
        let permission_id = Uuid::new_v4();
        store.seed_permission(Permission {
            id: permission_id,
            name: "TELEMETRY:CREATE".to_string(),
            resource: Resource::Telemetry,
            action: Action::Create,
            scope: PermissionScope::Team,
        });
        store.seed_grant(RolePermission {
            role_id,
            permission_id,
            active: true,
        });
        store.seed_assignment(UserRoleAssignment {
            id: Uuid::new_v4(),
            user_id,
            role_id,
            assigned_by: None,
            team_scope: None,
            active: true,
            expires_at: None,
        });

        Self {
            store,
            sessions,
            tokens,
            authz,
            policy,
            team_id,
            user_id,
            supervisor_pin_id,
        }
    }
}

#[tokio::test]
async fn login_then_whoami_then_policy_fetch() -> Result<(), Error> {
    let world = World::new();

    let outcome = world
        .sessions
        .login("dev-1", "u001", "123456", Some("203.0.113.7"))
        .await?;
    assert!(outcome.session.expires_at > Utc::now());

    // whoami: the returned access token authenticates immediately.
    let claims = world
        .tokens
        .verify(&outcome.access_token.token, TokenKind::Access)
        .await?;
    assert_eq!(claims.sub, world.user_id.to_string());
    assert_eq!(claims.team_id, Some(world.team_id));

    // The enumerator can submit telemetry but not administer users.
    let allowed = world
        .authz
        .check_permission(world.user_id, Resource::Telemetry, Action::Create)
        .await;
    assert!(allowed.allowed);
    let denied = world
        .authz
        .check_permission(world.user_id, Resource::Users, Action::Delete)
        .await;
    assert!(!denied.allowed);

    // Device policy round-trips through offline verification.
    let issued = world.policy.issue("dev-1", Some("203.0.113.7")).await?;
    let payload = world.policy.verify(&issued.signed_document)?;
    assert_eq!(payload.device_id, "dev-1");
    assert_eq!(payload.tz, "Africa/Nairobi");
    assert_eq!(payload.version, 1);
    assert_eq!(world.store.policy_issues().len(), 1);
    Ok(())
}

#[tokio::test]
async fn supervisor_override_grants_a_window_without_widening_permissions() -> Result<(), Error> {
    let world = World::new();
    let outcome = world.sessions.login("dev-1", "u001", "123456", None).await?;

    let granted = world
        .sessions
        .supervisor_override("873201", "dev-1", None)
        .await?;

    // The open session carries the new window.
    let session = world
        .store
        .session_by_id(outcome.session.id)
        .await
        .expect("store is up")
        .expect("session exists");
    assert_eq!(session.override_until, Some(granted.override_until));

    // The override token passes override-gated verification but is no
    // access token, and its subject (the supervisor PIN) holds no resource
    // permissions at all.
    let claims = world
        .tokens
        .verify_for_override(&granted.token.token, Utc::now())
        .await?;
    assert_eq!(claims.kind, TokenKind::Override);
    assert!(matches!(
        world
            .tokens
            .verify(&granted.token.token, TokenKind::Access)
            .await,
        Err(Error::Unauthenticated)
    ));
    let decision = world
        .authz
        .check_permission(world.supervisor_pin_id, Resource::Telemetry, Action::Create)
        .await;
    assert!(!decision.allowed);
    Ok(())
}

#[tokio::test]
async fn refresh_and_logout_close_the_loop() -> Result<(), Error> {
    let world = World::new();
    let outcome = world.sessions.login("dev-1", "u001", "123456", None).await?;

    let rotated = world.sessions.refresh(&outcome.refresh_token.token).await?;
    world
        .tokens
        .verify(&rotated.token, TokenKind::Access)
        .await?;

    world.sessions.logout(outcome.session.id, world.user_id).await?;

    // The rotated access token was bound to the session and is revoked with it.
    assert!(matches!(
        world.tokens.verify(&rotated.token, TokenKind::Access).await,
        Err(Error::Unauthenticated)
    ));
    // Refreshing an ended session fails too.
    assert!(matches!(
        world.sessions.refresh(&outcome.refresh_token.token).await,
        Err(Error::Unauthenticated)
    ));
    Ok(())
}

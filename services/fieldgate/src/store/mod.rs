//! Persisted shapes and the narrow store contracts the core depends on.
//!
//! The core never sees a connection pool or a query string; it talks to
//! these traits. Two adapters exist: [`memory::MemoryStore`] for tests and
//! single-node deployments, and [`postgres::PgStore`] for shared state.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::credentials::CredentialHash;
use crate::authz::model::{Action, PermissionScope, Resource};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Conflict(String),
}

impl From<StoreError> for crate::error::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::Internal(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub region: Option<String>,
    pub tz: String,
    pub active: bool,
}

#[derive(Clone, Debug)]
pub struct Device {
    pub id: Uuid,
    pub team_id: Uuid,
    pub code: String,
    pub active: bool,
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub team_id: Uuid,
    pub code: String,
    pub pin: CredentialHash,
    pub active: bool,
}

#[derive(Clone, Debug)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub level: i32,
    pub active: bool,
}

#[derive(Clone, Debug)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub resource: Resource,
    pub action: Action,
    pub scope: PermissionScope,
}

#[derive(Clone, Debug)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub active: bool,
}

#[derive(Clone, Debug)]
pub struct UserRoleAssignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub team_scope: Option<Uuid>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserRoleAssignment {
    /// Active and not expired at `now`.
    #[must_use]
    pub fn in_force(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Expired,
    Ended,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Expired => "expired",
            Self::Ended => "ended",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub device_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub override_until: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub jti: String,
}

impl Session {
    /// The stored status column is eventually consistent; the expiry
    /// timestamp is authoritative.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.ended_at.is_some() || self.status == SessionStatus::Ended {
            SessionStatus::Ended
        } else if self.expires_at <= now {
            SessionStatus::Expired
        } else {
            SessionStatus::Open
        }
    }

    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == SessionStatus::Open
    }
}

#[derive(Clone, Debug)]
pub struct SupervisorPin {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub pin: CredentialHash,
    pub active: bool,
    pub rotated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct PolicyIssue {
    pub id: Uuid,
    pub device_id: Uuid,
    pub team_id: Uuid,
    pub version: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signing_key_id: String,
    pub payload: serde_json::Value,
    pub source_ip: Option<String>,
}

#[derive(Clone, Debug)]
pub struct JwtRevocation {
    pub jti: String,
    pub revoked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub revoked_by: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinAttemptKind {
    UserPin,
    SupervisorPin,
}

impl PinAttemptKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserPin => "user_pin",
            Self::SupervisorPin => "supervisor_pin",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PinAttempt {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub kind: PinAttemptKind,
    pub success: bool,
    pub source_ip: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Users, devices, teams, and the append-only attempt audit trail.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn user_by_code(&self, code: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn device_by_code(&self, code: &str) -> Result<Option<Device>, StoreError>;
    async fn device_by_id(&self, id: Uuid) -> Result<Option<Device>, StoreError>;
    async fn team_by_id(&self, id: Uuid) -> Result<Option<Team>, StoreError>;
    async fn record_pin_attempt(&self, attempt: PinAttempt) -> Result<(), StoreError>;
}

/// Role/permission tables feeding the authorization engine.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    /// Active assignment rows for a user. Expiry filtering happens in the
    /// engine so the cut-off instant is the same one used for caching.
    async fn assignments_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserRoleAssignment>, StoreError>;
    async fn roles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, StoreError>;
    async fn grants_for_roles(&self, role_ids: &[Uuid]) -> Result<Vec<RolePermission>, StoreError>;
    async fn permissions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>, StoreError>;
}

/// Session rows. Updates are whole-row, last-writer-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<(), StoreError>;
    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError>;
    async fn update_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn open_sessions_for_device(&self, device_id: Uuid) -> Result<Vec<Session>, StoreError>;
}

/// Supervisor PIN rows. Rotation must deactivate the previous active PIN and
/// activate the new one in one logical operation.
#[async_trait]
pub trait SupervisorPinStore: Send + Sync {
    async fn active_pin_for_team(&self, team_id: Uuid) -> Result<Option<SupervisorPin>, StoreError>;
    async fn rotate_pin(&self, pin: SupervisorPin) -> Result<(), StoreError>;
}

/// Immutable policy issuance audit rows.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn insert_policy_issue(&self, issue: PolicyIssue) -> Result<(), StoreError>;
    async fn next_policy_version(&self, device_id: Uuid) -> Result<i64, StoreError>;
}

/// Append-only token revocation list, keyed by jti.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn insert_revocation(&self, revocation: JwtRevocation) -> Result<(), StoreError>;
    async fn revocation_by_jti(&self, jti: &str) -> Result<Option<JwtRevocation>, StoreError>;
}

/// Everything the core needs from persistence, in one object-safe bundle.
pub trait Store:
    DirectoryStore + AuthzStore + SessionStore + SupervisorPinStore + PolicyStore + RevocationStore
{
}

impl<T> Store for T where
    T: DirectoryStore
        + AuthzStore
        + SessionStore
        + SupervisorPinStore
        + PolicyStore
        + RevocationStore
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            started_at: now,
            expires_at: now + expires_in,
            ended_at: None,
            status: SessionStatus::Open,
            override_until: None,
            last_activity_at: now,
            jti: "jti-1".to_string(),
        }
    }

    #[test]
    fn expiry_timestamp_overrides_stale_status() {
        // Stored status still says open, but the clock has moved past expiry.
        let stale = session(Duration::seconds(-10));
        assert_eq!(stale.status, SessionStatus::Open);
        assert_eq!(stale.effective_status(Utc::now()), SessionStatus::Expired);
        assert!(!stale.is_usable(Utc::now()));
    }

    #[test]
    fn ended_wins_over_open_expiry() {
        let mut ended = session(Duration::hours(1));
        ended.ended_at = Some(Utc::now());
        assert_eq!(ended.effective_status(Utc::now()), SessionStatus::Ended);
    }

    #[test]
    fn assignment_expiry_is_checked_against_now() {
        let now = Utc::now();
        let assignment = UserRoleAssignment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            assigned_by: None,
            team_scope: None,
            active: true,
            expires_at: Some(now - Duration::seconds(1)),
        };
        assert!(!assignment.in_force(now));

        let open_ended = UserRoleAssignment {
            expires_at: None,
            ..assignment
        };
        assert!(open_ended.in_force(now));

        let inactive = UserRoleAssignment {
            active: false,
            expires_at: None,
            ..open_ended
        };
        assert!(!inactive.in_force(now));
    }
}

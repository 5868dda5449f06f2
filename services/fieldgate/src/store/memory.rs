//! In-memory store adapter.
//!
//! Backs the test suite and single-node deployments. Every table is a plain
//! map behind one `RwLock`; the supervisor PIN rotation invariant holds
//! because rotation swaps the active flag and inserts under the same write
//! guard.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{
    AuthzStore, Device, DirectoryStore, JwtRevocation, Permission, PinAttempt, PolicyIssue,
    PolicyStore, RevocationStore, Role, RolePermission, Session, SessionStore, StoreError,
    SupervisorPin, SupervisorPinStore, Team, User, UserRoleAssignment,
};

#[derive(Default)]
struct Tables {
    teams: HashMap<Uuid, Team>,
    devices: HashMap<Uuid, Device>,
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: Vec<RolePermission>,
    assignments: Vec<UserRoleAssignment>,
    sessions: HashMap<Uuid, Session>,
    supervisor_pins: HashMap<Uuid, SupervisorPin>,
    policy_issues: Vec<PolicyIssue>,
    revocations: HashMap<String, JwtRevocation>,
    pin_attempts: Vec<PinAttempt>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed_team(&self, team: Team) {
        self.write().teams.insert(team.id, team);
    }

    pub fn seed_device(&self, device: Device) {
        self.write().devices.insert(device.id, device);
    }

    pub fn seed_user(&self, user: User) {
        self.write().users.insert(user.id, user);
    }

    pub fn seed_role(&self, role: Role) {
        self.write().roles.insert(role.id, role);
    }

    pub fn seed_permission(&self, permission: Permission) {
        self.write().permissions.insert(permission.id, permission);
    }

    pub fn seed_grant(&self, grant: RolePermission) {
        self.write().role_permissions.push(grant);
    }

    pub fn seed_assignment(&self, assignment: UserRoleAssignment) {
        self.write().assignments.push(assignment);
    }

    pub fn seed_supervisor_pin(&self, pin: SupervisorPin) {
        self.write().supervisor_pins.insert(pin.id, pin);
    }

    /// Snapshot of the append-only attempt audit trail.
    #[must_use]
    pub fn pin_attempts(&self) -> Vec<PinAttempt> {
        self.read().pin_attempts.clone()
    }

    /// Snapshot of persisted policy issuance rows.
    #[must_use]
    pub fn policy_issues(&self) -> Vec<PolicyIssue> {
        self.read().policy_issues.clone()
    }

    /// All active supervisor PINs for a team, regardless of rotation state.
    #[must_use]
    pub fn active_pins_for_team(&self, team_id: Uuid) -> Vec<SupervisorPin> {
        self.read()
            .supervisor_pins
            .values()
            .filter(|pin| pin.team_id == team_id && pin.active)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .read()
            .users
            .values()
            .find(|user| user.code == code)
            .cloned())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn device_by_code(&self, code: &str) -> Result<Option<Device>, StoreError> {
        Ok(self
            .read()
            .devices
            .values()
            .find(|device| device.code == code)
            .cloned())
    }

    async fn device_by_id(&self, id: Uuid) -> Result<Option<Device>, StoreError> {
        Ok(self.read().devices.get(&id).cloned())
    }

    async fn team_by_id(&self, id: Uuid) -> Result<Option<Team>, StoreError> {
        Ok(self.read().teams.get(&id).cloned())
    }

    async fn record_pin_attempt(&self, attempt: PinAttempt) -> Result<(), StoreError> {
        self.write().pin_attempts.push(attempt);
        Ok(())
    }
}

#[async_trait]
impl AuthzStore for MemoryStore {
    async fn assignments_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserRoleAssignment>, StoreError> {
        Ok(self
            .read()
            .assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id && assignment.active)
            .cloned()
            .collect())
    }

    async fn roles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        let tables = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.roles.get(id))
            .cloned()
            .collect())
    }

    async fn grants_for_roles(&self, role_ids: &[Uuid]) -> Result<Vec<RolePermission>, StoreError> {
        Ok(self
            .read()
            .role_permissions
            .iter()
            .filter(|grant| grant.active && role_ids.contains(&grant.role_id))
            .cloned()
            .collect())
    }

    async fn permissions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>, StoreError> {
        let tables = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.permissions.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        // Last writer wins, matching the concurrency contract for logins.
        self.write().sessions.insert(session.id, session);
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.read().sessions.get(&id).cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        self.write().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn open_sessions_for_device(&self, device_id: Uuid) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .read()
            .sessions
            .values()
            .filter(|session| {
                session.device_id == device_id
                    && session.ended_at.is_none()
                    && session.status == super::SessionStatus::Open
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SupervisorPinStore for MemoryStore {
    async fn active_pin_for_team(
        &self,
        team_id: Uuid,
    ) -> Result<Option<SupervisorPin>, StoreError> {
        Ok(self
            .read()
            .supervisor_pins
            .values()
            .find(|pin| pin.team_id == team_id && pin.active)
            .cloned())
    }

    async fn rotate_pin(&self, pin: SupervisorPin) -> Result<(), StoreError> {
        let mut tables = self.write();
        for existing in tables.supervisor_pins.values_mut() {
            if existing.team_id == pin.team_id {
                existing.active = false;
            }
        }
        tables.supervisor_pins.insert(pin.id, pin);
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn insert_policy_issue(&self, issue: PolicyIssue) -> Result<(), StoreError> {
        self.write().policy_issues.push(issue);
        Ok(())
    }

    async fn next_policy_version(&self, device_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .read()
            .policy_issues
            .iter()
            .filter(|issue| issue.device_id == device_id)
            .map(|issue| issue.version)
            .max()
            .unwrap_or(0)
            + 1)
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn insert_revocation(&self, revocation: JwtRevocation) -> Result<(), StoreError> {
        self.write()
            .revocations
            .insert(revocation.jti.clone(), revocation);
        Ok(())
    }

    async fn revocation_by_jti(&self, jti: &str) -> Result<Option<JwtRevocation>, StoreError> {
        Ok(self.read().revocations.get(jti).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::CredentialHash;
    use chrono::Utc;

    fn pin(team_id: Uuid, name: &str) -> SupervisorPin {
        SupervisorPin {
            id: Uuid::new_v4(),
            team_id,
            name: name.to_string(),
            pin: CredentialHash {
                hash: String::new(),
                salt: String::new(),
            },
            active: true,
            rotated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rotation_leaves_exactly_one_active_pin() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let team_id = Uuid::new_v4();

        store.rotate_pin(pin(team_id, "first")).await?;
        store.rotate_pin(pin(team_id, "second")).await?;

        let active = store.active_pins_for_team(team_id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "second");
        Ok(())
    }

    #[tokio::test]
    async fn rotation_does_not_touch_other_teams() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();

        store.rotate_pin(pin(team_a, "a")).await?;
        store.rotate_pin(pin(team_b, "b")).await?;

        assert_eq!(store.active_pins_for_team(team_a).len(), 1);
        assert_eq!(store.active_pins_for_team(team_b).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn policy_versions_increment_per_device() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        assert_eq!(store.next_policy_version(device_id).await?, 1);

        store
            .insert_policy_issue(PolicyIssue {
                id: Uuid::new_v4(),
                device_id,
                team_id: Uuid::new_v4(),
                version: 1,
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                signing_key_id: "kid".to_string(),
                payload: serde_json::Value::Null,
                source_ip: None,
            })
            .await?;
        assert_eq!(store.next_policy_version(device_id).await?, 2);
        assert_eq!(store.next_policy_version(Uuid::new_v4()).await?, 1);
        Ok(())
    }
}

//! `PostgreSQL` store adapter.
//!
//! Runtime-bound queries against the schema in `db/sql/01_fieldgate.sql`.
//! Enum columns are stored as text and parsed back through the closed
//! enums, so an unknown value surfaces as a store error instead of a bogus
//! grant. Supervisor PIN rotation runs in one transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    AuthzStore, Device, DirectoryStore, JwtRevocation, Permission, PinAttempt, PolicyIssue,
    PolicyStore, RevocationStore, Role, RolePermission, Session, SessionStatus, SessionStore,
    StoreError, SupervisorPin, SupervisorPinStore, Team, User, UserRoleAssignment,
};
use crate::auth::credentials::CredentialHash;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn bad_column(column: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("bad value in column {column}: {detail}"))
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        team_id: row.get("team_id"),
        code: row.get("code"),
        pin: CredentialHash {
            hash: row.get("pin_hash"),
            salt: row.get("pin_salt"),
        },
        active: row.get("active"),
    }
}

fn device_from_row(row: &PgRow) -> Device {
    Device {
        id: row.get("id"),
        team_id: row.get("team_id"),
        code: row.get("code"),
        active: row.get("active"),
    }
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    let status: String = row.get("status");
    let status = match status.as_str() {
        "open" => SessionStatus::Open,
        "expired" => SessionStatus::Expired,
        "ended" => SessionStatus::Ended,
        other => return Err(bad_column("status", other)),
    };
    Ok(Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        team_id: row.get("team_id"),
        device_id: row.get("device_id"),
        started_at: row.get("started_at"),
        expires_at: row.get("expires_at"),
        ended_at: row.get("ended_at"),
        status,
        override_until: row.get("override_until"),
        last_activity_at: row.get("last_activity_at"),
        jti: row.get("jti"),
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, StoreError> {
    let resource: String = row.get("resource");
    let action: String = row.get("action");
    let scope: String = row.get("scope");
    Ok(Permission {
        id: row.get("id"),
        name: row.get("name"),
        resource: resource
            .parse()
            .map_err(|err| bad_column("resource", err))?,
        action: action.parse().map_err(|err| bad_column("action", err))?,
        scope: scope.parse().map_err(|err| bad_column("scope", err))?,
    })
}

#[async_trait]
impl DirectoryStore for PgStore {
    async fn user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        let query = "SELECT id, team_id, code, pin_hash, pin_salt, active FROM users WHERE code = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let query = "SELECT id, team_id, code, pin_hash, pin_salt, active FROM users WHERE id = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn device_by_code(&self, code: &str) -> Result<Option<Device>, StoreError> {
        let query = "SELECT id, team_id, code, active FROM devices WHERE code = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.as_ref().map(device_from_row))
    }

    async fn device_by_id(&self, id: Uuid) -> Result<Option<Device>, StoreError> {
        let query = "SELECT id, team_id, code, active FROM devices WHERE id = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.as_ref().map(device_from_row))
    }

    async fn team_by_id(&self, id: Uuid) -> Result<Option<Team>, StoreError> {
        let query = "SELECT id, name, region, tz, active FROM teams WHERE id = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|row| Team {
            id: row.get("id"),
            name: row.get("name"),
            region: row.get("region"),
            tz: row.get("tz"),
            active: row.get("active"),
        }))
    }

    async fn record_pin_attempt(&self, attempt: PinAttempt) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO pin_attempts (id, subject_id, kind, success, source_ip, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        sqlx::query(query)
            .bind(attempt.id)
            .bind(attempt.subject_id)
            .bind(attempt.kind.as_str())
            .bind(attempt.success)
            .bind(attempt.source_ip)
            .bind(attempt.attempted_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl AuthzStore for PgStore {
    async fn assignments_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserRoleAssignment>, StoreError> {
        let query = r"
            SELECT id, user_id, role_id, assigned_by, team_scope, active, expires_at
            FROM user_role_assignments
            WHERE user_id = $1 AND active
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(rows
            .iter()
            .map(|row| UserRoleAssignment {
                id: row.get("id"),
                user_id: row.get("user_id"),
                role_id: row.get("role_id"),
                assigned_by: row.get("assigned_by"),
                team_scope: row.get("team_scope"),
                active: row.get("active"),
                expires_at: row.get("expires_at"),
            })
            .collect())
    }

    async fn roles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        let query = "SELECT id, name, level, active FROM roles WHERE id = ANY($1)";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(rows
            .iter()
            .map(|row| Role {
                id: row.get("id"),
                name: row.get("name"),
                level: row.get("level"),
                active: row.get("active"),
            })
            .collect())
    }

    async fn grants_for_roles(&self, role_ids: &[Uuid]) -> Result<Vec<RolePermission>, StoreError> {
        let query = r"
            SELECT role_id, permission_id, active
            FROM role_permissions
            WHERE active AND role_id = ANY($1)
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(role_ids.to_vec())
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(rows
            .iter()
            .map(|row| RolePermission {
                role_id: row.get("role_id"),
                permission_id: row.get("permission_id"),
                active: row.get("active"),
            })
            .collect())
    }

    async fn permissions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>, StoreError> {
        let query = "SELECT id, name, resource, action, scope FROM permissions WHERE id = ANY($1)";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        rows.iter().map(permission_from_row).collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, team_id, device_id, started_at, expires_at, ended_at,
                 status, override_until, last_activity_at, jti)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                expires_at = EXCLUDED.expires_at,
                ended_at = EXCLUDED.ended_at,
                status = EXCLUDED.status,
                override_until = EXCLUDED.override_until,
                last_activity_at = EXCLUDED.last_activity_at,
                jti = EXCLUDED.jti
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.team_id)
            .bind(session.device_id)
            .bind(session.started_at)
            .bind(session.expires_at)
            .bind(session.ended_at)
            .bind(session.status.as_str())
            .bind(session.override_until)
            .bind(session.last_activity_at)
            .bind(session.jti)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let query = r"
            SELECT id, user_id, team_id, device_id, started_at, expires_at, ended_at,
                   status, override_until, last_activity_at, jti
            FROM sessions WHERE id = $1
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        // Whole-row, last-writer-wins by contract.
        let query = r"
            UPDATE sessions SET
                expires_at = $2, ended_at = $3, status = $4,
                override_until = $5, last_activity_at = $6, jti = $7
            WHERE id = $1
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
        sqlx::query(query)
            .bind(session.id)
            .bind(session.expires_at)
            .bind(session.ended_at)
            .bind(session.status.as_str())
            .bind(session.override_until)
            .bind(session.last_activity_at)
            .bind(session.jti.clone())
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn open_sessions_for_device(&self, device_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let query = r"
            SELECT id, user_id, team_id, device_id, started_at, expires_at, ended_at,
                   status, override_until, last_activity_at, jti
            FROM sessions
            WHERE device_id = $1 AND status = 'open' AND ended_at IS NULL
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(device_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        rows.iter().map(session_from_row).collect()
    }
}

#[async_trait]
impl SupervisorPinStore for PgStore {
    async fn active_pin_for_team(
        &self,
        team_id: Uuid,
    ) -> Result<Option<SupervisorPin>, StoreError> {
        let query = r"
            SELECT id, team_id, name, pin_hash, pin_salt, active, rotated_at
            FROM supervisor_pins
            WHERE team_id = $1 AND active
            ORDER BY rotated_at DESC
            LIMIT 1
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(team_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|row| SupervisorPin {
            id: row.get("id"),
            team_id: row.get("team_id"),
            name: row.get("name"),
            pin: CredentialHash {
                hash: row.get("pin_hash"),
                salt: row.get("pin_salt"),
            },
            active: row.get("active"),
            rotated_at: row.get("rotated_at"),
        }))
    }

    async fn rotate_pin(&self, pin: SupervisorPin) -> Result<(), StoreError> {
        // Deactivate-old and insert-new commit together or not at all; a
        // crash between the two writes rolls back to the previous PIN.
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let deactivate = "UPDATE supervisor_pins SET active = FALSE WHERE team_id = $1 AND active";
        sqlx::query(deactivate)
            .bind(pin.team_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        let insert = r"
            INSERT INTO supervisor_pins (id, team_id, name, pin_hash, pin_salt, active, rotated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        sqlx::query(insert)
            .bind(pin.id)
            .bind(pin.team_id)
            .bind(pin.name)
            .bind(pin.pin.hash)
            .bind(pin.pin.salt)
            .bind(pin.active)
            .bind(pin.rotated_at)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn insert_policy_issue(&self, issue: PolicyIssue) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&issue.payload)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let query = r"
            INSERT INTO policy_issues
                (id, device_id, team_id, version, issued_at, expires_at,
                 signing_key_id, payload, source_ip)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        sqlx::query(query)
            .bind(issue.id)
            .bind(issue.device_id)
            .bind(issue.team_id)
            .bind(issue.version)
            .bind(issue.issued_at)
            .bind(issue.expires_at)
            .bind(issue.signing_key_id)
            .bind(payload)
            .bind(issue.source_ip)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn next_policy_version(&self, device_id: Uuid) -> Result<i64, StoreError> {
        let query =
            "SELECT COALESCE(MAX(version), 0) + 1 AS next FROM policy_issues WHERE device_id = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(device_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.get("next"))
    }
}

#[async_trait]
impl RevocationStore for PgStore {
    async fn insert_revocation(&self, revocation: JwtRevocation) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO jwt_revocations (jti, revoked_at, expires_at, reason, revoked_by)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (jti) DO NOTHING
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        sqlx::query(query)
            .bind(revocation.jti)
            .bind(revocation.revoked_at)
            .bind(revocation.expires_at)
            .bind(revocation.reason)
            .bind(revocation.revoked_by)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn revocation_by_jti(&self, jti: &str) -> Result<Option<JwtRevocation>, StoreError> {
        let query = r"
            SELECT jti, revoked_at, expires_at, reason, revoked_by
            FROM jwt_revocations WHERE jti = $1
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(jti)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|row| JwtRevocation {
            jti: row.get("jti"),
            revoked_at: row.get("revoked_at"),
            expires_at: row.get("expires_at"),
            reason: row.get("reason"),
            revoked_by: row.get("revoked_by"),
        }))
    }
}

//! Role-hierarchy authorization engine.
//!
//! Flow Overview:
//! 1) Resolve the caller's effective permissions from cache, or recompute
//!    the union over active, non-expired role assignments.
//! 2) Point checks match (resource, action) exactly.
//! 3) Contextual checks add the team boundary and the elevated cross-team
//!    role set on top.
//!
//! `SystemSettings` carries two extra gates: the caller must cross the
//! system-administrator hierarchy threshold, and the national support role
//! is denied outright even when it nominally holds the permission. Both are
//! business rules, not gaps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::cache::PermissionCache;
use super::model::{Action, GrantedPermission, Resource};
use crate::config::FieldgateConfig;
use crate::error::Error;
use crate::store::{AuthzStore, DirectoryStore, Store};

pub const REASON_TEAM_BOUNDARY: &str = "TEAM_BOUNDARY_VIOLATION";
pub const REASON_SYSTEM_SETTINGS: &str = "SYSTEM_SETTINGS_ACCESS_DENIED";
pub const REASON_SYSTEM_SETTINGS_NATIONAL_SUPPORT: &str =
    "SYSTEM_SETTINGS_ACCESS_DENIED_NATIONAL_SUPPORT";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoleSnapshot {
    pub id: Uuid,
    pub name: String,
    pub level: i32,
}

#[derive(Clone, Debug, Serialize)]
pub struct EffectiveGrant {
    pub permission: GrantedPermission,
    pub granted_by: String,
}

/// The union of permissions reachable through a user's currently active,
/// non-expired role assignments, deduplicated by (resource, action, scope).
#[derive(Clone, Debug, Serialize)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub permissions: Vec<EffectiveGrant>,
    pub roles: Vec<RoleSnapshot>,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EffectivePermissions {
    fn grant_for(&self, resource: Resource, action: Action) -> Option<&EffectiveGrant> {
        self.permissions.iter().find(|grant| {
            grant.permission.resource == resource && grant.permission.action == action
        })
    }

    fn holds_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    fn max_level(&self) -> i32 {
        self.roles.iter().map(|role| role.level).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<String>,
    pub cache: CacheOutcome,
    pub evaluation_time_ms: u64,
}

impl Decision {
    fn allow(granted_by: &str, cache: CacheOutcome, started: Instant) -> Self {
        Self {
            allowed: true,
            reason: None,
            granted_by: Some(granted_by.to_string()),
            cache,
            evaluation_time_ms: elapsed_ms(started),
        }
    }

    fn deny(reason: impl Into<String>, cache: CacheOutcome, started: Instant) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            granted_by: None,
            cache,
            evaluation_time_ms: elapsed_ms(started),
        }
    }

    /// Turn a denial into the matching taxonomy error, keeping the precise
    /// internal reason for audit.
    ///
    /// # Errors
    ///
    /// Returns the denial mapped onto [`Error`]; an allowed decision passes
    /// through unchanged.
    pub fn require(self) -> Result<Self, Error> {
        if self.allowed {
            return Ok(self);
        }
        let reason = self.reason.clone().unwrap_or_default();
        Err(match reason.as_str() {
            REASON_TEAM_BOUNDARY => Error::TeamBoundaryViolation,
            REASON_SYSTEM_SETTINGS => Error::SystemSettingsAccessDenied,
            REASON_SYSTEM_SETTINGS_NATIONAL_SUPPORT => {
                Error::SystemSettingsAccessDeniedNationalSupport
            }
            _ => Error::InsufficientPermissions { reason },
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Target of a contextual check: what kind of resource, owned by which team.
#[derive(Clone, Copy, Debug)]
pub struct ResourceDescriptor {
    pub resource: Resource,
    pub team_id: Option<Uuid>,
}

pub struct AuthorizationEngine {
    store: Arc<dyn Store>,
    cache: PermissionCache,
    system_admin_level: i32,
    system_admin_role: String,
    elevated_roles: Vec<String>,
    national_support_role: String,
}

impl AuthorizationEngine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: &FieldgateConfig) -> Self {
        Self {
            store,
            cache: PermissionCache::new(config.permission_cache_ttl()),
            system_admin_level: config.system_admin_level(),
            system_admin_role: config.system_admin_role().to_string(),
            elevated_roles: config.elevated_cross_team_roles().to_vec(),
            national_support_role: config.national_support_role().to_string(),
        }
    }

    /// Recompute the user's effective permission set and refresh the cache.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown user and `Error::Internal`
    /// when the store is unavailable. An inactive user computes to an empty
    /// set rather than an error.
    pub async fn compute_effective_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<EffectivePermissions, Error> {
        let now = Utc::now();
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound("user"))?;

        let mut role_ids: Vec<Uuid> = Vec::new();
        if user.active {
            for assignment in self.store.assignments_for_user(user_id).await? {
                if assignment.in_force(now) && !role_ids.contains(&assignment.role_id) {
                    role_ids.push(assignment.role_id);
                }
            }
        }

        let roles: Vec<_> = self
            .store
            .roles_by_ids(&role_ids)
            .await?
            .into_iter()
            .filter(|role| role.active)
            .collect();
        let active_role_ids: Vec<Uuid> = roles.iter().map(|role| role.id).collect();
        let role_names: HashMap<Uuid, String> = roles
            .iter()
            .map(|role| (role.id, role.name.clone()))
            .collect();

        let grants = self.store.grants_for_roles(&active_role_ids).await?;
        let mut permission_ids: Vec<Uuid> = Vec::new();
        for grant in &grants {
            if grant.active && !permission_ids.contains(&grant.permission_id) {
                permission_ids.push(grant.permission_id);
            }
        }
        let permission_rows: HashMap<Uuid, _> = self
            .store
            .permissions_by_ids(&permission_ids)
            .await?
            .into_iter()
            .map(|permission| (permission.id, permission))
            .collect();

        let mut seen: HashSet<GrantedPermission> = HashSet::new();
        let mut permissions: Vec<EffectiveGrant> = Vec::new();
        for grant in &grants {
            let Some(row) = permission_rows.get(&grant.permission_id) else {
                continue;
            };
            let granted = GrantedPermission {
                resource: row.resource,
                action: row.action,
                scope: row.scope,
            };
            if seen.insert(granted)
                && let Some(role_name) = role_names.get(&grant.role_id)
            {
                permissions.push(EffectiveGrant {
                    permission: granted,
                    granted_by: role_name.clone(),
                });
            }
        }

        let entry = EffectivePermissions {
            user_id,
            permissions,
            roles: roles
                .into_iter()
                .map(|role| RoleSnapshot {
                    id: role.id,
                    name: role.name,
                    level: role.level,
                })
                .collect(),
            computed_at: now,
            expires_at: now + self.cache.ttl(),
        };
        self.cache.insert(entry.clone());
        Ok(entry)
    }

    async fn resolve(&self, user_id: Uuid) -> Result<(EffectivePermissions, CacheOutcome), Error> {
        if let Some(entry) = self.cache.get(user_id, Utc::now()) {
            return Ok((entry, CacheOutcome::Hit));
        }
        let entry = self.compute_effective_permissions(user_id).await?;
        Ok((entry, CacheOutcome::Miss))
    }

    /// Point permission check: exact (resource, action) match against the
    /// effective set. Lookup failures come back as denials with a
    /// system-error reason, never as a grant.
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        resource: Resource,
        action: Action,
    ) -> Decision {
        let started = Instant::now();
        match self.resolve(user_id).await {
            Ok((entry, cache)) => self.evaluate(&entry, resource, action, cache, started),
            Err(err) => Decision::deny(
                format!("SYSTEM_ERROR: {} ({err})", err.code()),
                CacheOutcome::Miss,
                started,
            ),
        }
    }

    fn evaluate(
        &self,
        entry: &EffectivePermissions,
        resource: Resource,
        action: Action,
        cache: CacheOutcome,
        started: Instant,
    ) -> Decision {
        if resource == Resource::SystemSettings {
            if entry.holds_role(&self.national_support_role) {
                return Decision::deny(REASON_SYSTEM_SETTINGS_NATIONAL_SUPPORT, cache, started);
            }
            if entry.max_level() < self.system_admin_level {
                return Decision::deny(REASON_SYSTEM_SETTINGS, cache, started);
            }
        }
        match entry.grant_for(resource, action) {
            Some(grant) => Decision::allow(&grant.granted_by, cache, started),
            None => Decision::deny(
                format!("NO_MATCHING_PERMISSION: {resource}:{action}"),
                cache,
                started,
            ),
        }
    }

    /// Contextual check: the point check plus the team/region boundary of
    /// the target resource.
    pub async fn check_contextual_access(
        &self,
        user_id: Uuid,
        descriptor: ResourceDescriptor,
        action: Action,
    ) -> Decision {
        let started = Instant::now();
        let caller_team = match self.store.user_by_id(user_id).await {
            Ok(Some(user)) => user.team_id,
            Ok(None) => {
                return Decision::deny(
                    "SYSTEM_ERROR: NOT_FOUND (user not found)",
                    CacheOutcome::Miss,
                    started,
                );
            }
            Err(err) => {
                return Decision::deny(
                    format!("SYSTEM_ERROR: INTERNAL_ERROR ({err})"),
                    CacheOutcome::Miss,
                    started,
                );
            }
        };
        let (entry, cache) = match self.resolve(user_id).await {
            Ok(resolved) => resolved,
            Err(err) => {
                return Decision::deny(
                    format!("SYSTEM_ERROR: {} ({err})", err.code()),
                    CacheOutcome::Miss,
                    started,
                );
            }
        };

        let cross_team = descriptor
            .team_id
            .is_some_and(|target| target != caller_team);
        if cross_team {
            // Never across the boundary, whoever asks.
            if descriptor.resource == Resource::SystemSettings {
                return Decision::deny(REASON_SYSTEM_SETTINGS, cache, started);
            }
            let full_access = entry.holds_role(&self.system_admin_role);
            let elevated = self
                .elevated_roles
                .iter()
                .any(|role| entry.holds_role(role));
            let operational_read = descriptor.resource.is_operational()
                && matches!(action, Action::Read | Action::List);
            if !full_access && !(elevated && operational_read) {
                return Decision::deny(REASON_TEAM_BOUNDARY, cache, started);
            }
        }
        self.evaluate(&entry, descriptor.resource, action, cache, started)
    }

    /// # Errors
    ///
    /// Propagates unknown-user and store failures.
    pub async fn has_any_role(&self, user_id: Uuid, names: &[&str]) -> Result<bool, Error> {
        let (entry, _) = self.resolve(user_id).await?;
        Ok(names.iter().any(|name| entry.holds_role(name)))
    }

    pub fn invalidate_permission_cache(&self, user_id: Uuid) {
        self.cache.invalidate(user_id);
    }
}

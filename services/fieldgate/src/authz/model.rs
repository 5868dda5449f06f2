//! Closed permission model: resources, actions, scopes, and the default
//! role hierarchy.
//!
//! Keeping these as enums (instead of free-form strings) means a permission
//! check that forgets a resource fails to compile, not silently at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    Teams,
    Users,
    Devices,
    SupervisorPins,
    Telemetry,
    Policy,
    Auth,
    SystemSettings,
}

impl Resource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teams => "TEAMS",
            Self::Users => "USERS",
            Self::Devices => "DEVICES",
            Self::SupervisorPins => "SUPERVISOR_PINS",
            Self::Telemetry => "TELEMETRY",
            Self::Policy => "POLICY",
            Self::Auth => "AUTH",
            Self::SystemSettings => "SYSTEM_SETTINGS",
        }
    }

    /// Resources elevated cross-team roles may read outside their own team.
    /// `SystemSettings` is deliberately absent.
    #[must_use]
    pub fn is_operational(self) -> bool {
        matches!(self, Self::Devices | Self::Telemetry | Self::Policy)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEAMS" => Ok(Self::Teams),
            "USERS" => Ok(Self::Users),
            "DEVICES" => Ok(Self::Devices),
            "SUPERVISOR_PINS" => Ok(Self::SupervisorPins),
            "TELEMETRY" => Ok(Self::Telemetry),
            "POLICY" => Ok(Self::Policy),
            "AUTH" => Ok(Self::Auth),
            "SYSTEM_SETTINGS" => Ok(Self::SystemSettings),
            other => Err(format!("unknown resource: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    List,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::List => "LIST",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "READ" => Ok(Self::Read),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "LIST" => Ok(Self::List),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionScope {
    Team,
    Organization,
}

impl PermissionScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Team => "TEAM",
            Self::Organization => "ORGANIZATION",
        }
    }
}

impl FromStr for PermissionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEAM" => Ok(Self::Team),
            "ORGANIZATION" => Ok(Self::Organization),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// A deduplicated (resource, action, scope) grant as seen by callers of the
/// authorization engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantedPermission {
    pub resource: Resource,
    pub action: Action,
    pub scope: PermissionScope,
}

/// Default role names. Deployments may rename roles through configuration;
/// these are the steady-state defaults the seed data uses.
pub mod role_names {
    pub const SYSTEM_ADMIN: &str = "SYSTEM_ADMIN";
    pub const NATIONAL_ADMIN: &str = "NATIONAL_ADMIN";
    pub const NATIONAL_SUPPORT: &str = "NATIONAL_SUPPORT";
    pub const REGIONAL_COORDINATOR: &str = "REGIONAL_COORDINATOR";
    pub const TEAM_LEAD: &str = "TEAM_LEAD";
    pub const SUPERVISOR: &str = "SUPERVISOR";
    pub const FIELD_COORDINATOR: &str = "FIELD_COORDINATOR";
    pub const ENUMERATOR: &str = "ENUMERATOR";
    pub const VIEWER: &str = "VIEWER";
}

/// The default nine-role hierarchy, most privileged first.
#[must_use]
pub fn default_hierarchy() -> Vec<(&'static str, i32)> {
    vec![
        (role_names::SYSTEM_ADMIN, 100),
        (role_names::NATIONAL_ADMIN, 90),
        (role_names::NATIONAL_SUPPORT, 80),
        (role_names::REGIONAL_COORDINATOR, 70),
        (role_names::TEAM_LEAD, 60),
        (role_names::SUPERVISOR, 50),
        (role_names::FIELD_COORDINATOR, 40),
        (role_names::ENUMERATOR, 30),
        (role_names::VIEWER, 20),
    ]
}

//! Runtime configuration consumed by the core services.
//!
//! Token TTLs are kept as the configuration strings they arrive as ("15m",
//! "7d"); services parse them once at construction so a malformed value is a
//! startup failure, never a per-request one.

use secrecy::SecretString;
use std::time::Duration;

use crate::authz::model::role_names;
use crate::error::Error;
use crate::policy::types::AllowedWindow;

const DEFAULT_ISSUER: &str = "fieldgate";
const DEFAULT_AUDIENCE: &str = "fieldgate-devices";
const DEFAULT_ACCESS_TTL: &str = "15m";
const DEFAULT_REFRESH_TTL: &str = "7d";
const DEFAULT_SESSION_TTL: &str = "12h";
const DEFAULT_OVERRIDE_MINUTES: u32 = 120;
const DEFAULT_GRACE_MINUTES: u32 = 15;
const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 300;
const DEFAULT_MAX_POLICY_AGE_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PERMISSION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SYSTEM_ADMIN_LEVEL: i32 = 90;

/// Window/threshold pair for one rate-limit channel, plus the stricter
/// lockout escalation that sits behind it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window: Duration,
    pub max_attempts: u32,
    pub lockout_threshold: u32,
    pub lockout: Duration,
}

impl RateLimitRule {
    #[must_use]
    pub const fn new(
        window: Duration,
        max_attempts: u32,
        lockout_threshold: u32,
        lockout: Duration,
    ) -> Self {
        Self {
            window,
            max_attempts,
            lockout_threshold,
            lockout,
        }
    }
}

const DEFAULT_LOGIN_LIMIT: RateLimitRule = RateLimitRule::new(
    Duration::from_secs(5 * 60),
    5,
    10,
    Duration::from_secs(30 * 60),
);
const DEFAULT_USER_PIN_LIMIT: RateLimitRule = RateLimitRule::new(
    Duration::from_secs(5 * 60),
    5,
    10,
    Duration::from_secs(30 * 60),
);
const DEFAULT_SUPERVISOR_PIN_LIMIT: RateLimitRule = RateLimitRule::new(
    Duration::from_secs(5 * 60),
    3,
    6,
    Duration::from_secs(30 * 60),
);

/// Argon2id cost parameters. Configuration, not compile-time constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
            output_len: 32,
        }
    }
}

/// PIN rules echoed to devices through the policy payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinPolicy {
    pub mode: String,
    pub min_length: u32,
    pub retry_limit: u32,
    pub cooldown_seconds: u64,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self {
            mode: "numeric".to_string(),
            min_length: 6,
            retry_limit: 5,
            cooldown_seconds: 300,
        }
    }
}

/// GPS sampling cadence pushed to devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpsPolicy {
    pub active_fix_interval_minutes: u32,
    pub min_displacement_m: u32,
    pub accuracy_threshold_m: u32,
}

impl Default for GpsPolicy {
    fn default() -> Self {
        Self {
            active_fix_interval_minutes: 5,
            min_displacement_m: 25,
            accuracy_threshold_m: 50,
        }
    }
}

/// Telemetry reporting cadence pushed to devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TelemetryPolicy {
    pub heartbeat_minutes: u32,
    pub batch_max: u32,
}

impl Default for TelemetryPolicy {
    fn default() -> Self {
        Self {
            heartbeat_minutes: 30,
            batch_max: 200,
        }
    }
}

#[derive(Clone)]
pub struct FieldgateConfig {
    issuer: String,
    audience: String,
    access_ttl: String,
    refresh_ttl: String,
    session_ttl: String,
    override_minutes: u32,
    grace_minutes: u32,
    max_clock_skew_secs: u64,
    max_policy_age_secs: u64,
    permission_cache_ttl: Duration,
    system_admin_level: i32,
    system_admin_role: String,
    elevated_cross_team_roles: Vec<String>,
    national_support_role: String,
    kdf: KdfConfig,
    pin: PinPolicy,
    gps: GpsPolicy,
    telemetry: TelemetryPolicy,
    login_limit: RateLimitRule,
    user_pin_limit: RateLimitRule,
    supervisor_pin_limit: RateLimitRule,
    session_windows: Vec<AllowedWindow>,
    signing_key: SecretString,
}

fn default_session_windows() -> Vec<AllowedWindow> {
    vec![AllowedWindow::new(
        &["mon", "tue", "wed", "thu", "fri", "sat"],
        "08:00",
        "18:00",
    )]
}

impl FieldgateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL.to_string(),
            refresh_ttl: DEFAULT_REFRESH_TTL.to_string(),
            session_ttl: DEFAULT_SESSION_TTL.to_string(),
            override_minutes: DEFAULT_OVERRIDE_MINUTES,
            grace_minutes: DEFAULT_GRACE_MINUTES,
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
            max_policy_age_secs: DEFAULT_MAX_POLICY_AGE_SECS,
            permission_cache_ttl: DEFAULT_PERMISSION_CACHE_TTL,
            system_admin_level: DEFAULT_SYSTEM_ADMIN_LEVEL,
            system_admin_role: role_names::SYSTEM_ADMIN.to_string(),
            elevated_cross_team_roles: vec![
                role_names::NATIONAL_ADMIN.to_string(),
                role_names::NATIONAL_SUPPORT.to_string(),
                role_names::REGIONAL_COORDINATOR.to_string(),
            ],
            national_support_role: role_names::NATIONAL_SUPPORT.to_string(),
            kdf: KdfConfig::default(),
            pin: PinPolicy::default(),
            gps: GpsPolicy::default(),
            telemetry: TelemetryPolicy::default(),
            login_limit: DEFAULT_LOGIN_LIMIT,
            user_pin_limit: DEFAULT_USER_PIN_LIMIT,
            supervisor_pin_limit: DEFAULT_SUPERVISOR_PIN_LIMIT,
            session_windows: default_session_windows(),
            signing_key: SecretString::default(),
        }
    }

    #[must_use]
    pub fn with_token_ttls(mut self, access: impl Into<String>, refresh: impl Into<String>) -> Self {
        self.access_ttl = access.into();
        self.refresh_ttl = refresh.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.session_ttl = ttl.into();
        self
    }

    #[must_use]
    pub fn with_override_minutes(mut self, minutes: u32) -> Self {
        self.override_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_permission_cache_ttl(mut self, ttl: Duration) -> Self {
        self.permission_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_system_admin_level(mut self, level: i32) -> Self {
        self.system_admin_level = level;
        self
    }

    #[must_use]
    pub fn with_elevated_cross_team_roles(mut self, roles: Vec<String>) -> Self {
        self.elevated_cross_team_roles = roles;
        self
    }

    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfConfig) -> Self {
        self.kdf = kdf;
        self
    }

    #[must_use]
    pub fn with_login_limit(mut self, rule: RateLimitRule) -> Self {
        self.login_limit = rule;
        self
    }

    #[must_use]
    pub fn with_user_pin_limit(mut self, rule: RateLimitRule) -> Self {
        self.user_pin_limit = rule;
        self
    }

    #[must_use]
    pub fn with_supervisor_pin_limit(mut self, rule: RateLimitRule) -> Self {
        self.supervisor_pin_limit = rule;
        self
    }

    #[must_use]
    pub fn with_session_windows(mut self, windows: Vec<AllowedWindow>) -> Self {
        self.session_windows = windows;
        self
    }

    #[must_use]
    pub fn with_signing_key(mut self, material: SecretString) -> Self {
        self.signing_key = material;
        self
    }

    #[must_use]
    pub fn with_clock_tolerances(mut self, max_skew_secs: u64, max_age_secs: u64) -> Self {
        self.max_clock_skew_secs = max_skew_secs;
        self.max_policy_age_secs = max_age_secs;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn access_ttl(&self) -> &str {
        &self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> &str {
        &self.refresh_ttl
    }

    #[must_use]
    pub fn session_ttl(&self) -> &str {
        &self.session_ttl
    }

    #[must_use]
    pub fn override_minutes(&self) -> u32 {
        self.override_minutes
    }

    #[must_use]
    pub fn grace_minutes(&self) -> u32 {
        self.grace_minutes
    }

    #[must_use]
    pub fn max_clock_skew_secs(&self) -> u64 {
        self.max_clock_skew_secs
    }

    #[must_use]
    pub fn max_policy_age_secs(&self) -> u64 {
        self.max_policy_age_secs
    }

    #[must_use]
    pub fn permission_cache_ttl(&self) -> Duration {
        self.permission_cache_ttl
    }

    #[must_use]
    pub fn system_admin_level(&self) -> i32 {
        self.system_admin_level
    }

    #[must_use]
    pub fn system_admin_role(&self) -> &str {
        &self.system_admin_role
    }

    #[must_use]
    pub fn elevated_cross_team_roles(&self) -> &[String] {
        &self.elevated_cross_team_roles
    }

    #[must_use]
    pub fn national_support_role(&self) -> &str {
        &self.national_support_role
    }

    #[must_use]
    pub fn kdf(&self) -> KdfConfig {
        self.kdf
    }

    #[must_use]
    pub fn pin(&self) -> &PinPolicy {
        &self.pin
    }

    #[must_use]
    pub fn gps(&self) -> GpsPolicy {
        self.gps
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetryPolicy {
        self.telemetry
    }

    #[must_use]
    pub fn login_limit(&self) -> RateLimitRule {
        self.login_limit
    }

    #[must_use]
    pub fn user_pin_limit(&self) -> RateLimitRule {
        self.user_pin_limit
    }

    #[must_use]
    pub fn supervisor_pin_limit(&self) -> RateLimitRule {
        self.supervisor_pin_limit
    }

    #[must_use]
    pub fn session_windows(&self) -> &[AllowedWindow] {
        &self.session_windows
    }

    #[must_use]
    pub fn signing_key(&self) -> &SecretString {
        &self.signing_key
    }
}

impl Default for FieldgateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FieldgateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldgateConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("override_minutes", &self.override_minutes)
            .field("signing_key", &"***")
            .finish_non_exhaustive()
    }
}

/// Parse a TTL configuration string ("30s", "15m", "12h", "7d") into a
/// duration.
///
/// # Errors
///
/// Returns [`Error::Validation`] for anything that is not a positive integer
/// followed by one of the four unit suffixes.
pub fn parse_ttl(value: &str) -> Result<Duration, Error> {
    let trimmed = value.trim();
    let invalid = || Error::Validation(format!("invalid ttl: {value:?}"));

    let (number, unit) = trimmed.split_at(trimmed.len().saturating_sub(1));
    let quantity: u64 = number.parse().map_err(|_| invalid())?;
    if quantity == 0 {
        return Err(invalid());
    }
    let seconds = match unit {
        "s" => quantity,
        "m" => quantity * 60,
        "h" => quantity * 60 * 60,
        "d" => quantity * 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ttl_accepts_unit_suffixes() -> Result<(), Error> {
        assert_eq!(parse_ttl("30s")?, Duration::from_secs(30));
        assert_eq!(parse_ttl("15m")?, Duration::from_secs(15 * 60));
        assert_eq!(parse_ttl("12h")?, Duration::from_secs(12 * 60 * 60));
        assert_eq!(parse_ttl("7d")?, Duration::from_secs(7 * 24 * 60 * 60));
        Ok(())
    }

    #[test]
    fn parse_ttl_rejects_garbage() {
        for bad in ["", "15", "m", "-5m", "1.5h", "15 m", "15x"] {
            assert!(parse_ttl(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn defaults_and_overrides() {
        let config = FieldgateConfig::new();
        assert_eq!(config.access_ttl(), "15m");
        assert_eq!(config.refresh_ttl(), "7d");
        assert_eq!(config.session_ttl(), "12h");
        assert_eq!(config.override_minutes(), 120);
        assert_eq!(config.system_admin_level(), 90);
        assert_eq!(config.national_support_role(), "NATIONAL_SUPPORT");

        let config = config
            .with_token_ttls("5m", "1d")
            .with_override_minutes(60)
            .with_permission_cache_ttl(Duration::from_secs(30));
        assert_eq!(config.access_ttl(), "5m");
        assert_eq!(config.refresh_ttl(), "1d");
        assert_eq!(config.override_minutes(), 60);
        assert_eq!(config.permission_cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn debug_redacts_signing_key() {
        let config =
            FieldgateConfig::new().with_signing_key(SecretString::from("super-secret".to_string()));
        let rendered = format!("{config:?}");
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("super-secret"));
    }
}

//! Wire shapes of the device policy payload.
//!
//! These are fixed: fielded devices parse them offline, so field names and
//! nesting cannot drift without a coordinated rollout.

use serde::{Deserialize, Serialize};

/// One allowed usage window, team-timezone-relative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedWindow {
    /// Short lowercase day names ("mon" .. "sun").
    pub days: Vec<String>,
    /// "HH:MM", inclusive start.
    pub start: String,
    /// "HH:MM", exclusive end.
    pub end: String,
}

impl AllowedWindow {
    #[must_use]
    pub fn new(days: &[&str], start: &str, end: &str) -> Self {
        Self {
            days: days.iter().map(ToString::to_string).collect(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

/// Server time anchor so the device can detect clock drift and stale policy
/// without trusting its own clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAnchor {
    pub server_now_utc: String,
    pub max_clock_skew_sec: u64,
    pub max_policy_age_sec: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub allowed_windows: Vec<AllowedWindow>,
    pub grace_minutes: u32,
    pub supervisor_override_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinPolicyEcho {
    pub mode: String,
    pub min_length: u32,
    pub retry_limit: u32,
    pub cooldown_seconds: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsPolicyEcho {
    pub active_fix_interval_minutes: u32,
    pub min_displacement_m: u32,
    pub accuracy_threshold_m: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPolicyEcho {
    pub heartbeat_minutes: u32,
    pub batch_max: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMeta {
    pub issued_at: String,
    pub expires_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPayload {
    pub version: i64,
    pub device_id: String,
    pub team_id: String,
    pub tz: String,
    pub time_anchor: TimeAnchor,
    pub session: SessionPolicy,
    pub pin: PinPolicyEcho,
    pub gps: GpsPolicyEcho,
    pub telemetry: TelemetryPolicyEcho,
    pub meta: PolicyMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_the_fixed_field_names() {
        let window = AllowedWindow::new(&["mon", "tue"], "08:00", "18:00");
        let value = serde_json::to_value(&window).expect("serializes");
        assert_eq!(value["days"][0], "mon");
        assert_eq!(value["start"], "08:00");
        assert_eq!(value["end"], "18:00");
    }
}

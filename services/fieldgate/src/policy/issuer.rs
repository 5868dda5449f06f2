//! Policy assembly and signing.
//!
//! Every fetch computes the payload fresh (there is no cross-issuance
//! caching) and persists an immutable audit row. Verification checks the
//! Ed25519 signature before the payload is ever parsed.

use chrono::{Duration as TimeDelta, SecondsFormat, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{FieldgateConfig, GpsPolicy, PinPolicy, TelemetryPolicy};
use crate::error::Error;
use crate::policy::types::{
    AllowedWindow, GpsPolicyEcho, PinPolicyEcho, PolicyMeta, PolicyPayload, SessionPolicy,
    TelemetryPolicyEcho, TimeAnchor,
};
use crate::signer::Signer;
use crate::store::{DirectoryStore, PolicyIssue, PolicyStore, Store};

#[derive(Debug)]
pub struct IssuedPolicy {
    pub signed_document: String,
    pub payload: PolicyPayload,
}

pub struct PolicyIssuer {
    store: Arc<dyn Store>,
    signer: Arc<Signer>,
    max_clock_skew_secs: u64,
    max_policy_age_secs: u64,
    grace_minutes: u32,
    override_minutes: u32,
    session_windows: Vec<AllowedWindow>,
    pin: PinPolicy,
    gps: GpsPolicy,
    telemetry: TelemetryPolicy,
}

impl PolicyIssuer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, signer: Arc<Signer>, config: &FieldgateConfig) -> Self {
        Self {
            store,
            signer,
            max_clock_skew_secs: config.max_clock_skew_secs(),
            max_policy_age_secs: config.max_policy_age_secs(),
            grace_minutes: config.grace_minutes(),
            override_minutes: config.override_minutes(),
            session_windows: config.session_windows().to_vec(),
            pin: config.pin().clone(),
            gps: config.gps(),
            telemetry: config.telemetry(),
        }
    }

    /// Assemble, sign, and persist a policy for `device_code`.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` for unknown or inactive devices; `INTERNAL_ERROR`
    /// for store or signing failures.
    pub async fn issue(
        &self,
        device_code: &str,
        source_ip: Option<&str>,
    ) -> Result<IssuedPolicy, Error> {
        let device = self
            .store
            .device_by_code(device_code)
            .await?
            .filter(|device| device.active)
            .ok_or(Error::DeviceNotFound)?;
        let team = self
            .store
            .team_by_id(device.team_id)
            .await?
            .filter(|team| team.active)
            .ok_or(Error::DeviceNotFound)?;

        let version = self.store.next_policy_version(device.id).await?;
        let now = Utc::now();
        let expires_at = now + max_age_delta(self.max_policy_age_secs);

        let payload = PolicyPayload {
            version,
            device_id: device.code.clone(),
            team_id: team.id.to_string(),
            tz: team.tz.clone(),
            time_anchor: TimeAnchor {
                server_now_utc: now.to_rfc3339_opts(SecondsFormat::Secs, true),
                max_clock_skew_sec: self.max_clock_skew_secs,
                max_policy_age_sec: self.max_policy_age_secs,
            },
            session: SessionPolicy {
                allowed_windows: self.session_windows.clone(),
                grace_minutes: self.grace_minutes,
                supervisor_override_minutes: self.override_minutes,
            },
            pin: PinPolicyEcho {
                mode: self.pin.mode.clone(),
                min_length: self.pin.min_length,
                retry_limit: self.pin.retry_limit,
                cooldown_seconds: self.pin.cooldown_seconds,
            },
            gps: GpsPolicyEcho {
                active_fix_interval_minutes: self.gps.active_fix_interval_minutes,
                min_displacement_m: self.gps.min_displacement_m,
                accuracy_threshold_m: self.gps.accuracy_threshold_m,
            },
            telemetry: TelemetryPolicyEcho {
                heartbeat_minutes: self.telemetry.heartbeat_minutes,
                batch_max: self.telemetry.batch_max,
            },
            meta: PolicyMeta {
                issued_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
                expires_at: expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        };

        let signed_document = self.signer.sign(&payload)?;
        self.store
            .insert_policy_issue(PolicyIssue {
                id: Uuid::new_v4(),
                device_id: device.id,
                team_id: team.id,
                version,
                issued_at: now,
                expires_at,
                signing_key_id: self.signer.key_id().to_string(),
                payload: serde_json::to_value(&payload).map_err(Error::internal)?,
                source_ip: source_ip.map(str::to_string),
            })
            .await?;

        Ok(IssuedPolicy {
            signed_document,
            payload,
        })
    }

    /// Check a document's signature and return its payload.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for malformed documents and signature mismatches;
    /// the payload is never parsed before the signature holds.
    pub fn verify(&self, document: &str) -> Result<PolicyPayload, Error> {
        self.signer
            .verify(document)
            .map_err(|err| Error::Validation(format!("invalid policy document: {err}")))
    }

    /// Public key devices pin for offline verification.
    #[must_use]
    pub fn public_key(&self) -> String {
        self.signer.public_key()
    }
}

fn max_age_delta(seconds: u64) -> TimeDelta {
    i64::try_from(seconds)
        .ok()
        .map_or_else(|| TimeDelta::days(1), TimeDelta::seconds)
}

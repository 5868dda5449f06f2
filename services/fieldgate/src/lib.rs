//! # Fieldgate (Device Access-Control & Policy Authority)
//!
//! `fieldgate` is the access-control core behind a fielded-device management
//! platform. Mobile survey devices authenticate against it, receive signed
//! usage policies, and report through sessions it governs; the web
//! administration tier calls the same contracts to manage teams, users,
//! devices and role assignments.
//!
//! ## Authorization
//!
//! Permissions resolve through a nine-role hierarchy with team/region
//! scoping. A user's effective set is the union over their active,
//! non-expired role assignments, memoized in a TTL-bounded cache that is
//! never treated as authoritative past its expiry. `SYSTEM_SETTINGS` is
//! gated behind a hierarchy threshold and denied outright to the national
//! support role.
//!
//! ## Sessions & Overrides
//!
//! Logins are PIN-verified (Argon2id) behind per-channel rate limits with
//! lockout escalation. Sessions expire by timestamp — the stored status
//! column is an audit field only. Supervisors can attach a time-boxed
//! override window to a device with their team PIN; override windows only
//! ever extend.
//!
//! ## Signed Policy Documents
//!
//! Devices fetch a time-anchored policy (usage windows, GPS and telemetry
//! cadence, PIN rules) as a three-segment EdDSA document they verify
//! offline against the process public key. The signer is constructed once
//! at startup and misconfiguration refuses to serve.

pub mod api;
pub mod auth;
pub mod authz;
pub mod cli;
pub mod config;
pub mod error;
pub mod policy;
pub mod signer;
pub mod store;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

//! Signed, time-anchored device policy documents.

pub mod issuer;
pub mod types;

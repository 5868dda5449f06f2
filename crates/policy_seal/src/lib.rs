//! Compact EdDSA-signed documents: `base64url(header).base64url(payload).base64url(signature)`.
//!
//! The same codec backs signed device-policy documents and bearer tokens.
//! Claim validation (expiry, audience, revocation) is the caller's job; this
//! crate only guarantees that a payload handed back by [`verify`] was signed
//! by the matching Ed25519 key.

mod error;
mod keys;
mod seal;

pub use error::Error;
pub use keys::{decode_signing_key, encode_verifying_key, key_id};
pub use seal::{SealHeader, decode_header, sign, verify};

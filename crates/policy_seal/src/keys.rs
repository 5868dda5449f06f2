use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::Error;

const SEED_LEN: usize = 32;

/// Decode an Ed25519 signing key from a 32-byte seed, given as either
/// 64 hex characters or unpadded base64url.
///
/// # Errors
///
/// Returns [`Error::KeyMaterial`] if the input decodes to anything other
/// than 32 bytes under both encodings.
pub fn decode_signing_key(material: &str) -> Result<SigningKey, Error> {
    let trimmed = material.trim();

    if trimmed.len() == SEED_LEN * 2
        && let Ok(bytes) = hex::decode(trimmed)
        && let Ok(seed) = <[u8; SEED_LEN]>::try_from(bytes.as_slice())
    {
        return Ok(SigningKey::from_bytes(&seed));
    }

    let bytes = Base64UrlUnpadded::decode_vec(trimmed).map_err(|_| Error::KeyMaterial)?;
    let seed = <[u8; SEED_LEN]>::try_from(bytes.as_slice()).map_err(|_| Error::KeyMaterial)?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Encode a verifying key as unpadded base64url for client distribution.
#[must_use]
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    Base64UrlUnpadded::encode_string(key.as_bytes())
}

/// Derive a stable key id from a verifying key.
///
/// The id is the truncated base64url SHA-256 of the public key bytes, so it
/// can be recomputed by anyone holding the public key.
#[must_use]
pub fn key_id(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let encoded = Base64UrlUnpadded::encode_string(&digest);
    encoded[..16].to_string()
}

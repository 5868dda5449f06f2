//! Process-wide Ed25519 signer.
//!
//! One key per process, loaded from configured secret material at startup
//! and injected into the services that need it. Construction failing means
//! the process refuses to start; nothing in the core signs lazily.

use ed25519_dalek::{SigningKey, VerifyingKey};
use secrecy::ExposeSecret;
use serde::{Serialize, de::DeserializeOwned};

use crate::config::FieldgateConfig;
use crate::error::Error;

pub struct Signer {
    signing_key: SigningKey,
    key_id: String,
}

impl Signer {
    /// Build the signer from configured key material (32-byte Ed25519 seed,
    /// hex or base64url).
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` when the material is missing or malformed —
    /// callers treat that as fatal at startup.
    pub fn from_config(config: &FieldgateConfig) -> Result<Self, Error> {
        let material = config.signing_key().expose_secret();
        if material.is_empty() {
            return Err(Error::Internal(
                "signing key material is not configured".to_string(),
            ));
        }
        let signing_key = policy_seal::decode_signing_key(material)
            .map_err(|err| Error::Internal(format!("unusable signing key: {err}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    #[must_use]
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let key_id = policy_seal::key_id(&signing_key.verifying_key());
        Self {
            signing_key,
            key_id,
        }
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key in the encoding handed to devices for offline checks.
    #[must_use]
    pub fn public_key(&self) -> String {
        policy_seal::encode_verifying_key(&self.signing_key.verifying_key())
    }

    /// Sign `payload` into a three-segment document carrying this signer's
    /// key id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if payload encoding fails.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String, Error> {
        policy_seal::sign(&self.signing_key, self.key_id.clone(), payload)
            .map_err(|err| Error::Internal(format!("signing failed: {err}")))
    }

    /// Verify a document against this signer's public key and decode its
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`policy_seal::Error`] untouched so callers can map format
    /// and signature failures to their own taxonomy.
    pub fn verify<T: DeserializeOwned>(&self, document: &str) -> Result<T, policy_seal::Error> {
        let (_, payload) = policy_seal::verify(document, &self.signing_key.verifying_key())?;
        Ok(payload)
    }
}

#[cfg(test)]
pub(crate) fn test_signer() -> Signer {
    Signer::from_signing_key(SigningKey::from_bytes(&[17u8; 32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn refuses_to_start_without_key_material() {
        let config = FieldgateConfig::new();
        assert!(Signer::from_config(&config).is_err());
    }

    #[test]
    fn refuses_malformed_key_material() {
        let config = FieldgateConfig::new()
            .with_signing_key(SecretString::from("not-a-key".to_string()));
        assert!(Signer::from_config(&config).is_err());
    }

    #[test]
    fn builds_from_hex_seed_and_round_trips() -> Result<(), Error> {
        let seed_hex = "11".repeat(32);
        let config =
            FieldgateConfig::new().with_signing_key(SecretString::from(seed_hex));
        let signer = Signer::from_config(&config)?;

        let document = signer.sign(&serde_json::json!({"ok": true}))?;
        let payload: serde_json::Value = signer.verify(&document).expect("own signature verifies");
        assert_eq!(payload["ok"], true);
        assert_eq!(signer.key_id().len(), 16);
        Ok(())
    }
}

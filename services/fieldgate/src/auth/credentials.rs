//! Argon2id hashing for user PINs and supervisor PINs.
//!
//! Each credential gets its own random salt; comparison goes through
//! `argon2`'s verifier, which re-derives the key and compares in constant
//! time. Cost parameters come from configuration.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;

use crate::config::KdfConfig;
use crate::error::Error;

/// Salt + hash pair as persisted. The hash is a PHC string, so it also
/// records the cost parameters it was derived under; the salt is kept
/// alongside for the audit schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialHash {
    pub hash: String,
    pub salt: String,
}

#[derive(Clone, Debug)]
pub struct CredentialVerifier {
    kdf: KdfConfig,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(kdf: KdfConfig) -> Self {
        Self { kdf }
    }

    fn hasher(&self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(
            self.kdf.memory_kib,
            self.kdf.iterations,
            self.kdf.parallelism,
            Some(self.kdf.output_len),
        )
        .map_err(|err| Error::Internal(format!("invalid kdf parameters: {err}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Derive a salt + hash pair for a new credential.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the configured cost parameters are
    /// rejected or hashing fails.
    pub fn hash(&self, secret: &str) -> Result<CredentialHash, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .hasher()?
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|err| Error::Internal(format!("failed to hash credential: {err}")))?
            .to_string();
        Ok(CredentialHash {
            hash,
            salt: salt.as_str().to_string(),
        })
    }

    /// Check a submitted secret against a stored pair. Unparseable stored
    /// hashes verify as false rather than erroring: a corrupt row must never
    /// open a login path.
    #[must_use]
    pub fn verify(&self, secret: &str, stored: &CredentialHash) -> bool {
        let Ok(parsed) = PasswordHash::new(&stored.hash) else {
            return false;
        };
        self.hasher()
            .map(|hasher| hasher.verify_password(secret.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) fn test_kdf() -> KdfConfig {
    // Minimum argon2 costs keep the test suite fast.
    KdfConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
        output_len: 32,
    }
}

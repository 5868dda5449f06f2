use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Error;

const ALG: &str = "EdDSA";
const TYP: &str = "JWT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl SealHeader {
    fn eddsa(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG.to_string(),
            typ: TYP.to_string(),
            kid: kid.into(),
        }
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split_document(document: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = document.split('.');
    let header = parts.next().ok_or(Error::DocumentFormat)?;
    let payload = parts.next().ok_or(Error::DocumentFormat)?;
    let signature = parts.next().ok_or(Error::DocumentFormat)?;
    if parts.next().is_some() {
        return Err(Error::DocumentFormat);
    }
    Ok((header, payload, signature))
}

/// Sign `payload` into a three-segment EdDSA document.
///
/// # Errors
///
/// Returns an error if the header or payload cannot be JSON-encoded.
pub fn sign<T: Serialize>(
    signing_key: &SigningKey,
    kid: impl Into<String>,
    payload: &T,
) -> Result<String, Error> {
    let header_b64 = b64e_json(&SealHeader::eddsa(kid))?;
    let payload_b64 = b64e_json(payload)?;
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Decode a document's header without verifying the signature.
///
/// Only useful for key selection; nothing read here may be trusted until
/// [`verify`] succeeds.
///
/// # Errors
///
/// Returns an error if the document is malformed or the header segment is
/// not valid base64url JSON.
pub fn decode_header(document: &str) -> Result<SealHeader, Error> {
    let (header_b64, _, _) = split_document(document)?;
    b64d_json(header_b64)
}

/// Verify a three-segment EdDSA document and return its decoded payload.
///
/// The signature is checked over the raw encoded segments before the payload
/// is parsed, so an unverified payload never reaches a deserializer.
///
/// # Errors
///
/// Returns an error if:
/// - the document does not have exactly three base64url segments,
/// - the header declares an algorithm or type other than `EdDSA`/`JWT`,
/// - the Ed25519 signature does not match,
/// - the payload is not valid JSON for `T`.
pub fn verify<T: DeserializeOwned>(
    document: &str,
    verifying_key: &VerifyingKey,
) -> Result<(SealHeader, T), Error> {
    let (header_b64, payload_b64, signature_b64) = split_document(document)?;

    let header: SealHeader = b64d_json(header_b64)?;
    if header.alg != ALG {
        return Err(Error::UnsupportedAlg(header.alg));
    }
    if header.typ != TYP {
        return Err(Error::UnsupportedTyp(header.typ));
    }

    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature_bytes =
        Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| Error::Base64)?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let payload = b64d_json(payload_b64)?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::key_id;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Payload {
        device_id: String,
        version: u32,
    }

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[42u8; 32])
    }

    fn test_payload() -> Payload {
        Payload {
            device_id: "dev-1".to_string(),
            version: 3,
        }
    }

    #[test]
    fn sign_verify_round_trip() -> Result<(), Error> {
        let key = test_key();
        let kid = key_id(&key.verifying_key());
        let document = sign(&key, kid.clone(), &test_payload())?;

        let (header, payload): (SealHeader, Payload) =
            verify(&document, &key.verifying_key())?;
        assert_eq!(header.alg, "EdDSA");
        assert_eq!(header.typ, "JWT");
        assert_eq!(header.kid, kid);
        assert_eq!(payload, test_payload());
        Ok(())
    }

    #[test]
    fn decode_header_without_verification() -> Result<(), Error> {
        let key = test_key();
        let document = sign(&key, "kid-1", &test_payload())?;
        let header = decode_header(&document)?;
        assert_eq!(header.kid, "kid-1");
        Ok(())
    }

    #[test]
    fn rejects_wrong_key() -> Result<(), Error> {
        let document = sign(&test_key(), "kid-1", &test_payload())?;
        let other = SigningKey::from_bytes(&[43u8; 32]);
        let result: Result<(SealHeader, Payload), Error> =
            verify(&document, &other.verifying_key());
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_tampered_payload_segment() -> Result<(), Error> {
        let key = test_key();
        let document = sign(&key, "kid-1", &test_payload())?;

        let mut parts: Vec<&str> = document.split('.').collect();
        let forged = b64e_json(&Payload {
            device_id: "dev-2".to_string(),
            version: 3,
        })?;
        parts[1] = &forged;
        let tampered = parts.join(".");

        let result: Result<(SealHeader, Payload), Error> =
            verify(&tampered, &key.verifying_key());
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_every_single_byte_flip_in_signature() -> Result<(), Error> {
        let key = test_key();
        let document = sign(&key, "kid-1", &test_payload())?;
        let (header_b64, payload_b64, signature_b64) = split_document(&document)?;

        let mut signature = Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| Error::Base64)?;
        for i in 0..signature.len() {
            signature[i] ^= 0x01;
            let tampered = format!(
                "{header_b64}.{payload_b64}.{}",
                Base64UrlUnpadded::encode_string(&signature)
            );
            let result: Result<(SealHeader, Payload), Error> =
                verify(&tampered, &key.verifying_key());
            assert!(result.is_err(), "flipped signature byte {i} verified");
            signature[i] ^= 0x01;
        }
        Ok(())
    }

    #[test]
    fn rejects_wrong_segment_count() {
        let result = decode_header("only.two");
        assert!(matches!(result, Err(Error::DocumentFormat)));
        let result = decode_header("a.b.c.d");
        assert!(matches!(result, Err(Error::DocumentFormat)));
    }

    #[test]
    fn rejects_foreign_algorithm() -> Result<(), Error> {
        let key = test_key();
        let document = sign(&key, "kid-1", &test_payload())?;
        let (_, payload_b64, signature_b64) = split_document(&document)?;

        let forged_header = b64e_json(&SealHeader {
            alg: "RS256".to_string(),
            typ: TYP.to_string(),
            kid: "kid-1".to_string(),
        })?;
        let tampered = format!("{forged_header}.{payload_b64}.{signature_b64}");
        let result: Result<(SealHeader, Payload), Error> =
            verify(&tampered, &key.verifying_key());
        assert!(matches!(result, Err(Error::UnsupportedAlg(_))));
        Ok(())
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid document format")]
    DocumentFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unsupported type: {0}")]
    UnsupportedTyp(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key material")]
    KeyMaterial,
}

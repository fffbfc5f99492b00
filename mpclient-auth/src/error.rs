//! Identity and signing error types.

use crate::cert::CertError;
use crate::identity::Fingerprint;

/// Errors raised while creating or loading a client identity.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The supplied bytes are not a usable certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(#[from] CertError),

    /// No private key matching the certificate is available locally.
    #[error("no private key available for certificate {fingerprint}")]
    MissingKey { fingerprint: Fingerprint },

    /// The client token is not in `GUID:{uuid}` form.
    #[error("invalid client token: {0}")]
    InvalidToken(String),

    /// The identity already carries a server-issued token.
    #[error("client token {0} was already issued by the server")]
    TokenAlreadyIssued(String),

    /// The local cryptographic provider failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The key source could not be read.
    #[error("key store error: {0}")]
    KeyStore(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while signing or verifying message bodies.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SigningError {
    /// The body cannot be length-prefixed in the canonical form.
    #[error("message body too large: {0} bytes")]
    BodyTooLarge(usize),

    /// The signature does not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// The signer certificate could not be parsed.
    #[error("signer certificate: {0}")]
    Certificate(#[from] CertError),
}

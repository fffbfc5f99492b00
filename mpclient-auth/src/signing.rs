//! Detached signatures over message bodies.
//!
//! The codec renders a body to bytes exactly once; those bytes are signed here
//! and carried verbatim (base64) in the envelope, so nothing can re-order them
//! between signing and verification.

use crate::cert::parse_certificate;
use crate::error::SigningError;
use crate::identity::{PrivateKey, PublicKey, Signature};

/// Domain separation prefix for message signatures.
const DOMAIN_PREFIX: &[u8] = b"MPCLIENT-MSG-v1:";

/// Canonical form version.
const SIGNING_VERSION: u8 = 0x01;

/// Build the bytes that get signed.
///
/// | Field       | Size | Description                   |
/// |-------------|------|-------------------------------|
/// | prefix      | 16   | `MPCLIENT-MSG-v1:`            |
/// | version     | 1    | 0x01                          |
/// | body_len    | 4    | body length (u32 BE)          |
/// | body        | var  | body bytes as rendered        |
///
/// # Errors
///
/// Returns `SigningError::BodyTooLarge` if the body length does not fit in a u32.
pub fn canonical_bytes(body: &[u8]) -> Result<Vec<u8>, SigningError> {
    let len = u32::try_from(body.len()).map_err(|_| SigningError::BodyTooLarge(body.len()))?;

    let mut msg = Vec::with_capacity(DOMAIN_PREFIX.len() + 5 + body.len());
    msg.extend_from_slice(DOMAIN_PREFIX);
    msg.push(SIGNING_VERSION);
    msg.extend_from_slice(&len.to_be_bytes());
    msg.extend_from_slice(body);
    Ok(msg)
}

/// Sign `body` with `key`.
///
/// # Errors
///
/// Returns `SigningError::BodyTooLarge` from [`canonical_bytes`].
pub fn sign_body(key: &PrivateKey, body: &[u8]) -> Result<Signature, SigningError> {
    Ok(key.sign(&canonical_bytes(body)?))
}

/// Verify a body signature against a known public key.
///
/// # Errors
///
/// Returns `SigningError::InvalidSignature` on mismatch.
pub fn verify_body_with_key(
    public_key: &PublicKey,
    body: &[u8],
    signature: &Signature,
) -> Result<(), SigningError> {
    if public_key.verify(&canonical_bytes(body)?, signature) {
        Ok(())
    } else {
        Err(SigningError::InvalidSignature)
    }
}

/// Verify a body signature against the public key in a DER certificate.
///
/// # Errors
///
/// Returns `SigningError::Certificate` if the certificate does not parse and
/// `SigningError::InvalidSignature` on mismatch.
pub fn verify_body(cert_der: &[u8], body: &[u8], signature: &Signature) -> Result<(), SigningError> {
    let parsed = parse_certificate(cert_der)?;
    verify_body_with_key(&parsed.public_key, body, signature)
}

//! Self-signed certificate generation and parsing.
//!
//! Certificates are generated with rcgen and parsed with x509_parser.
//! Input is limited to 16KB before any ASN.1 parsing happens.

use rcgen::{CertificateParams, DnType, KeyPair};
use thiserror::Error;
use x509_parser::prelude::*;

use sha2::{Digest, Sha256};

use crate::identity::{Fingerprint, PrivateKey, PublicKey};

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// Errors that can occur while building or parsing certificates.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),

    #[error("certificate has trailing data ({0} bytes)")]
    TrailingData(usize),

    #[error("certificate key is not Ed25519")]
    UnsupportedKey,

    #[error("failed to generate certificate: {0}")]
    Generate(String),
}

/// The parts of a certificate the identity provider relies on.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub public_key: PublicKey,
    pub subject: String,
}

/// Build a self-signed certificate for `key` with `common_name` as subject.
///
/// # Errors
///
/// Returns `CertError::Generate` if rcgen rejects the key or the parameters.
pub fn self_signed(key: &PrivateKey, common_name: &str) -> Result<Vec<u8>, CertError> {
    let key_der = key
        .to_pkcs8_der()
        .map_err(|e| CertError::Generate(e.to_string()))?;
    let key_pair =
        KeyPair::try_from(key_der.as_slice()).map_err(|e| CertError::Generate(e.to_string()))?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generate(e.to_string()))?;
    Ok(cert.der().to_vec())
}

/// Parse a DER-encoded certificate and extract its Ed25519 public key.
///
/// # Errors
///
/// Returns `CertError::TooLarge` above 16KB, `CertError::ParseError` for
/// malformed DER, `CertError::TrailingData` if bytes follow the certificate,
/// and `CertError::UnsupportedKey` for non-Ed25519 keys.
pub fn parse_certificate(cert_der: &[u8]) -> Result<ParsedCertificate, CertError> {
    if cert_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(cert_der.len()));
    }

    let (rest, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertError::ParseError(format!("{:?}", e)))?;
    if !rest.is_empty() {
        return Err(CertError::TrailingData(rest.len()));
    }

    let public_key = PublicKey::from_bytes(&cert.public_key().subject_public_key.data)
        .map_err(|_| CertError::UnsupportedKey)?;

    Ok(ParsedCertificate {
        public_key,
        subject: cert.subject().to_string(),
    })
}

/// Fingerprint of any certificate's raw public key, whatever the algorithm.
///
/// For Ed25519 certificates this equals [`PublicKey::fingerprint`]. Used to
/// pin TLS server certificates, which need not be Ed25519.
///
/// # Errors
///
/// Same size and parse checks as [`parse_certificate`].
pub fn key_fingerprint(cert_der: &[u8]) -> Result<Fingerprint, CertError> {
    if cert_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(cert_der.len()));
    }
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertError::ParseError(format!("{:?}", e)))?;
    let hash: [u8; 32] = Sha256::digest(&cert.public_key().subject_public_key.data).into();
    Ok(Fingerprint::from_hash_bytes(hash))
}

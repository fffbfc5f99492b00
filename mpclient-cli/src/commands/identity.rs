//! `identity create` and `identity show`.

use mpclient_auth::cert::parse_certificate;
use mpclient_auth::{CertError, ClientIdentity, IdentityError};
use serde::Serialize;

use crate::error::ClientError;
use crate::store::KeyStore;

/// What `identity create` and `identity show` report.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub fingerprint: String,
    pub subject: String,
    pub key_stored: bool,
    /// Self-chosen token of a fresh identity. Absent for `show`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

/// Generate an identity and persist its key and certificate.
///
/// # Errors
///
/// Key generation or store failure.
pub fn create_identity(store: &KeyStore) -> Result<ClientIdentity, ClientError> {
    let identity = ClientIdentity::create()?;
    store.save(&identity)?;
    tracing::info!(fingerprint = %identity.fingerprint(), "created identity");
    Ok(identity)
}

#[must_use]
pub fn summarize(identity: &ClientIdentity) -> IdentitySummary {
    IdentitySummary {
        fingerprint: identity.fingerprint().to_hex(),
        subject: format!("CN={}", identity.fingerprint().to_hex()),
        key_stored: true,
        client_id: Some(identity.token().to_string()),
        certificate: Some(identity.certificate_hex()),
    }
}

/// Describe a hex certificate and whether its key is held in `store`.
///
/// # Errors
///
/// `InvalidCertificate` for bad hex or DER, or a store read failure.
pub fn show_identity(store: &KeyStore, certificate_hex: &str) -> Result<IdentitySummary, ClientError> {
    let cert_der = hex::decode(certificate_hex.trim()).map_err(|e| {
        IdentityError::InvalidCertificate(CertError::ParseError(format!(
            "certificate is not hex: {e}"
        )))
    })?;
    let parsed = parse_certificate(&cert_der).map_err(IdentityError::from)?;
    let fingerprint = parsed.public_key.fingerprint();
    let key_stored = store.load_key(&fingerprint)?.is_some();

    Ok(IdentitySummary {
        fingerprint: fingerprint.to_hex(),
        subject: parsed.subject,
        key_stored,
        client_id: None,
        certificate: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn created_identity_shows_as_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let identity = create_identity(&store).unwrap();

        let shown = show_identity(&store, &identity.certificate_hex()).unwrap();
        assert_eq!(shown.fingerprint, identity.fingerprint().to_hex());
        assert!(shown.key_stored);
        assert!(shown.subject.contains(&identity.fingerprint().to_hex()));
    }

    #[test]
    fn foreign_certificate_has_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let stranger = ClientIdentity::create().unwrap();

        let shown = show_identity(&store, &stranger.certificate_hex()).unwrap();
        assert!(!shown.key_stored);
    }

    #[test]
    fn garbage_is_invalid_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        for bad in ["zz", "deadbeef"] {
            let err = show_identity(&store, bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidCertificate);
        }
    }
}

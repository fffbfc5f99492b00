//! TLS configuration for pinned management point connections.
//!
//! By default reqwest verifies the management point against the webpki roots.
//! When a server fingerprint is configured, [`PinnedServerVerifier`] replaces
//! chain validation with a key pin: the handshake succeeds only if the
//! end-entity certificate's public key hashes to the configured fingerprint.

use std::sync::Arc;

use mpclient_auth::{key_fingerprint, Fingerprint};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

/// Certificate verifier that pins the server's public key fingerprint.
///
/// Handshake signatures are still verified against the presented certificate.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    expected: Fingerprint,
    provider: Arc<CryptoProvider>,
}

impl PinnedServerVerifier {
    pub fn new(expected: Fingerprint) -> Arc<Self> {
        Arc::new(Self {
            expected,
            provider: Arc::new(ring::default_provider()),
        })
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let presented = key_fingerprint(end_entity.as_ref()).map_err(|_| {
            rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)
        })?;

        // Fingerprint equality is constant-time.
        if presented == self.expected {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                expected = %self.expected,
                presented = %presented,
                "management point certificate does not match pinned fingerprint"
            );
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a client config that trusts only the pinned server key.
///
/// # Errors
///
/// Fails if the ring provider rejects the default protocol versions.
pub fn pinned_client_config(fingerprint: Fingerprint) -> Result<ClientConfig, rustls::Error> {
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(PinnedServerVerifier::new(fingerprint))
        .with_no_client_auth();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpclient_auth::cert::self_signed;
    use mpclient_auth::PrivateKey;

    fn verify(verifier: &PinnedServerVerifier, cert_der: Vec<u8>) -> Result<(), rustls::Error> {
        verifier
            .verify_server_cert(
                &CertificateDer::from(cert_der),
                &[],
                &ServerName::try_from("mp01.corp.example").unwrap(),
                &[],
                UnixTime::now(),
            )
            .map(|_| ())
    }

    #[test]
    fn accepts_matching_key() {
        let server_key = PrivateKey::generate();
        let cert = self_signed(&server_key, "mp01.corp.example").unwrap();
        let verifier = PinnedServerVerifier::new(server_key.public_key().fingerprint());

        assert!(verify(&verifier, cert).is_ok());
    }

    #[test]
    fn rejects_other_key() {
        let server_key = PrivateKey::generate();
        let cert = self_signed(&server_key, "mp01.corp.example").unwrap();
        let verifier = PinnedServerVerifier::new(PrivateKey::generate().public_key().fingerprint());

        assert!(matches!(
            verify(&verifier, cert),
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure
            ))
        ));
    }

    #[test]
    fn rejects_garbage_certificate() {
        let verifier = PinnedServerVerifier::new(PrivateKey::generate().public_key().fingerprint());
        assert!(matches!(
            verify(&verifier, b"not a certificate".to_vec()),
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::BadEncoding
            ))
        ));
    }

    #[test]
    fn config_builds() {
        let fingerprint = PrivateKey::generate().public_key().fingerprint();
        assert!(pinned_client_config(fingerprint).is_ok());
    }
}

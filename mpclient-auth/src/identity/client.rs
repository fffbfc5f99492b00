//! The client identity presented to a management point.

use crate::cert::{parse_certificate, self_signed};
use crate::error::{IdentityError, SigningError};
use crate::signing::sign_body;

use super::keys::{Fingerprint, PrivateKey, PublicKey, Signature};
use super::token::{ClientToken, TokenOrigin};

/// Lookup of locally held private keys by certificate fingerprint.
///
/// Implemented by the on-disk key store in the CLI; tests use an in-memory map.
pub trait KeySource {
    /// Return the private key whose public key hashes to `fingerprint`, if held.
    ///
    /// # Errors
    ///
    /// Implementations return an error only when the backing store cannot be
    /// read; an absent key is `Ok(None)`.
    fn private_key_for(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<PrivateKey>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Private key, matching self-signed certificate and the client token bound to them.
///
/// The key and certificate are checked to match at construction and cannot be
/// replaced afterwards. The token can move from self-chosen to server-issued
/// once, see [`ClientIdentity::adopt_server_token`].
pub struct ClientIdentity {
    key: PrivateKey,
    public_key: PublicKey,
    cert_der: Vec<u8>,
    fingerprint: Fingerprint,
    token: ClientToken,
    origin: TokenOrigin,
}

impl ClientIdentity {
    /// Generate a fresh key pair, a self-signed certificate and a self-chosen token.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::KeyGeneration` if certificate generation fails.
    pub fn create() -> Result<Self, IdentityError> {
        let key = PrivateKey::generate();
        let public_key = key.public_key();
        let fingerprint = public_key.fingerprint();
        let cert_der = self_signed(&key, &fingerprint.to_hex())
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            key,
            public_key,
            cert_der,
            fingerprint,
            token: ClientToken::generate(),
            origin: TokenOrigin::SelfChosen,
        })
    }

    /// Bind a previously issued certificate to its token using locally held key material.
    ///
    /// The token is never inferred from the certificate; both are required.
    ///
    /// # Errors
    ///
    /// - `IdentityError::InvalidCertificate` if `cert_der` does not parse
    /// - `IdentityError::MissingKey` if `keys` holds no key for the certificate,
    ///   or holds one whose public half differs from the certificate's
    /// - `IdentityError::KeyStore` if `keys` cannot be read
    pub fn load(
        cert_der: &[u8],
        token: ClientToken,
        keys: &dyn KeySource,
    ) -> Result<Self, IdentityError> {
        let parsed = parse_certificate(cert_der)?;
        let fingerprint = parsed.public_key.fingerprint();

        let key = keys
            .private_key_for(&fingerprint)
            .map_err(IdentityError::KeyStore)?
            .ok_or(IdentityError::MissingKey { fingerprint })?;

        if key.public_key() != parsed.public_key {
            return Err(IdentityError::MissingKey { fingerprint });
        }

        Ok(Self {
            key,
            public_key: parsed.public_key,
            cert_der: cert_der.to_vec(),
            fingerprint,
            token,
            origin: TokenOrigin::ServerIssued,
        })
    }

    /// Replace a self-chosen token with the one the server assigned.
    ///
    /// Adopting the token already held is a no-op that marks it server-issued.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::TokenAlreadyIssued` if the current token is
    /// server-issued and differs from `token`.
    pub fn adopt_server_token(&mut self, token: ClientToken) -> Result<(), IdentityError> {
        match self.origin {
            TokenOrigin::ServerIssued if self.token != token => {
                Err(IdentityError::TokenAlreadyIssued(self.token.to_string()))
            }
            _ => {
                self.token = token;
                self.origin = TokenOrigin::ServerIssued;
                Ok(())
            }
        }
    }

    /// Sign a canonical message body with this identity's key.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::BodyTooLarge` if the body cannot be length-prefixed.
    pub fn sign(&self, body: &[u8]) -> Result<Signature, SigningError> {
        sign_body(&self.key, body)
    }

    #[must_use]
    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// Hex DER, the form operators paste back with `--certificate`.
    #[must_use]
    pub fn certificate_hex(&self) -> String {
        hex::encode(&self.cert_der)
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn token(&self) -> &ClientToken {
        &self.token
    }

    #[must_use]
    pub fn token_origin(&self) -> TokenOrigin {
        self.origin
    }

    /// The private key, for persisting a freshly created identity.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKey {
        &self.key
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("fingerprint", &self.fingerprint)
            .field("token", &self.token)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

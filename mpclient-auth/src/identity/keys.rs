//! Ed25519 key material backing a client identity.
//!
//! - Private keys are zeroized on drop and have no `Debug` implementation
//! - PKCS#8 exports are returned in a `Zeroizing` buffer
//! - Fingerprints are the SHA-256 of the raw public key, rendered as lowercase hex
//! - Fingerprint comparison is constant-time

use ed25519_dalek::Signer;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The provided bytes have an invalid length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The provided bytes do not represent a valid key.
    #[error("invalid key format")]
    InvalidFormat,

    /// The fingerprint string is not 64 hex characters.
    #[error("invalid fingerprint format")]
    InvalidFingerprint,

    /// The signature string is not valid hex of the right length.
    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// A private Ed25519 signing key.
///
/// `SigningKey` zeroizes itself on drop.
pub struct PrivateKey(ed25519_dalek::SigningKey);

impl PrivateKey {
    /// Generate a new random private key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Sign raw bytes. Callers sign canonical message bytes, see [`crate::signing`].
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Export as PKCS#8 DER, the format rcgen and the on-disk key store use.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the encoder rejects the key.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        use ed25519_dalek::pkcs8::EncodePrivateKey;
        let document = self
            .0
            .to_pkcs8_der()
            .map_err(|_| KeyError::InvalidFormat)?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// Load a private key from PKCS#8 DER bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the bytes are not an Ed25519 PKCS#8 document.
    pub fn from_pkcs8_der(bytes: &[u8]) -> Result<Self, KeyError> {
        use ed25519_dalek::pkcs8::DecodePrivateKey;
        let key = ed25519_dalek::SigningKey::from_pkcs8_der(bytes)
            .map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }
}

/// A public Ed25519 verification key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// Load a public key from its raw 32-byte encoding.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` for anything but 32 bytes and
    /// `KeyError::InvalidFormat` if the bytes are not a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Verify a signature with `verify_strict`, rejecting small-order keys.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify_strict(message, &signature.0).is_ok()
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(self)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// A detached Ed25519 signature, carried as hex on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 64,
            actual: bytes.len(),
        })?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&bytes)))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// # Errors
    ///
    /// Returns `KeyError::InvalidSignature` for non-hex input or a wrong length.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidSignature)?;
        Self::from_bytes(&bytes).map_err(|_| KeyError::InvalidSignature)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_bytes();
        write!(
            f,
            "Signature({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

/// SHA-256 of a raw public key. Names key files and certificate subjects.
#[derive(Clone, Copy, Eq, Hash)]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(Sha256::digest(public_key.to_bytes()).into())
    }

    /// Parse a 64-character hex fingerprint. Case-insensitive; an optional
    /// `SHA256:` prefix is accepted for pasted values.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFingerprint` for anything else.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        let s = s.strip_prefix("SHA256:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidFingerprint)?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidFingerprint)?;
        Ok(Self(hash))
    }

    #[must_use]
    pub fn from_hash_bytes(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

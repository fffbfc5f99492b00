//! Decryption of single blobs, batches, and locally stored secrets.

use super::blob::{DecryptedSecret, SecretBlob, SecretOrigin};
use super::elevation::{with_elevation, AclRelaxation, Elevation, ElevationTactic, TokenDuplication};
use super::host::{BlobSource, DataProtection, HostSecurity, Privileges};
use super::SecretError;

/// Result for one blob of a batch.
#[derive(Debug)]
pub struct BlobOutcome {
    pub name: String,
    pub origin: SecretOrigin,
    pub result: Result<DecryptedSecret, SecretError>,
}

impl BlobOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Unprotects blobs through a [`DataProtection`] facility.
pub struct SecretDecryptor<'a, P: DataProtection + ?Sized> {
    protection: &'a P,
}

impl<'a, P: DataProtection + ?Sized> SecretDecryptor<'a, P> {
    pub fn new(protection: &'a P) -> Self {
        Self { protection }
    }

    /// Unprotect one blob under the context it was protected with.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::DecryptionFailed` if the facility rejects the blob.
    pub fn decrypt(&self, blob: &SecretBlob) -> Result<DecryptedSecret, SecretError> {
        let plaintext = self
            .protection
            .unprotect(&blob.ciphertext, blob.context)
            .map_err(|cause| SecretError::DecryptionFailed {
                name: blob.name.clone(),
                cause,
            })?;
        Ok(DecryptedSecret::new(blob.name.clone(), blob.origin, plaintext))
    }

    /// Decrypt every blob. A failure is recorded for that blob only.
    pub fn decrypt_batch(&self, blobs: &[SecretBlob]) -> Vec<BlobOutcome> {
        blobs
            .iter()
            .map(|blob| BlobOutcome {
                name: blob.name.clone(),
                origin: blob.origin,
                result: self.decrypt(blob),
            })
            .collect()
    }

    /// Read blobs from a local source and decrypt them in the system context.
    ///
    /// Privileges are checked once, before anything on the host is touched:
    /// a standard user is refused, an administrator elevates with `tactic`
    /// for the duration of the read and decrypt, and a process already
    /// running as system proceeds directly.
    ///
    /// # Errors
    ///
    /// - `SecretError::InsufficientPrivilege` below administrator
    /// - `SecretError::Elevation` / `SecretError::Release` from the tactic
    /// - `SecretError::Source` if the source cannot be read
    ///
    /// Per-blob decryption failures are returned in the outcomes instead.
    pub fn recover_local<H, S>(
        &self,
        host: &H,
        source: &S,
        tactic: ElevationTactic,
    ) -> Result<Vec<BlobOutcome>, SecretError>
    where
        H: HostSecurity + ?Sized,
        S: BlobSource + ?Sized,
    {
        match host.privileges() {
            Privileges::Standard => Err(SecretError::InsufficientPrivilege {
                required: Privileges::Administrator,
                actual: Privileges::Standard,
            }),
            Privileges::System => self.read_and_decrypt(source),
            Privileges::Administrator => match tactic {
                ElevationTactic::AclRelaxation => self.elevated(&AclRelaxation::new(host), source),
                ElevationTactic::TokenDuplication => {
                    self.elevated(&TokenDuplication::new(host), source)
                }
            },
        }
    }

    fn elevated<E, S>(&self, elevation: &E, source: &S) -> Result<Vec<BlobOutcome>, SecretError>
    where
        E: Elevation,
        S: BlobSource + ?Sized,
    {
        tracing::debug!(
            tactic = ?elevation.tactic(),
            source = ?source.kind(),
            "elevating to read protected blobs"
        );
        with_elevation(elevation, || self.read_and_decrypt(source))?
    }

    fn read_and_decrypt<S>(&self, source: &S) -> Result<Vec<BlobOutcome>, SecretError>
    where
        S: BlobSource + ?Sized,
    {
        let blobs = source.read_blobs().map_err(SecretError::Source)?;
        tracing::debug!(source = ?source.kind(), blobs = blobs.len(), "read protected blobs");
        Ok(self.decrypt_batch(&blobs))
    }
}

//! Host facilities the decryptor depends on.
//!
//! Nothing here talks to a real operating system. The CLI or an embedding
//! application supplies implementations; [`super::testing`] has in-memory ones.

use serde::Serialize;
use zeroize::Zeroizing;

use super::blob::{ProtectionContext, SecretBlob};

/// Error type host facilities report. Callers wrap it with context.
pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// Privilege level of the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Privileges {
    Standard,
    Administrator,
    System,
}

/// The host's data-protection facility.
pub trait DataProtection {
    /// Unprotect `ciphertext` under `context`.
    ///
    /// # Errors
    ///
    /// Fails when the facility rejects the blob: wrong context, corruption,
    /// or a blob protected under a different machine key.
    fn unprotect(
        &self,
        ciphertext: &[u8],
        context: ProtectionContext,
    ) -> Result<Zeroizing<Vec<u8>>, HostError>;
}

/// Record of a relaxed ACL, needed to put it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclGrant {
    pub location: String,
    pub original_descriptor: String,
}

/// Handle to an impersonated system token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonationToken {
    pub source_process: u32,
    pub handle: u64,
}

/// Privilege queries and the two ways of reaching the system context.
pub trait HostSecurity {
    fn privileges(&self) -> Privileges;

    /// Grant the current user read access to the protected-storage location.
    ///
    /// # Errors
    ///
    /// Fails if the ACL cannot be changed. Implementations must leave the ACL
    /// untouched when they fail.
    fn relax_secret_acl(&self) -> Result<AclGrant, HostError>;

    /// Put back the ACL recorded in `grant`.
    ///
    /// # Errors
    ///
    /// Fails if the original descriptor cannot be written back.
    fn restore_secret_acl(&self, grant: AclGrant) -> Result<(), HostError>;

    /// Duplicate a system-owned process token and impersonate it on this thread.
    ///
    /// # Errors
    ///
    /// Fails if no suitable process is found or duplication is denied.
    fn impersonate_system(&self) -> Result<ImpersonationToken, HostError>;

    /// Stop impersonating and close the duplicated token.
    ///
    /// # Errors
    ///
    /// Fails if the thread could not revert to its own token.
    fn revert_impersonation(&self, token: ImpersonationToken) -> Result<(), HostError>;
}

/// How blobs are read from the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Configuration objects exposed by the running client.
    Live,
    /// Persistent protected storage, including rotated or removed secrets.
    OnDisk,
}

/// A local store of protected blobs.
pub trait BlobSource {
    fn kind(&self) -> SourceKind;

    /// Read every blob currently held.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    fn read_blobs(&self) -> Result<Vec<SecretBlob>, HostError>;
}

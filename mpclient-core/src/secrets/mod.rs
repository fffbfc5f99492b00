//! Secret recovery.
//!
//! Blobs come either from resolved policy bodies or from a local
//! [`BlobSource`]. Decryption goes through the host [`DataProtection`]
//! facility; reaching the system context for machine-scoped blobs goes
//! through one of two [`Elevation`] tactics, always inside an
//! [`ElevatedScope`].

mod blob;
mod decryptor;
mod elevation;
mod host;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use blob::{
    DecryptedSecret, NetworkAccessCredential, ProtectionContext, SecretBlob, SecretOrigin,
};
pub use decryptor::{BlobOutcome, SecretDecryptor};
pub use elevation::{
    with_elevation, AclRelaxation, ElevatedScope, Elevation, ElevationTactic, TokenDuplication,
};
pub use host::{
    AclGrant, BlobSource, DataProtection, HostError, HostSecurity, ImpersonationToken, Privileges,
    SourceKind,
};

/// Errors from decrypting or recovering secrets.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SecretError {
    #[error("requires {required:?} privileges, running as {actual:?}")]
    InsufficientPrivilege {
        required: Privileges,
        actual: Privileges,
    },

    #[error("failed to decrypt {name}")]
    DecryptionFailed {
        name: String,
        #[source]
        cause: HostError,
    },

    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    #[error("failed to elevate via {tactic:?}")]
    Elevation {
        tactic: ElevationTactic,
        #[source]
        cause: HostError,
    },

    #[error("failed to restore host state after {tactic:?}")]
    Release {
        tactic: ElevationTactic,
        #[source]
        cause: HostError,
    },

    #[error("failed to read protected blobs")]
    Source(#[source] HostError),
}

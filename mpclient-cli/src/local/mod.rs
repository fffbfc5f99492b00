//! `local secrets`: recover policy secrets cached by the client on this host.
//!
//! Two sources hold them. The live configuration objects of the running
//! client ([`LiveStore`]) have the current values; the client's on-disk object
//! repository ([`RepositoryFile`]) also keeps copies of secrets that were
//! since rotated or removed. Both store each value as a `PolicySecret`
//! element wrapping hex ciphertext.

mod disk;
mod live;
mod platform;

pub use disk::{scan_repository, RepositoryFile, DEFAULT_REPOSITORY_PATH};
pub use live::{LiveStore, LocalObjects, SECRET_CLASSES};
pub use platform::{facilities, Facilities};

use std::path::PathBuf;

use mpclient_core::secrets::{BlobSource, DataProtection, ElevationTactic, HostSecurity, Privileges, SourceKind};
use mpclient_core::xml::parse_document;
use mpclient_core::{ProtectionContext, SecretDecryptor, SecretOrigin};
use serde::Serialize;

use crate::error::ClientError;
use crate::recovered::Recovered;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LocalError {
    #[error("local secret recovery is not available on {os}: this build has no host data-protection backend")]
    Unsupported { os: &'static str },

    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed policy secret: {0}")]
    MalformedSecret(String),
}

/// The tactic `--get-system` selects.
#[must_use]
pub fn tactic(get_system: bool) -> ElevationTactic {
    if get_system {
        ElevationTactic::TokenDuplication
    } else {
        ElevationTactic::AclRelaxation
    }
}

/// Decode a `<PolicySecret Version="1"><![CDATA[hex]]></PolicySecret>` value.
///
/// # Errors
///
/// `LocalError::MalformedSecret` if the element is missing, or its content
/// is empty or not hex.
pub fn parse_policy_secret(value: &[u8]) -> Result<Vec<u8>, LocalError> {
    let element = parse_document(value).map_err(|e| LocalError::MalformedSecret(e.to_string()))?;
    if element.name() != "PolicySecret" {
        return Err(LocalError::MalformedSecret(format!(
            "unexpected element <{}>",
            element.name()
        )));
    }
    let text: String = element.text().split_whitespace().collect();
    if text.is_empty() {
        return Err(LocalError::MalformedSecret("empty ciphertext".to_string()));
    }
    hex::decode(&text).map_err(|_| LocalError::MalformedSecret("ciphertext is not hex".to_string()))
}

/// Everything `local secrets` found and decrypted.
#[derive(Debug, Clone, Serialize)]
pub struct LocalSecretsReport {
    pub method: SourceKind,
    pub privileges: Privileges,
    /// The tactic used, when the process had to elevate.
    pub elevation: Option<ElevationTactic>,
    #[serde(flatten)]
    pub recovered: Recovered,
}

/// Read `source` in the system context and decrypt every blob in it.
///
/// # Errors
///
/// Privilege, elevation, release and source failures from
/// [`SecretDecryptor::recover_local`]. Per-secret failures are listed in the
/// report.
pub fn recover_secrets<H, P, S>(
    host: &H,
    protection: &P,
    source: &S,
    tactic: ElevationTactic,
) -> Result<LocalSecretsReport, ClientError>
where
    H: HostSecurity + ?Sized,
    P: DataProtection + ?Sized,
    S: BlobSource + ?Sized,
{
    let privileges = host.privileges();
    let outcomes = SecretDecryptor::new(protection).recover_local(host, source, tactic)?;
    let recovered = Recovered::from_outcomes(outcomes);
    tracing::info!(
        method = ?source.kind(),
        recovered = recovered.secrets.len(),
        failed = recovered.failures.len(),
        "local secrets recovered"
    );
    Ok(LocalSecretsReport {
        method: source.kind(),
        privileges,
        elevation: (privileges == Privileges::Administrator).then_some(tactic),
        recovered,
    })
}

/// A protected secret listed without decrypting it.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedSecret {
    pub name: String,
    pub origin: SecretOrigin,
    pub context: ProtectionContext,
    /// Hex ciphertext.
    pub ciphertext: String,
}

/// List the blobs in `source` as they are stored, for offline decryption.
///
/// # Errors
///
/// `SecretError::Source` if the source cannot be read.
pub fn list_protected<S: BlobSource + ?Sized>(source: &S) -> Result<Vec<ProtectedSecret>, ClientError> {
    let blobs = source
        .read_blobs()
        .map_err(mpclient_core::SecretError::Source)?;
    Ok(blobs
        .into_iter()
        .map(|blob| ProtectedSecret {
            ciphertext: hex::encode(&blob.ciphertext),
            name: blob.name,
            origin: blob.origin,
            context: blob.context,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_secret_decodes() {
        let value = br#"<PolicySecret Version="1"><![CDATA[0601000001000000D08C9DDF]]></PolicySecret>"#;
        assert_eq!(
            parse_policy_secret(value).unwrap(),
            [0x06, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xd0, 0x8c, 0x9d, 0xdf]
        );

        let wrapped = b"<PolicySecret Version=\"1\">\n  0a0b\n  0c0d\n</PolicySecret>";
        assert_eq!(parse_policy_secret(wrapped).unwrap(), [0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn malformed_policy_secrets_are_rejected() {
        for value in [
            &br#"<PolicySecret Version="1"><![CDATA[]]></PolicySecret>"#[..],
            br#"<PolicySecret Version="1"><![CDATA[not hex]]></PolicySecret>"#,
            br#"<Secret>0a0b</Secret>"#,
            b"0a0b",
        ] {
            assert!(matches!(
                parse_policy_secret(value),
                Err(LocalError::MalformedSecret(_))
            ));
        }
    }

    #[test]
    fn get_system_selects_token_duplication() {
        assert_eq!(tactic(true), ElevationTactic::TokenDuplication);
        assert_eq!(tactic(false), ElevationTactic::AclRelaxation);
    }
}

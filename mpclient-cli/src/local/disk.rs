//! The client's on-disk object repository.
//!
//! The repository is a binary page file. Instances of the secret-bearing
//! classes appear in it as the ASCII class name followed by the instance's
//! `PolicySecret` values, in property order; stale pages keep the values of
//! secrets that were rotated or removed. Scanning treats everything from one
//! class name to the next as one record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mpclient_core::secrets::{BlobSource, HostError, SourceKind};
use mpclient_core::{ProtectionContext, SecretBlob, SecretOrigin};

use super::live::SECRET_CLASSES;
use super::{parse_policy_secret, LocalError};

pub const DEFAULT_REPOSITORY_PATH: &str = r"C:\Windows\System32\wbem\Repository\OBJECTS.DATA";

const SECRET_OPEN: &[u8] = b"<PolicySecret";
const SECRET_CLOSE: &[u8] = b"</PolicySecret>";

/// Reads blobs from a repository file.
#[derive(Debug, Clone)]
pub struct RepositoryFile {
    path: PathBuf,
}

impl RepositoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for RepositoryFile {
    fn default() -> Self {
        Self::new(DEFAULT_REPOSITORY_PATH)
    }
}

impl BlobSource for RepositoryFile {
    fn kind(&self) -> SourceKind {
        SourceKind::OnDisk
    }

    fn read_blobs(&self) -> Result<Vec<SecretBlob>, HostError> {
        let bytes = std::fs::read(&self.path).map_err(|source| LocalError::Read {
            path: self.path.clone(),
            source,
        })?;
        let blobs = scan_repository(&bytes);
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), blobs = blobs.len(), "scanned repository");
        Ok(blobs)
    }
}

/// Extract every secret-bearing record from raw repository bytes.
///
/// Identical copies of a secret are reported once. Unparseable values are
/// skipped.
#[must_use]
pub fn scan_repository(bytes: &[u8]) -> Vec<SecretBlob> {
    let mut markers: Vec<(usize, usize)> = SECRET_CLASSES
        .iter()
        .enumerate()
        .flat_map(|(class, (name, _, _))| {
            find_all(bytes, name.as_bytes()).map(move |offset| (offset, class))
        })
        .collect();
    markers.sort_unstable();

    let mut seen = HashSet::new();
    let mut blobs = Vec::new();
    for (i, &(start, class)) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map_or(bytes.len(), |&(next, _)| next);
        let (_, origin, names) = SECRET_CLASSES[class];

        for (index, value) in record_secrets(&bytes[start..end]).enumerate() {
            let ciphertext = match parse_policy_secret(value) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    tracing::warn!(offset = start, error = %e, "skipping unreadable secret");
                    continue;
                }
            };
            let name = names.get(index).or(names.last()).copied().unwrap_or("Secret");
            if seen.insert((name, ciphertext.clone())) {
                blobs.push(SecretBlob {
                    name: name.to_string(),
                    context: ProtectionContext::Machine,
                    origin,
                    ciphertext,
                });
            }
        }
    }
    blobs
}

/// Each complete `<PolicySecret ...>...</PolicySecret>` element in `record`.
fn record_secrets(record: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut from = 0;
    std::iter::from_fn(move || {
        let open = from + find(&record[from..], SECRET_OPEN)?;
        let close = open + find(&record[open..], SECRET_CLOSE)? + SECRET_CLOSE.len();
        from = close;
        Some(&record[open..close])
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let mut from = 0;
    std::iter::from_fn(move || {
        let offset = from + find(&haystack[from..], needle)?;
        from = offset + needle.len();
        Some(offset)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(hex: &str) -> String {
        format!(r#"<PolicySecret Version="1"><![CDATA[{hex}]]></PolicySecret>"#)
    }

    /// Repository bytes with binary padding around each record.
    fn repository(records: &[(&str, &[&str])]) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x17, 0xfe, 0x42];
        for (class, secrets) in records {
            bytes.extend_from_slice(class.as_bytes());
            bytes.extend_from_slice(&[0x00, 0x00, 0x8c, 0x01]);
            for hex in *secrets {
                bytes.extend_from_slice(secret(hex).as_bytes());
                bytes.extend_from_slice(&[0x00, 0xff]);
            }
        }
        bytes
    }

    fn summary(blobs: &[SecretBlob]) -> Vec<(&str, SecretOrigin, String)> {
        blobs
            .iter()
            .map(|b| (b.name.as_str(), b.origin, hex::encode(&b.ciphertext)))
            .collect()
    }

    #[test]
    fn records_are_attributed_to_their_class() {
        let bytes = repository(&[
            ("CCM_NetworkAccessAccount", &["0a01", "0a02"]),
            ("CCM_TaskSequence", &["0b01"]),
            ("CCM_CollectionVariable", &["0c01"]),
        ]);

        assert_eq!(
            summary(&scan_repository(&bytes)),
            [
                ("NetworkAccessUsername", SecretOrigin::NetworkAccessAccount, "0a01".to_string()),
                ("NetworkAccessPassword", SecretOrigin::NetworkAccessAccount, "0a02".to_string()),
                ("TS_Sequence", SecretOrigin::TaskSequence, "0b01".to_string()),
                ("Value", SecretOrigin::CollectionVariable, "0c01".to_string()),
            ]
        );
    }

    #[test]
    fn rotated_copies_are_kept_and_duplicates_dropped() {
        let bytes = repository(&[
            ("CCM_NetworkAccessAccount", &["0a01", "0a02"]),
            ("CCM_NetworkAccessAccount", &["0a01", "0a02"]),
            ("CCM_NetworkAccessAccount", &["0a01", "0a09"]),
        ]);

        let blobs = scan_repository(&bytes);
        assert_eq!(
            summary(&blobs).into_iter().map(|(_, _, hex)| hex).collect::<Vec<_>>(),
            ["0a01", "0a02", "0a09"]
        );
        assert!(blobs.iter().all(|b| b.context == ProtectionContext::Machine));
    }

    #[test]
    fn unreadable_values_and_stray_secrets_are_skipped() {
        let mut bytes = secret("ffff").into_bytes();
        bytes.extend(repository(&[("CCM_TaskSequence", &["zz", "0b02"])]));
        // Truncated at the end of the file.
        bytes.extend_from_slice(b"CCM_CollectionVariable<PolicySecret Version=\"1\"><![CDATA[0c");

        assert_eq!(
            summary(&scan_repository(&bytes)),
            [("TS_Sequence", SecretOrigin::TaskSequence, "0b02".to_string())]
        );
    }

    #[test]
    fn empty_or_foreign_bytes_yield_nothing() {
        assert!(scan_repository(b"").is_empty());
        assert!(scan_repository(&[0u8; 4096]).is_empty());
    }

    #[test]
    fn missing_file_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = RepositoryFile::new(dir.path().join("OBJECTS.DATA"));

        let err = source.read_blobs().unwrap_err();
        let err = err.downcast::<LocalError>().unwrap();
        assert!(matches!(*err, LocalError::Read { .. }));
        assert_eq!(source.kind(), SourceKind::OnDisk);
    }
}

//! `policy secrets`: pull policy and collect every protected secret in it.
//!
//! Secrets are reported still encrypted. Decryption needs the host
//! data-protection facility of the machine they were issued to; with one,
//! [`decrypt_into`] adds the plaintext to the report. Artifacts on disk only
//! ever hold ciphertext.

use std::path::PathBuf;

use mpclient_auth::ClientIdentity;
use mpclient_core::secrets::DataProtection;
use mpclient_core::{BlobOutcome, PolicyAssignment, ProtectionContext, SecretDecryptor, SecretOrigin};
use serde::Serialize;

use super::Session;
use crate::error::ClientError;
use crate::output::ArtifactWriter;
use crate::recovered::Recovered;
use crate::resolver::{PolicyResolver, PolicyTarget, ResolvedPolicy};

pub const SUMMARY_FILE: &str = "secrets.json";

/// One protected secret as found in a policy body.
#[derive(Debug, Clone, Serialize)]
pub struct SecretEntry {
    pub policy_id: String,
    pub name: String,
    pub origin: SecretOrigin,
    pub context: ProtectionContext,
    /// Hex ciphertext.
    pub ciphertext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAssignment {
    pub policy_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyReport {
    pub client_id: String,
    pub assignments: Vec<PolicyAssignment>,
    pub secrets: Vec<SecretEntry>,
    pub failures: Vec<FailedAssignment>,
    pub artifacts: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrypted: Option<Recovered>,
}

impl PolicyReport {
    fn from_resolved(identity: &ClientIdentity, resolved: &ResolvedPolicy) -> Self {
        let secrets = resolved
            .bodies
            .iter()
            .flat_map(|body| {
                body.blobs.iter().map(|blob| SecretEntry {
                    policy_id: body.assignment.id.clone(),
                    name: blob.name.clone(),
                    origin: blob.origin,
                    context: blob.context,
                    ciphertext: hex::encode(&blob.ciphertext),
                })
            })
            .collect();
        let failures = resolved
            .failures
            .iter()
            .map(|failure| FailedAssignment {
                policy_id: failure.assignment_id.clone(),
                error: failure.error.to_string(),
            })
            .collect();

        Self {
            client_id: identity.token().to_string(),
            assignments: resolved.assignments.clone(),
            secrets,
            failures,
            artifacts: Vec::new(),
            decrypted: None,
        }
    }
}

/// Resolve policy for `target` and report its secrets.
///
/// With `output`, every fetched body and a JSON summary are written there.
///
/// # Errors
///
/// Failure of the assignment request, or of writing artifacts. Individual
/// bodies that fail are listed in [`PolicyReport::failures`].
pub async fn collect_secrets(
    session: &Session,
    identity: &ClientIdentity,
    target: &PolicyTarget,
    only_flagged: bool,
    output: Option<&ArtifactWriter>,
) -> Result<(PolicyReport, ResolvedPolicy), ClientError> {
    let resolver = PolicyResolver::new(
        &session.transport,
        session.destination(),
        session.settings.policy_signing_key.clone(),
    );
    let resolved = resolver.resolve_secrets(identity, target, only_flagged).await?;
    let mut report = PolicyReport::from_resolved(identity, &resolved);

    if let Some(writer) = output {
        for body in &resolved.bodies {
            let path = writer.write_policy(&body.assignment.id, &body.assignment.version, &body.raw)?;
            report.artifacts.push(path);
        }
        let summary = writer.dir().join(SUMMARY_FILE);
        report.artifacts.push(summary);
        writer.write_json(SUMMARY_FILE, &report)?;
    }

    Ok((report, resolved))
}

/// Decrypt every collected secret. One failure does not stop the rest.
pub fn decrypt_secrets<P>(resolved: &ResolvedPolicy, protection: &P) -> Vec<BlobOutcome>
where
    P: DataProtection + ?Sized,
{
    let blobs: Vec<_> = resolved.blobs().cloned().collect();
    SecretDecryptor::new(protection).decrypt_batch(&blobs)
}

/// Decrypt every collected secret into `report`.
pub fn decrypt_into<P>(report: &mut PolicyReport, resolved: &ResolvedPolicy, protection: &P)
where
    P: DataProtection + ?Sized,
{
    let recovered = Recovered::from_outcomes(decrypt_secrets(resolved, protection));
    tracing::info!(
        decrypted = recovered.secrets.len(),
        failed = recovered.failures.len(),
        "policy secrets decrypted"
    );
    report.decrypted = Some(recovered);
}

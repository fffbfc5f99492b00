//! Policy assignment listing and secret extraction.
//!
//! A policy reply lists assignments; each assignment points at a body that is
//! fetched separately. Bodies look like:
//!
//! ```text
//! <Policy ID=".." Version="..">
//!   <Instance Class="NetworkAccessAccount">
//!     <Secret Name="Username" Context="machine">hex</Secret>
//!     <Secret Name="Password" Context="machine">hex</Secret>
//!   </Instance>
//! </Policy>
//! ```

use std::fmt;

use serde::Serialize;

use crate::codec::{ResponsePayload, ServerResponse};
use crate::secrets::{ProtectionContext, SecretBlob, SecretOrigin};
use crate::xml::{parse_document, Element};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("expected a policy assignment reply, got <{0}>")]
    NotAssignments(&'static str),

    #[error("malformed policy body: {0}")]
    MalformedPolicy(String),
}

/// One assignment header from a policy reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyAssignment {
    pub id: String,
    pub name: String,
    pub collection: String,
    /// Where the body is fetched from with a policy body request.
    pub location: String,
    pub version: String,
    pub flags: AssignmentFlags,
}

/// Flags carried as a comma-separated list, e.g. `secret,mandatory`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentFlags {
    pub secret: bool,
    pub mandatory: bool,
    pub user_targeted: bool,
}

impl AssignmentFlags {
    /// Parse a flag list. Unknown flags are ignored.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut flags = Self::default();
        for flag in s.split(',').map(str::trim) {
            match flag {
                "secret" => flags.secret = true,
                "mandatory" => flags.mandatory = true,
                "user-targeted" => flags.user_targeted = true,
                _ => {}
            }
        }
        flags
    }
}

impl fmt::Display for AssignmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.secret, "secret"),
            (self.mandatory, "mandatory"),
            (self.user_targeted, "user-targeted"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&set.join(","))
    }
}

/// Every assignment in a policy reply, in reply order.
///
/// # Errors
///
/// Returns `PolicyError::NotAssignments` for any other reply type.
pub fn list_assignments(response: &ServerResponse) -> Result<&[PolicyAssignment], PolicyError> {
    match &response.payload {
        ResponsePayload::PolicyAssignments { assignments, .. } => Ok(assignments.as_slice()),
        other => Err(PolicyError::NotAssignments(other.element_name())),
    }
}

/// Every secret in a policy body, in document order, still encrypted.
///
/// # Errors
///
/// Returns `PolicyError::MalformedPolicy` if the body is not a policy
/// document or a secret entry cannot be decoded. No partial list is returned.
pub fn extract_secrets(raw_body: &[u8]) -> Result<Vec<SecretBlob>, PolicyError> {
    let root = parse_document(raw_body).map_err(|e| malformed(e.to_string()))?;
    if root.name() != "Policy" {
        return Err(malformed(format!("unexpected root <{}>", root.name())));
    }
    let policy_id = root.attr("ID").unwrap_or_default();

    let mut blobs = Vec::new();
    for instance in root.children_named("Instance") {
        let Some(origin) = instance.attr("Class").and_then(SecretOrigin::from_class) else {
            continue;
        };
        for secret in instance.children_named("Secret") {
            blobs.push(read_secret(secret, origin, policy_id)?);
        }
    }
    Ok(blobs)
}

fn read_secret(
    secret: &Element,
    origin: SecretOrigin,
    policy_id: &str,
) -> Result<SecretBlob, PolicyError> {
    let name = secret
        .attr("Name")
        .ok_or_else(|| malformed(format!("secret in {policy_id} has no Name")))?;
    let context = match secret.attr("Context") {
        Some("machine") => ProtectionContext::Machine,
        Some("user") => ProtectionContext::User,
        Some(other) => return Err(malformed(format!("{name}: unknown context {other}"))),
        None => return Err(malformed(format!("{name}: missing Context"))),
    };
    let ciphertext =
        hex::decode(secret.text()).map_err(|_| malformed(format!("{name}: ciphertext is not hex")))?;
    if ciphertext.is_empty() {
        return Err(malformed(format!("{name}: empty ciphertext")));
    }

    Ok(SecretBlob {
        name: name.to_string(),
        context,
        origin,
        ciphertext,
    })
}

fn malformed(reason: impl Into<String>) -> PolicyError {
    PolicyError::MalformedPolicy(reason.into())
}

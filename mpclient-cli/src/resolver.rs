//! Policy resolution: request assignments, fetch bodies, collect secrets.

use mpclient_auth::{ClientIdentity, PublicKey};
use mpclient_core::{
    build_message, extract_secrets, list_assignments, CodecError, Destination, MessageParams,
    PolicyAssignment, PolicyError, ResourceKind, ResponsePayload, SecretBlob,
};

use crate::transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Who the policy is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTarget {
    pub kind: ResourceKind,
    pub client_name: String,
    pub fqdn: String,
    pub user_sid: Option<String>,
}

impl PolicyTarget {
    fn to_params(&self) -> MessageParams {
        MessageParams::PolicyRequest {
            kind: self.kind,
            client_name: self.client_name.clone(),
            fqdn: self.fqdn.clone(),
            user_sid: self.user_sid.clone(),
        }
    }
}

/// A fetched policy body and the secrets found in it.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub assignment: PolicyAssignment,
    pub raw: Vec<u8>,
    pub blobs: Vec<SecretBlob>,
}

/// An assignment whose body could not be fetched or parsed.
#[derive(Debug)]
pub struct AssignmentFailure {
    pub assignment_id: String,
    pub error: ResolveError,
}

/// Everything a policy round produced.
#[derive(Debug, Default)]
pub struct ResolvedPolicy {
    pub assignments: Vec<PolicyAssignment>,
    pub bodies: Vec<FetchedBody>,
    pub failures: Vec<AssignmentFailure>,
}

impl ResolvedPolicy {
    /// Every secret across all fetched bodies, in assignment order.
    pub fn blobs(&self) -> impl Iterator<Item = &SecretBlob> {
        self.bodies.iter().flat_map(|body| body.blobs.iter())
    }
}

/// Drives policy requests for one identity against one management point.
pub struct PolicyResolver<'a> {
    transport: &'a Transport,
    destination: Destination,
    body_key: Option<PublicKey>,
}

impl<'a> PolicyResolver<'a> {
    /// `body_key`, when set, must have signed every policy body fetched.
    pub fn new(transport: &'a Transport, destination: Destination, body_key: Option<PublicKey>) -> Self {
        Self {
            transport,
            destination,
            body_key,
        }
    }

    /// Request the assignment list for `target`.
    ///
    /// # Errors
    ///
    /// Transport or reply errors, or `MalformedResponse` if the server
    /// answers for the other resource kind.
    pub async fn request_assignments(
        &self,
        identity: &ClientIdentity,
        target: &PolicyTarget,
    ) -> Result<Vec<PolicyAssignment>, ResolveError> {
        let message = build_message(&target.to_params(), &self.destination, identity)?;
        let response = self.transport.send(&message).await?;

        if let ResponsePayload::PolicyAssignments { kind, .. } = &response.payload {
            if *kind != target.kind {
                return Err(CodecError::MalformedResponse(format!(
                    "requested {} policy, got {}",
                    target.kind.wire_name(),
                    kind.wire_name()
                ))
                .into());
            }
        }

        let assignments = list_assignments(&response)?.to_vec();
        tracing::info!(
            kind = target.kind.wire_name(),
            count = assignments.len(),
            "received policy assignments"
        );
        Ok(assignments)
    }

    /// Fetch the raw body of one assignment.
    ///
    /// # Errors
    ///
    /// Transport or reply errors. With a body key configured, an unsigned or
    /// badly signed body is rejected before it is returned.
    pub async fn fetch_body(
        &self,
        assignment: &PolicyAssignment,
        identity: &ClientIdentity,
    ) -> Result<Vec<u8>, ResolveError> {
        let params = MessageParams::PolicyBodyRequest {
            location: assignment.location.clone(),
            policy_id: assignment.id.clone(),
            policy_version: assignment.version.clone(),
        };
        let message = build_message(&params, &self.destination, identity)?;
        let response = self.transport.send(&message).await?;

        if let Some(key) = &self.body_key {
            response.verify_policy_body(key)?;
        }

        match response.payload {
            ResponsePayload::PolicyBody { body, .. } => {
                tracing::debug!(policy_id = %assignment.id, bytes = body.len(), "fetched policy body");
                Ok(body)
            }
            other => Err(CodecError::MalformedResponse(format!(
                "expected PolicyBody, got {}",
                other.element_name()
            ))
            .into()),
        }
    }

    /// Request policy and collect the secrets of every body.
    ///
    /// With `only_flagged`, bodies are fetched only for assignments flagged
    /// as carrying secrets. A body that fails to fetch or parse is recorded
    /// in [`ResolvedPolicy::failures`] and the rest are still processed.
    ///
    /// # Errors
    ///
    /// Only a failure of the initial assignment request is fatal.
    pub async fn resolve_secrets(
        &self,
        identity: &ClientIdentity,
        target: &PolicyTarget,
        only_flagged: bool,
    ) -> Result<ResolvedPolicy, ResolveError> {
        let assignments = self.request_assignments(identity, target).await?;
        let mut resolved = ResolvedPolicy::default();

        for assignment in assignments.iter().filter(|a| !only_flagged || a.flags.secret) {
            match self.fetch_and_extract(assignment, identity).await {
                Ok(body) => resolved.bodies.push(body),
                Err(error) => {
                    tracing::warn!(policy_id = %assignment.id, error = %error, "skipping policy body");
                    resolved.failures.push(AssignmentFailure {
                        assignment_id: assignment.id.clone(),
                        error,
                    });
                }
            }
        }

        resolved.assignments = assignments;
        Ok(resolved)
    }

    async fn fetch_and_extract(
        &self,
        assignment: &PolicyAssignment,
        identity: &ClientIdentity,
    ) -> Result<FetchedBody, ResolveError> {
        let raw = self.fetch_body(assignment, identity).await?;
        let blobs = extract_secrets(&raw)?;
        if !blobs.is_empty() {
            tracing::info!(policy_id = %assignment.id, secrets = blobs.len(), "found secrets");
        }
        Ok(FetchedBody {
            assignment: assignment.clone(),
            raw,
            blobs,
        })
    }
}

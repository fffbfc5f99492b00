//! `content-location`: ask where a package's content lives.
//!
//! With a relay target the server is pointed at the target instead, which is
//! the usual reason to send this request.

use mpclient_auth::ClientIdentity;
use mpclient_core::{build_message, CodecError, MessageParams, ResponsePayload};
use serde::Serialize;

use super::Session;
use crate::error::ClientError;
use crate::transport::{RelayOutcome, RelayTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ContentLocationOutcome {
    Locations { urls: Vec<String> },
    RelayAccepted { target: String },
    RelayRejected { target: String, status: u32 },
}

/// # Errors
///
/// Transport and reply errors.
pub async fn request_content_location(
    session: &Session,
    identity: &ClientIdentity,
    package_id: &str,
    package_version: u32,
    relay: Option<&RelayTarget>,
) -> Result<ContentLocationOutcome, ClientError> {
    let params = MessageParams::ContentLocationRequest {
        package_id: package_id.to_string(),
        package_version,
    };
    let message = build_message(&params, &session.destination(), identity)?;

    if let Some(target) = relay {
        return Ok(match session.transport.relay(&message, target).await? {
            RelayOutcome::Accepted => ContentLocationOutcome::RelayAccepted {
                target: target.to_string(),
            },
            RelayOutcome::Rejected { status } => ContentLocationOutcome::RelayRejected {
                target: target.to_string(),
                status,
            },
        });
    }

    let response = session.transport.send(&message).await?;
    match response.payload {
        ResponsePayload::ContentLocations(urls) => {
            tracing::info!(package_id, count = urls.len(), "content locations");
            Ok(ContentLocationOutcome::Locations { urls })
        }
        other => Err(CodecError::MalformedResponse(format!(
            "expected ContentLocations, got {}",
            other.element_name()
        ))
        .into()),
    }
}

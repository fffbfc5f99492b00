//! `register`: announce a new identity and adopt the token the server assigns.

use mpclient_auth::ClientIdentity;
use mpclient_core::{build_message, CodecError, MessageParams, ResponsePayload};
use serde::Serialize;

use super::Session;
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub client_id: String,
    pub fingerprint: String,
    pub approved: bool,
    pub certificate: String,
}

/// Register `identity` as `client_name` and bind the server-issued token to it.
///
/// # Errors
///
/// Transport and reply errors, or `TokenAlreadyIssued` if the identity was
/// registered before under a different token.
pub async fn register(
    session: &Session,
    identity: &mut ClientIdentity,
    client_name: &str,
    fqdn: &str,
) -> Result<RegistrationOutcome, ClientError> {
    let params = MessageParams::Registration {
        client_name: client_name.to_string(),
        fqdn: fqdn.to_string(),
    };
    let message = build_message(&params, &session.destination(), identity)?;
    let response = session.transport.send(&message).await?;

    let ResponsePayload::Registration { token, approved } = response.payload else {
        return Err(CodecError::MalformedResponse(format!(
            "expected Registration, got {}",
            response.payload.element_name()
        ))
        .into());
    };
    identity.adopt_server_token(token)?;

    if approved {
        tracing::info!(client_id = %token, client_name, "registered");
    } else {
        tracing::warn!(client_id = %token, client_name, "registered but not yet approved");
    }

    Ok(RegistrationOutcome {
        client_id: token.to_string(),
        fingerprint: identity.fingerprint().to_hex(),
        approved,
        certificate: identity.certificate_hex(),
    })
}

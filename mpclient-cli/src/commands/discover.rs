//! `discover`: send a discovery record, optionally in relay mode.

use std::net::IpAddr;

use mpclient_auth::ClientIdentity;
use mpclient_core::{build_message, MessageParams};
use serde::Serialize;

use super::Session;
use crate::error::ClientError;
use crate::transport::{RelayOutcome, RelayTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    Acknowledged { client_id: String },
    /// Only says the server took the request; it may or may not have called out.
    RelayAccepted { target: String },
    RelayRejected { target: String, status: u32 },
}

/// Build, sign and send a discovery record for `identity`.
///
/// # Errors
///
/// Transport and reply errors. A rejected relay request is an outcome.
pub async fn send_discovery(
    session: &Session,
    identity: &ClientIdentity,
    client_name: &str,
    fqdn: &str,
    ip_addresses: Vec<IpAddr>,
    relay: Option<&RelayTarget>,
) -> Result<DiscoveryOutcome, ClientError> {
    let params = MessageParams::DiscoveryRecord {
        client_name: client_name.to_string(),
        fqdn: fqdn.to_string(),
        ip_addresses,
    };
    let message = build_message(&params, &session.destination(), identity)?;

    let Some(target) = relay else {
        session.transport.send(&message).await?;
        tracing::info!(client_name, client_id = %identity.token(), "discovery record acknowledged");
        return Ok(DiscoveryOutcome::Acknowledged {
            client_id: identity.token().to_string(),
        });
    };

    Ok(match session.transport.relay(&message, target).await? {
        RelayOutcome::Accepted => DiscoveryOutcome::RelayAccepted {
            target: target.to_string(),
        },
        RelayOutcome::Rejected { status } => DiscoveryOutcome::RelayRejected {
            target: target.to_string(),
            status,
        },
    })
}

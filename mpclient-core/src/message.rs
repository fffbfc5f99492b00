//! Protocol message types and construction.
//!
//! A [`ProtocolMessage`] is built once per outbound call: the body is rendered
//! to bytes, the headers are stamped, and the body bytes are signed with the
//! client identity. Nothing about the message can change after that.

use std::net::IpAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use mpclient_auth::signing::verify_body;
use mpclient_auth::{ClientIdentity, ClientToken, Signature, SigningError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::CodecError;
use crate::xml::XmlOut;

/// The five request kinds a management point accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Registration,
    DiscoveryRecord,
    PolicyRequest,
    PolicyBodyRequest,
    ContentLocationRequest,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Registration,
        MessageType::DiscoveryRecord,
        MessageType::PolicyRequest,
        MessageType::PolicyBodyRequest,
        MessageType::ContentLocationRequest,
    ];

    /// Name carried in the envelope `<Type>` element.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Registration => "RegistrationRequest",
            Self::DiscoveryRecord => "DiscoveryRecord",
            Self::PolicyRequest => "PolicyRequest",
            Self::PolicyBodyRequest => "PolicyBodyRequest",
            Self::ContentLocationRequest => "ContentLocationRequest",
        }
    }

    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.wire_name() == name)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Whose policy is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Machine,
    User,
}

impl ResourceKind {
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Machine => "Machine",
            Self::User => "User",
        }
    }

    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "Machine" => Some(Self::Machine),
            "User" => Some(Self::User),
            _ => None,
        }
    }
}

/// Type-specific request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageParams {
    Registration {
        client_name: String,
        fqdn: String,
    },
    DiscoveryRecord {
        client_name: String,
        fqdn: String,
        ip_addresses: Vec<IpAddr>,
    },
    PolicyRequest {
        kind: ResourceKind,
        client_name: String,
        fqdn: String,
        user_sid: Option<String>,
    },
    PolicyBodyRequest {
        location: String,
        policy_id: String,
        policy_version: String,
    },
    ContentLocationRequest {
        package_id: String,
        package_version: u32,
    },
}

impl MessageParams {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Registration { .. } => MessageType::Registration,
            Self::DiscoveryRecord { .. } => MessageType::DiscoveryRecord,
            Self::PolicyRequest { .. } => MessageType::PolicyRequest,
            Self::PolicyBodyRequest { .. } => MessageType::PolicyBodyRequest,
            Self::ContentLocationRequest { .. } => MessageType::ContentLocationRequest,
        }
    }
}

/// Site and management point a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub site_code: String,
    pub management_point: String,
}

impl Destination {
    pub fn new(site_code: impl Into<String>, management_point: impl Into<String>) -> Self {
        Self {
            site_code: site_code.into(),
            management_point: management_point.into(),
        }
    }
}

/// Envelope headers stamped at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    pub message_id: Uuid,
    pub source: ClientToken,
    pub site_code: String,
    pub target_host: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageHeaders {
    /// `SentTime` as carried on the wire.
    #[must_use]
    pub fn sent_time(&self) -> String {
        self.sent_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// A signed outbound message. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    message_type: MessageType,
    headers: MessageHeaders,
    certificate_der: Vec<u8>,
    body: Vec<u8>,
    signature: Signature,
}

impl ProtocolMessage {
    /// Reassemble a message from decoded envelope parts without re-signing.
    pub(crate) fn from_parts(
        message_type: MessageType,
        headers: MessageHeaders,
        certificate_der: Vec<u8>,
        body: Vec<u8>,
        signature: Signature,
    ) -> Self {
        Self {
            message_type,
            headers,
            certificate_der,
            body,
            signature,
        }
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    #[must_use]
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    #[must_use]
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Canonical body bytes, exactly as signed.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Check the body signature against the embedded certificate.
    ///
    /// # Errors
    ///
    /// Returns the signing error when the certificate does not parse or the
    /// signature does not match.
    pub fn verify(&self) -> Result<(), SigningError> {
        verify_body(&self.certificate_der, &self.body, &self.signature)
    }
}

/// Render, stamp and sign a message for `destination` as `identity`.
///
/// # Errors
///
/// Returns `CodecError::Render` if the body cannot be written and
/// `CodecError::Signing` if signing fails.
pub fn build_message(
    params: &MessageParams,
    destination: &Destination,
    identity: &ClientIdentity,
) -> Result<ProtocolMessage, CodecError> {
    let body = render_body(params, destination, identity)?;
    let signature = identity.sign(&body)?;

    let headers = MessageHeaders {
        message_id: Uuid::new_v4(),
        source: *identity.token(),
        site_code: destination.site_code.clone(),
        target_host: destination.management_point.clone(),
        sent_at: Utc::now(),
    };

    Ok(ProtocolMessage {
        message_type: params.message_type(),
        headers,
        certificate_der: identity.certificate_der().to_vec(),
        body,
        signature,
    })
}

fn render_body(
    params: &MessageParams,
    destination: &Destination,
    identity: &ClientIdentity,
) -> Result<Vec<u8>, CodecError> {
    let token = identity.token().to_string();
    let mut out = XmlOut::new();

    match params {
        MessageParams::Registration { client_name, fqdn } => {
            out.start("Registration", &[])?;
            out.empty(
                "Client",
                &[("Name", client_name), ("Fqdn", fqdn), ("Token", &token)],
            )?;
            out.text_element("Certificate", &identity.certificate_hex())?;
            out.end("Registration")?;
        }
        MessageParams::DiscoveryRecord {
            client_name,
            fqdn,
            ip_addresses,
        } => {
            out.start("DiscoveryRecord", &[])?;
            property(&mut out, "ClientName", client_name)?;
            property(&mut out, "Fqdn", fqdn)?;
            property(&mut out, "SiteCode", &destination.site_code)?;
            property(&mut out, "ClientToken", &token)?;
            for address in ip_addresses {
                property(&mut out, "IPAddress", &address.to_string())?;
            }
            out.end("DiscoveryRecord")?;
        }
        MessageParams::PolicyRequest {
            kind,
            client_name,
            fqdn,
            user_sid,
        } => {
            out.start("PolicyRequest", &[("ResourceType", kind.wire_name())])?;
            out.empty(
                "Machine",
                &[("Token", &token), ("Name", client_name), ("Fqdn", fqdn)],
            )?;
            if let Some(sid) = user_sid {
                out.empty("User", &[("Sid", sid)])?;
            }
            out.end("PolicyRequest")?;
        }
        MessageParams::PolicyBodyRequest {
            location,
            policy_id,
            policy_version,
        } => {
            out.empty(
                "PolicyBodyRequest",
                &[
                    ("Location", location),
                    ("PolicyID", policy_id),
                    ("Version", policy_version),
                ],
            )?;
        }
        MessageParams::ContentLocationRequest {
            package_id,
            package_version,
        } => {
            out.empty(
                "ContentLocationRequest",
                &[
                    ("Package", package_id),
                    ("Version", &package_version.to_string()),
                    ("Token", &token),
                ],
            )?;
        }
    }

    Ok(out.finish())
}

fn property(out: &mut XmlOut, name: &str, value: &str) -> Result<(), CodecError> {
    out.empty("Property", &[("Name", name), ("Value", value)])?;
    Ok(())
}

//! Envelope encoding and reply parsing.
//!
//! # Request envelope
//!
//! ```text
//! <Msg SchemaVersion="1.0">
//!   <ID/> <Type/> <SourceID/> <SiteCode/> <TargetHost/> <SentTime/>
//!   [<CallbackTarget/>]
//!   <Certificate>hex DER</Certificate>
//!   <Body>base64 body bytes</Body>
//!   <Signature>hex</Signature>
//! </Msg>
//! ```
//!
//! The body is carried as base64 of the exact bytes that were signed.
//! `CallbackTarget` is a routing header outside the signed body.
//!
//! # Reply
//!
//! `<Reply Status="0">` with exactly one payload element. A non-zero status is
//! a server rejection, an empty body is [`CodecError::EmptyResponse`], and
//! anything that does not fit the schema for the expected request type is
//! [`CodecError::MalformedResponse`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use mpclient_auth::signing::verify_body_with_key;
use mpclient_auth::{ClientToken, PublicKey, Signature, SigningError};
use uuid::Uuid;

use crate::message::{MessageHeaders, MessageType, ProtocolMessage, ResourceKind};
use crate::policy::{AssignmentFlags, PolicyAssignment};
use crate::xml::{parse_document, Element, XmlError, XmlOut};

const SCHEMA_VERSION: &str = "1.0";

/// Errors from encoding requests or decoding replies.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The server answered with no body at all.
    #[error("server returned an empty response")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("malformed request envelope: {0}")]
    MalformedEnvelope(String),

    #[error("server rejected the request with status {status}{}", reason_suffix(.reason))]
    ServerRejected { status: u32, reason: Option<String> },

    #[error("policy body carries no server signature")]
    UnsignedBody,

    #[error("failed to render message")]
    Render(#[from] XmlError),

    #[error("signing failed")]
    Signing(#[from] SigningError),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse(reason.into())
    }

    fn envelope(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }
}

/// Parsed reply payload, one variant per request type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    Registration {
        token: ClientToken,
        approved: bool,
    },
    Acknowledged,
    PolicyAssignments {
        kind: ResourceKind,
        assignments: Vec<PolicyAssignment>,
    },
    PolicyBody {
        body: Vec<u8>,
        signature: Option<Signature>,
    },
    ContentLocations(Vec<String>),
}

impl ResponsePayload {
    /// Payload element name on the wire.
    #[must_use]
    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Registration { .. } => "Registration",
            Self::Acknowledged => "Ack",
            Self::PolicyAssignments { .. } => "PolicyAssignments",
            Self::PolicyBody { .. } => "PolicyBody",
            Self::ContentLocations(_) => "ContentLocations",
        }
    }

    /// Payload element a reply to `message_type` must carry.
    #[must_use]
    pub fn expected_element(message_type: MessageType) -> &'static str {
        match message_type {
            MessageType::Registration => "Registration",
            MessageType::DiscoveryRecord => "Ack",
            MessageType::PolicyRequest => "PolicyAssignments",
            MessageType::PolicyBodyRequest => "PolicyBody",
            MessageType::ContentLocationRequest => "ContentLocations",
        }
    }
}

/// A fully parsed reply. Only produced when every field validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    pub status: u32,
    pub raw_body: Vec<u8>,
    pub payload: ResponsePayload,
}

impl ServerResponse {
    /// Verify a policy body reply against a pinned server key.
    ///
    /// # Errors
    ///
    /// - `CodecError::UnsignedBody` if the body has no signature
    /// - `CodecError::Signing` if the signature does not match
    /// - `CodecError::MalformedResponse` if this is not a policy body reply
    pub fn verify_policy_body(&self, server_key: &PublicKey) -> Result<(), CodecError> {
        match &self.payload {
            ResponsePayload::PolicyBody {
                body,
                signature: Some(signature),
            } => Ok(verify_body_with_key(server_key, body, signature)?),
            ResponsePayload::PolicyBody {
                signature: None, ..
            } => Err(CodecError::UnsignedBody),
            other => Err(CodecError::malformed(format!(
                "expected PolicyBody, got {}",
                other.element_name()
            ))),
        }
    }
}

/// Render the request envelope for a signed message.
///
/// # Errors
///
/// Returns `CodecError::Render` if the XML writer fails.
pub fn encode_envelope(
    message: &ProtocolMessage,
    callback_target: Option<&str>,
) -> Result<Vec<u8>, CodecError> {
    let headers = message.headers();
    let mut out = XmlOut::new();

    out.start("Msg", &[("SchemaVersion", SCHEMA_VERSION)])?;
    out.text_element("ID", &headers.message_id.hyphenated().to_string())?;
    out.text_element("Type", message.message_type().wire_name())?;
    out.text_element("SourceID", &headers.source.to_string())?;
    out.text_element("SiteCode", &headers.site_code)?;
    out.text_element("TargetHost", &headers.target_host)?;
    out.text_element("SentTime", &headers.sent_time())?;
    if let Some(target) = callback_target {
        out.text_element("CallbackTarget", target)?;
    }
    out.text_element("Certificate", &hex::encode(message.certificate_der()))?;
    out.text_element("Body", &BASE64.encode(message.body()))?;
    out.text_element("Signature", &message.signature().to_hex())?;
    out.end("Msg")?;

    Ok(out.finish())
}

/// A request envelope as read back by a management point.
#[derive(Debug, Clone)]
pub struct DecodedEnvelope {
    pub message: ProtocolMessage,
    pub callback_target: Option<String>,
}

/// Parse a request envelope. The signature is decoded but not verified; call
/// [`ProtocolMessage::verify`] on the result.
///
/// # Errors
///
/// Returns `CodecError::MalformedEnvelope` for any structural problem.
pub fn decode_envelope(raw: &[u8]) -> Result<DecodedEnvelope, CodecError> {
    let root = parse_document(raw).map_err(|e| CodecError::envelope(e.to_string()))?;
    if root.name() != "Msg" {
        return Err(CodecError::envelope(format!("unexpected root <{}>", root.name())));
    }
    if root.attr("SchemaVersion") != Some(SCHEMA_VERSION) {
        return Err(CodecError::envelope("unsupported schema version"));
    }

    let text = |name: &str| {
        root.child(name)
            .map(Element::text)
            .ok_or_else(|| CodecError::envelope(format!("missing <{name}>")))
    };

    let message_id = Uuid::parse_str(text("ID")?)
        .map_err(|_| CodecError::envelope("ID is not a UUID"))?;
    let message_type = MessageType::from_wire(text("Type")?)
        .ok_or_else(|| CodecError::envelope("unknown message type"))?;
    let source =
        ClientToken::parse(text("SourceID")?).map_err(|e| CodecError::envelope(e.to_string()))?;
    let sent_at = DateTime::parse_from_rfc3339(text("SentTime")?)
        .map_err(|_| CodecError::envelope("SentTime is not RFC 3339"))?
        .with_timezone(&Utc);
    let certificate_der =
        hex::decode(text("Certificate")?).map_err(|_| CodecError::envelope("Certificate is not hex"))?;
    let body = BASE64
        .decode(text("Body")?)
        .map_err(|_| CodecError::envelope("Body is not base64"))?;
    let signature = Signature::from_hex(text("Signature")?)
        .map_err(|e| CodecError::envelope(e.to_string()))?;

    let headers = MessageHeaders {
        message_id,
        source,
        site_code: text("SiteCode")?.to_string(),
        target_host: text("TargetHost")?.to_string(),
        sent_at,
    };

    Ok(DecodedEnvelope {
        message: ProtocolMessage::from_parts(message_type, headers, certificate_der, body, signature),
        callback_target: root.child("CallbackTarget").map(|e| e.text().to_string()),
    })
}

/// Parse a reply to a request of `expected` type.
///
/// # Errors
///
/// - `CodecError::EmptyResponse` for an empty or whitespace-only body
/// - `CodecError::ServerRejected` for a non-zero status
/// - `CodecError::MalformedResponse` for everything else that does not fit
pub fn parse_response(raw: &[u8], expected: MessageType) -> Result<ServerResponse, CodecError> {
    let root = parse_reply_root(raw)?;
    let status = reply_status(&root)?;
    if status != 0 {
        return Err(CodecError::ServerRejected {
            status,
            reason: root.attr("Reason").map(str::to_string),
        });
    }

    let payload = match root.children() {
        [payload] => payload,
        [] => return Err(CodecError::malformed("reply has no payload")),
        _ => return Err(CodecError::malformed("reply has more than one payload")),
    };

    let wanted = ResponsePayload::expected_element(expected);
    if payload.name() != wanted {
        return Err(CodecError::malformed(format!(
            "expected <{wanted}> for {expected}, got <{}>",
            payload.name()
        )));
    }

    let payload = match expected {
        MessageType::Registration => parse_registration(payload)?,
        MessageType::DiscoveryRecord => ResponsePayload::Acknowledged,
        MessageType::PolicyRequest => parse_assignments(payload)?,
        MessageType::PolicyBodyRequest => parse_policy_body(payload)?,
        MessageType::ContentLocationRequest => parse_content_locations(payload)?,
    };

    Ok(ServerResponse {
        status,
        raw_body: raw.to_vec(),
        payload,
    })
}

/// Read only the reply status. Used where the payload is not of interest.
///
/// # Errors
///
/// `CodecError::EmptyResponse` or `CodecError::MalformedResponse`.
pub fn parse_reply_status(raw: &[u8]) -> Result<u32, CodecError> {
    reply_status(&parse_reply_root(raw)?)
}

fn parse_reply_root(raw: &[u8]) -> Result<Element, CodecError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::EmptyResponse);
    }
    let root = parse_document(raw).map_err(|e| CodecError::malformed(e.to_string()))?;
    if root.name() != "Reply" {
        return Err(CodecError::malformed(format!("unexpected root <{}>", root.name())));
    }
    Ok(root)
}

fn reply_status(root: &Element) -> Result<u32, CodecError> {
    root.attr("Status")
        .ok_or_else(|| CodecError::malformed("reply has no Status"))?
        .parse()
        .map_err(|_| CodecError::malformed("Status is not a number"))
}

fn required<'a>(element: &'a Element, attr: &str) -> Result<&'a str, CodecError> {
    element
        .attr(attr)
        .ok_or_else(|| CodecError::malformed(format!("<{}> missing {attr}", element.name())))
}

fn parse_registration(element: &Element) -> Result<ResponsePayload, CodecError> {
    let token = ClientToken::parse(required(element, "Token")?)
        .map_err(|e| CodecError::malformed(e.to_string()))?;
    let approved = match required(element, "Approved")? {
        "true" | "1" => true,
        "false" | "0" => false,
        other => return Err(CodecError::malformed(format!("Approved={other}"))),
    };
    Ok(ResponsePayload::Registration { token, approved })
}

fn parse_assignments(element: &Element) -> Result<ResponsePayload, CodecError> {
    let kind = ResourceKind::from_wire(required(element, "ResourceType")?)
        .ok_or_else(|| CodecError::malformed("unknown ResourceType"))?;

    let assignments = element
        .children()
        .iter()
        .map(|child| {
            if child.name() != "Assignment" {
                return Err(CodecError::malformed(format!(
                    "unexpected <{}> in assignments",
                    child.name()
                )));
            }
            Ok(PolicyAssignment {
                id: required(child, "ID")?.to_string(),
                name: required(child, "Name")?.to_string(),
                collection: required(child, "Collection")?.to_string(),
                location: required(child, "Location")?.to_string(),
                version: required(child, "Version")?.to_string(),
                flags: AssignmentFlags::parse(child.attr("Flags").unwrap_or_default()),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResponsePayload::PolicyAssignments { kind, assignments })
}

fn parse_policy_body(element: &Element) -> Result<ResponsePayload, CodecError> {
    let body = BASE64
        .decode(element.text())
        .map_err(|_| CodecError::malformed("PolicyBody is not base64"))?;
    let signature = element
        .attr("Signature")
        .map(Signature::from_hex)
        .transpose()
        .map_err(|e| CodecError::malformed(e.to_string()))?;
    Ok(ResponsePayload::PolicyBody { body, signature })
}

fn parse_content_locations(element: &Element) -> Result<ResponsePayload, CodecError> {
    element
        .children()
        .iter()
        .map(|child| match child.name() {
            "Location" => required(child, "Url").map(str::to_string),
            other => Err(CodecError::malformed(format!("unexpected <{other}> in locations"))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(ResponsePayload::ContentLocations)
}

/// Render a reply document. The management point side of [`parse_response`].
///
/// # Errors
///
/// Returns `CodecError::Render` if the XML writer fails.
pub fn encode_reply(
    status: u32,
    reason: Option<&str>,
    payload: Option<&ResponsePayload>,
) -> Result<Vec<u8>, CodecError> {
    let status = status.to_string();
    let mut attributes = vec![("Status", status.as_str())];
    if let Some(reason) = reason {
        attributes.push(("Reason", reason));
    }

    let mut out = XmlOut::new();
    out.start("Reply", &attributes)?;
    match payload {
        None => {}
        Some(ResponsePayload::Registration { token, approved }) => {
            out.empty(
                "Registration",
                &[
                    ("Token", &token.to_string()),
                    ("Approved", if *approved { "true" } else { "false" }),
                ],
            )?;
        }
        Some(ResponsePayload::Acknowledged) => out.empty("Ack", &[])?,
        Some(ResponsePayload::PolicyAssignments { kind, assignments }) => {
            out.start("PolicyAssignments", &[("ResourceType", kind.wire_name())])?;
            for assignment in assignments {
                let flags = assignment.flags.to_string();
                out.empty(
                    "Assignment",
                    &[
                        ("ID", &assignment.id),
                        ("Name", &assignment.name),
                        ("Collection", &assignment.collection),
                        ("Location", &assignment.location),
                        ("Version", &assignment.version),
                        ("Flags", &flags),
                    ],
                )?;
            }
            out.end("PolicyAssignments")?;
        }
        Some(ResponsePayload::PolicyBody { body, signature }) => {
            let signature = signature.as_ref().map(Signature::to_hex);
            let attributes: Vec<(&str, &str)> = signature
                .as_deref()
                .map(|s| vec![("Signature", s)])
                .unwrap_or_default();
            out.start("PolicyBody", &attributes)?;
            out.text(&BASE64.encode(body))?;
            out.end("PolicyBody")?;
        }
        Some(ResponsePayload::ContentLocations(urls)) => {
            out.start("ContentLocations", &[])?;
            for url in urls {
                out.empty("Location", &[("Url", url)])?;
            }
            out.end("ContentLocations")?;
        }
    }
    out.end("Reply")?;
    Ok(out.finish())
}

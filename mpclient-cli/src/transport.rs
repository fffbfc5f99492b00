//! HTTP transport to the management point.
//!
//! One request per call, no retries. Each message type is posted to its own
//! path from the [`EndpointTable`]. In relay mode the envelope names a
//! callback target and the reply is reduced to accepted or rejected.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mpclient_core::{encode_envelope, parse_reply_status, parse_response, CodecError, ProtocolMessage, ServerResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;

use crate::config::{EndpointTable, Settings};
use crate::tls::pinned_client_config;

const MAX_REDIRECTS: usize = 5;
const CONTENT_TYPE_XML: &str = "text/xml; charset=utf-8";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),

    #[error("failed to configure TLS")]
    Tls(#[from] rustls::Error),

    #[error("could not connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid relay target {target:?}: {reason}")]
    InvalidRelayTarget { target: String, reason: &'static str },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TransportError {
    fn from_send(url: &str, source: reqwest::Error) -> Self {
        let url = url.to_string();
        if source.is_timeout() {
            Self::Timeout { url, source }
        } else if source.is_connect() {
            Self::Connect { url, source }
        } else {
            Self::Request { url, source }
        }
    }
}

/// Where the management point should authenticate to: `host` or `host@port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub port: Option<u16>,
}

impl RelayTarget {
    /// Value of the `CallbackTarget` header.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }
}

impl FromStr for RelayTarget {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| TransportError::InvalidRelayTarget {
            target: s.to_string(),
            reason,
        };

        let (host, port) = match s.split_once('@') {
            Some((host, port)) => (host, Some(port)),
            None => (s, None),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
            return Err(invalid("host contains invalid characters"));
        }

        let port = match port {
            None => None,
            Some("") => return Err(invalid("empty port")),
            Some(port) => match port.parse::<u16>() {
                Ok(0) => return Err(invalid("port must be non-zero")),
                Ok(port) => Some(port),
                Err(_) => return Err(invalid("port is not a number")),
            },
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}@{port}", self.host),
            None => f.write_str(&self.host),
        }
    }
}

/// What a relay-mode request achieved. Acceptance says nothing about whether
/// the server went on to authenticate to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Accepted,
    Rejected { status: u32 },
}

/// HTTP client bound to one management point.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    endpoints: EndpointTable,
}

impl Transport {
    /// Build a transport from resolved settings.
    ///
    /// # Errors
    ///
    /// `TransportError::Tls` or `TransportError::Build`.
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.request_timeout.min(Duration::from_secs(10)))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("mpclient/", env!("CARGO_PKG_VERSION")));

        if let Some(fingerprint) = settings.server_fingerprint {
            builder = builder.use_preconfigured_tls(pinned_client_config(fingerprint)?);
        }

        Ok(Self {
            client: builder.build().map_err(TransportError::Build)?,
            base_url: settings.base_url(),
            endpoints: settings.endpoints.clone(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for `path`.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    #[must_use]
    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// The underlying HTTP client, for other endpoints on the same server.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send `message` and parse the reply for its type.
    ///
    /// # Errors
    ///
    /// Network failures, non-success HTTP status, or any reply parse error
    /// (`EmptyResponse`, `MalformedResponse`, `ServerRejected`) wrapped in
    /// `TransportError::Codec`.
    pub async fn send(&self, message: &ProtocolMessage) -> Result<ServerResponse, TransportError> {
        let raw = self.post(message, None).await?;
        Ok(parse_response(&raw, message.message_type())?)
    }

    /// Send `message` asking the server to call back to `target`.
    ///
    /// # Errors
    ///
    /// Network failures and non-success HTTP status. An empty or malformed
    /// reply is an error; a well-formed non-zero status is `Rejected`.
    pub async fn relay(
        &self,
        message: &ProtocolMessage,
        target: &RelayTarget,
    ) -> Result<RelayOutcome, TransportError> {
        let raw = self.post(message, Some(&target.header_value())).await?;
        let status = parse_reply_status(&raw)?;
        tracing::debug!(target = %target, status, "relay request answered");
        Ok(if status == 0 {
            RelayOutcome::Accepted
        } else {
            RelayOutcome::Rejected { status }
        })
    }

    async fn post(
        &self,
        message: &ProtocolMessage,
        callback_target: Option<&str>,
    ) -> Result<Vec<u8>, TransportError> {
        let url = self.url_for(self.endpoints.path_for(message.message_type()));
        let envelope = encode_envelope(message, callback_target)?;

        tracing::debug!(
            url = %url,
            message_type = %message.message_type(),
            message_id = %message.headers().message_id,
            bytes = envelope.len(),
            relay = callback_target.is_some(),
            "sending request"
        );

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, CONTENT_TYPE_XML)
            .body(envelope)
            .send()
            .await
            .map_err(|e| TransportError::from_send(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| TransportError::Body {
                url: url.clone(),
                source,
            })?;
        tracing::debug!(url = %url, bytes = body.len(), "response received");
        Ok(body.to_vec())
    }
}

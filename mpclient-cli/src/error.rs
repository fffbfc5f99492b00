//! Error aggregate for the CLI layer.

use mpclient_auth::{IdentityError, SigningError};
use mpclient_core::{CodecError, PolicyError, QueryError, SecretError};

use crate::config::ConfigError;
use crate::local::LocalError;
use crate::output::OutputError;
use crate::resolver::ResolveError;
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::waiter::WaitError;

/// Coarse classification used for exit reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCertificate,
    MissingKey,
    MalformedResponse,
    EmptyResponse,
    /// The server answered with a non-zero status.
    Rejected,
    Transport,
    InsufficientPrivilege,
    DecryptionFailed,
    /// The membership wait deadline passed. Carried by the wait status, never
    /// raised as an error.
    Timeout,
    InvalidArgumentCombination,
    /// No host facility backend for this platform.
    Unsupported,
    Config,
    Storage,
    Other,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("invalid arguments: {0}")]
    InvalidArgumentCombination(String),
}

impl From<ResolveError> for ClientError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Transport(e) => Self::Transport(e),
            ResolveError::Codec(e) => Self::Codec(e),
            ResolveError::Policy(e) => Self::Policy(e),
        }
    }
}

impl ClientError {
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArgumentCombination(reason.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Identity(e) => identity_kind(e),
            Self::Codec(e) => codec_kind(e),
            Self::Policy(_) => ErrorKind::MalformedResponse,
            Self::Secret(e) => secret_kind(e),
            Self::Transport(e) => transport_kind(e),
            Self::Query(_) => ErrorKind::Transport,
            Self::Wait(WaitError::NoSnapshot { .. }) => ErrorKind::Transport,
            Self::Wait(_) => ErrorKind::Other,
            Self::Config(_) => ErrorKind::Config,
            Self::Store(_) | Self::Output(_) => ErrorKind::Storage,
            Self::Local(e) => local_kind(e),
            Self::InvalidArgumentCombination(_) => ErrorKind::InvalidArgumentCombination,
        }
    }
}

fn identity_kind(e: &IdentityError) -> ErrorKind {
    match e {
        IdentityError::InvalidCertificate(_) => ErrorKind::InvalidCertificate,
        IdentityError::MissingKey { .. } => ErrorKind::MissingKey,
        IdentityError::InvalidToken(_) => ErrorKind::InvalidArgumentCombination,
        IdentityError::KeyStore(_) => ErrorKind::Storage,
        _ => ErrorKind::Other,
    }
}

fn codec_kind(e: &CodecError) -> ErrorKind {
    match e {
        CodecError::EmptyResponse => ErrorKind::EmptyResponse,
        CodecError::MalformedResponse(_) | CodecError::UnsignedBody => ErrorKind::MalformedResponse,
        CodecError::ServerRejected { .. } => ErrorKind::Rejected,
        CodecError::Signing(SigningError::BodyTooLarge(_)) => ErrorKind::Other,
        CodecError::Signing(_) => ErrorKind::MalformedResponse,
        _ => ErrorKind::Other,
    }
}

fn secret_kind(e: &SecretError) -> ErrorKind {
    match e {
        SecretError::InsufficientPrivilege { .. } | SecretError::Elevation { .. } => {
            ErrorKind::InsufficientPrivilege
        }
        SecretError::DecryptionFailed { .. } | SecretError::MalformedCredential(_) => {
            ErrorKind::DecryptionFailed
        }
        _ => ErrorKind::Other,
    }
}

fn local_kind(e: &LocalError) -> ErrorKind {
    match e {
        LocalError::Unsupported { .. } => ErrorKind::Unsupported,
        LocalError::Read { .. } => ErrorKind::Storage,
        _ => ErrorKind::Other,
    }
}

fn transport_kind(e: &TransportError) -> ErrorKind {
    match e {
        TransportError::Codec(e) => codec_kind(e),
        TransportError::InvalidRelayTarget { .. } => ErrorKind::InvalidArgumentCombination,
        _ => ErrorKind::Transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpclient_auth::{CertError, PrivateKey};
    use mpclient_core::secrets::{ElevationTactic, Privileges};
    use std::path::PathBuf;

    fn reqwest_error() -> reqwest::Error {
        reqwest::Client::new().get("not a url").build().unwrap_err()
    }

    fn url() -> String {
        "https://mp01.corp.example/ccm_system/request".to_string()
    }

    fn io_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")
    }

    fn kind(e: impl Into<ClientError>) -> ErrorKind {
        e.into().kind()
    }

    #[test]
    fn identity_kinds() {
        let fingerprint = PrivateKey::generate().public_key().fingerprint();
        assert_eq!(
            kind(IdentityError::InvalidCertificate(CertError::UnsupportedKey)),
            ErrorKind::InvalidCertificate
        );
        assert_eq!(kind(IdentityError::MissingKey { fingerprint }), ErrorKind::MissingKey);
        assert_eq!(
            kind(IdentityError::InvalidToken("bogus".into())),
            ErrorKind::InvalidArgumentCombination
        );
        assert_eq!(kind(IdentityError::KeyStore(Box::new(io_error()))), ErrorKind::Storage);
        assert_eq!(
            kind(IdentityError::TokenAlreadyIssued("GUID:x".into())),
            ErrorKind::Other
        );
        assert_eq!(kind(IdentityError::KeyGeneration("rng".into())), ErrorKind::Other);
    }

    #[test]
    fn codec_kinds() {
        assert_eq!(kind(CodecError::EmptyResponse), ErrorKind::EmptyResponse);
        assert_eq!(
            kind(CodecError::MalformedResponse("no root".into())),
            ErrorKind::MalformedResponse
        );
        assert_eq!(kind(CodecError::UnsignedBody), ErrorKind::MalformedResponse);
        assert_eq!(
            kind(CodecError::ServerRejected { status: 5, reason: None }),
            ErrorKind::Rejected
        );
        assert_eq!(
            kind(CodecError::MalformedEnvelope("no header".into())),
            ErrorKind::Other
        );
        assert_eq!(
            kind(CodecError::Render(mpclient_core::xml::XmlError::NoRoot)),
            ErrorKind::Other
        );
    }

    #[test]
    fn bad_body_signature_is_a_malformed_response() {
        assert_eq!(
            kind(CodecError::Signing(SigningError::InvalidSignature)),
            ErrorKind::MalformedResponse
        );
        assert_eq!(
            kind(CodecError::Signing(SigningError::Certificate(CertError::UnsupportedKey))),
            ErrorKind::MalformedResponse
        );
        assert_eq!(
            kind(CodecError::Signing(SigningError::BodyTooLarge(usize::MAX))),
            ErrorKind::Other
        );
    }

    #[test]
    fn transport_kinds() {
        assert_eq!(kind(TransportError::Build(reqwest_error())), ErrorKind::Transport);
        assert_eq!(
            kind(TransportError::Tls(rustls::Error::General("no provider".into()))),
            ErrorKind::Transport
        );
        assert_eq!(
            kind(TransportError::Connect { url: url(), source: reqwest_error() }),
            ErrorKind::Transport
        );
        assert_eq!(
            kind(TransportError::Request { url: url(), source: reqwest_error() }),
            ErrorKind::Transport
        );
        assert_eq!(
            kind(TransportError::Status { url: url(), status: 503 }),
            ErrorKind::Transport
        );
        assert_eq!(
            kind(TransportError::Body { url: url(), source: reqwest_error() }),
            ErrorKind::Transport
        );
        assert_eq!(
            kind(TransportError::Codec(CodecError::EmptyResponse)),
            ErrorKind::EmptyResponse
        );

        let relay = "host@".parse::<crate::transport::RelayTarget>().unwrap_err();
        assert_eq!(kind(relay), ErrorKind::InvalidArgumentCombination);
    }

    #[test]
    fn request_timeout_is_not_a_wait_timeout() {
        let err = ClientError::from(TransportError::Timeout { url: url(), source: reqwest_error() });
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_ne!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn secret_kinds() {
        assert_eq!(
            kind(SecretError::InsufficientPrivilege {
                required: Privileges::Administrator,
                actual: Privileges::Standard,
            }),
            ErrorKind::InsufficientPrivilege
        );
        assert_eq!(
            kind(SecretError::Elevation {
                tactic: ElevationTactic::TokenDuplication,
                cause: "no SYSTEM process".into(),
            }),
            ErrorKind::InsufficientPrivilege
        );
        assert_eq!(
            kind(SecretError::DecryptionFailed {
                name: "NetworkAccessPassword".into(),
                cause: "bad key".into(),
            }),
            ErrorKind::DecryptionFailed
        );
        assert_eq!(
            kind(SecretError::MalformedCredential("no separator".into())),
            ErrorKind::DecryptionFailed
        );
        assert_eq!(
            kind(SecretError::Release {
                tactic: ElevationTactic::AclRelaxation,
                cause: "access denied".into(),
            }),
            ErrorKind::Other
        );
        assert_eq!(kind(SecretError::Source("unreadable".into())), ErrorKind::Other);
    }

    #[test]
    fn remaining_kinds() {
        assert_eq!(
            kind(PolicyError::MalformedPolicy("no ID".into())),
            ErrorKind::MalformedResponse
        );
        assert_eq!(
            kind(QueryError::MissingProperty("ResourceID".into())),
            ErrorKind::Transport
        );
        assert_eq!(
            kind(WaitError::NoSnapshot {
                polls: 3,
                source: QueryError::Backend("unreachable".into()),
            }),
            ErrorKind::Transport
        );
        assert_eq!(kind(WaitError::Cancelled), ErrorKind::Other);
        assert_eq!(kind(ConfigError::Missing("site code")), ErrorKind::Config);
        assert_eq!(
            kind(StoreError::Io { path: PathBuf::from("/keys"), source: io_error() }),
            ErrorKind::Storage
        );
        assert_eq!(
            kind(OutputError::Io { path: PathBuf::from("/loot"), source: io_error() }),
            ErrorKind::Storage
        );
        assert_eq!(kind(LocalError::Unsupported { os: "linux" }), ErrorKind::Unsupported);
        assert_eq!(
            kind(LocalError::Read { path: PathBuf::from("OBJECTS.DATA"), source: io_error() }),
            ErrorKind::Storage
        );
        assert_eq!(kind(LocalError::MalformedSecret("not hex".into())), ErrorKind::Other);
        assert_eq!(
            ClientError::invalid_arguments("--certificate needs --client-id").kind(),
            ErrorKind::InvalidArgumentCombination
        );
    }

    #[test]
    fn resolver_errors_flatten() {
        let err = ClientError::from(ResolveError::Codec(CodecError::MalformedResponse("x".into())));
        assert!(matches!(err, ClientError::Codec(_)));
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }
}

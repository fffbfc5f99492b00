//! # mpclient core
//!
//! Message codec, policy parsing and secret recovery for management point
//! clients.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - Logging only through `tracing` events; no subscriber is installed here
//! - No OS-specific APIs
//!
//! Host facilities (data protection, privilege changes, local blob stores,
//! the site object-query interface) are traits. The transport, key store and
//! polling loop live in `mpclient-cli`.
//!
//! ## Modules
//!
//! - [`message`] - Request types and signed message construction
//! - [`codec`] - Envelope encoding and reply parsing
//! - [`policy`] - Assignment listing and secret extraction
//! - [`secrets`] - Decryption and scoped elevation
//! - [`query`] / [`membership`] - Object queries and collection convergence

pub mod codec;
pub mod membership;
pub mod message;
pub mod policy;
pub mod query;
pub mod secrets;
pub mod xml;

pub use codec::{
    decode_envelope, encode_envelope, encode_reply, parse_reply_status, parse_response,
    CodecError, DecodedEnvelope, ResponsePayload, ServerResponse,
};
pub use membership::{ExpectedChange, MembershipDiff, MembershipSnapshot, ResourceMatch, ResourceRecord};
pub use message::{
    build_message, Destination, MessageHeaders, MessageParams, MessageType, ProtocolMessage,
    ResourceKind,
};
pub use policy::{extract_secrets, list_assignments, AssignmentFlags, PolicyAssignment, PolicyError};
pub use query::{CollectionRef, ObjectQuery, QueryError, QuerySpec, Row};
pub use secrets::{
    BlobOutcome, DecryptedSecret, NetworkAccessCredential, ProtectionContext, SecretBlob,
    SecretDecryptor, SecretError, SecretOrigin,
};

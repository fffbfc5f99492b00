//! Client identity library for management point messaging.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Private key lookup for previously issued identities is injected through
//! [`identity::KeySource`].
//!
//! # Example
//!
//! ```
//! use mpclient_auth::identity::ClientIdentity;
//! use mpclient_auth::signing::verify_body;
//!
//! let identity = ClientIdentity::create().unwrap();
//! let body = b"<DiscoveryRecord/>";
//! let signature = identity.sign(body).unwrap();
//! assert!(verify_body(identity.certificate_der(), body, &signature).is_ok());
//! ```

pub mod cert;
pub mod error;
pub mod identity;
pub mod signing;

pub use cert::{key_fingerprint, CertError, ParsedCertificate};
pub use error::{IdentityError, SigningError};
pub use identity::{
    ClientIdentity, ClientToken, Fingerprint, KeyError, KeySource, PrivateKey, PublicKey,
    Signature, TokenOrigin,
};

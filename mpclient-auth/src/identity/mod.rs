//! Client identity: Ed25519 key pair, self-signed certificate and client token.
//!
//! - [`PrivateKey`] / [`PublicKey`] / [`Signature`] - Ed25519 primitives
//! - [`Fingerprint`] - SHA-256 of a public key, hex rendered
//! - [`ClientToken`] - the `GUID:{uuid}` identifier every message references
//! - [`ClientIdentity`] - the matched key + certificate + token triple
//!
//! # Example
//!
//! ```
//! use mpclient_auth::identity::{ClientIdentity, TokenOrigin};
//!
//! let identity = ClientIdentity::create().unwrap();
//! assert_eq!(identity.token_origin(), TokenOrigin::SelfChosen);
//! println!("client {} fingerprint {}", identity.token(), identity.fingerprint());
//! ```

mod client;
mod keys;
mod token;

pub use client::{ClientIdentity, KeySource};
pub use keys::{Fingerprint, KeyError, PrivateKey, PublicKey, Signature};
pub use token::{ClientToken, TokenOrigin};

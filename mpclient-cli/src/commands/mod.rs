//! CLI commands.
//!
//! Each command is a library function returning a serializable outcome;
//! `main.rs` only parses arguments and prints.

pub mod content_location;
pub mod discover;
pub mod identity;
pub mod policy;
pub mod register;
pub mod wait_member;

use mpclient_auth::{CertError, ClientIdentity, ClientToken, IdentityError};
use mpclient_core::Destination;

use crate::config::Settings;
use crate::error::ClientError;
use crate::store::KeyStore;
use crate::transport::Transport;

/// Settings and transport for one invocation.
#[derive(Debug)]
pub struct Session {
    pub settings: Settings,
    pub transport: Transport,
}

impl Session {
    /// # Errors
    ///
    /// `ClientError::Transport` if the HTTP client cannot be built.
    pub fn new(settings: Settings) -> Result<Self, ClientError> {
        let transport = Transport::new(&settings)?;
        Ok(Self {
            settings,
            transport,
        })
    }

    #[must_use]
    pub fn destination(&self) -> Destination {
        Destination::new(&self.settings.site_code, &self.settings.management_point)
    }
}

/// Identity flags shared by commands that talk to the management point.
#[derive(Debug, Clone, Default)]
pub struct IdentityArgs {
    /// Hex DER certificate of a previously registered identity.
    pub certificate: Option<String>,
    /// `GUID:..` token bound to `certificate`.
    pub client_id: Option<String>,
    /// Register a fresh identity under this client name.
    pub register: Option<String>,
}

/// How a command obtains its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityPlan {
    Existing { cert_der: Vec<u8>, token: ClientToken },
    Register { client_name: String },
    /// A fresh identity that is never registered.
    Ephemeral,
}

impl IdentityArgs {
    /// Validate the flag combination.
    ///
    /// `require_registered` refuses the ephemeral fallback.
    ///
    /// # Errors
    ///
    /// `InvalidArgumentCombination` for a certificate without a client id
    /// (or the reverse), both an existing identity and `--register`, or no
    /// identity source when one is required. A malformed certificate or token
    /// is an identity error.
    pub fn plan(&self, require_registered: bool) -> Result<IdentityPlan, ClientError> {
        match (&self.certificate, &self.client_id, &self.register) {
            (Some(_), None, _) => Err(ClientError::invalid_arguments(
                "--certificate requires --client-id",
            )),
            (None, Some(_), _) => Err(ClientError::invalid_arguments(
                "--client-id requires --certificate",
            )),
            (Some(_), Some(_), Some(_)) => Err(ClientError::invalid_arguments(
                "--register cannot be combined with --certificate/--client-id",
            )),
            (Some(cert_hex), Some(client_id), None) => {
                let cert_der = hex::decode(cert_hex.trim()).map_err(|e| {
                    IdentityError::InvalidCertificate(CertError::ParseError(format!(
                        "certificate is not hex: {e}"
                    )))
                })?;
                let token = ClientToken::parse(client_id)?;
                Ok(IdentityPlan::Existing { cert_der, token })
            }
            (None, None, Some(client_name)) => Ok(IdentityPlan::Register {
                client_name: client_name.clone(),
            }),
            (None, None, None) if require_registered => Err(ClientError::invalid_arguments(
                "use --register NAME or --certificate HEX --client-id TOKEN",
            )),
            (None, None, None) => Ok(IdentityPlan::Ephemeral),
        }
    }
}

/// Carry out an [`IdentityPlan`]. New identities are saved to `store`
/// before anything is sent.
///
/// # Errors
///
/// Identity, store, and (for registration) transport errors.
pub async fn acquire_identity(
    session: &Session,
    store: &KeyStore,
    plan: IdentityPlan,
) -> Result<ClientIdentity, ClientError> {
    match plan {
        IdentityPlan::Existing { cert_der, token } => {
            let identity = ClientIdentity::load(&cert_der, token, store)?;
            tracing::debug!(fingerprint = %identity.fingerprint(), "loaded identity");
            Ok(identity)
        }
        IdentityPlan::Register { client_name } => {
            let mut identity = identity::create_identity(store)?;
            let fqdn = default_fqdn(&client_name);
            register::register(session, &mut identity, &client_name, &fqdn).await?;
            Ok(identity)
        }
        IdentityPlan::Ephemeral => Ok(ClientIdentity::create()?),
    }
}

/// `name` if it already looks qualified, otherwise `name.local`.
#[must_use]
pub fn default_fqdn(client_name: &str) -> String {
    if client_name.contains('.') {
        client_name.to_string()
    } else {
        format!("{client_name}.local")
    }
}

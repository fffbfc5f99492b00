//! Decrypted secrets as reported to the operator.

use mpclient_core::{BlobOutcome, DecryptedSecret, NetworkAccessCredential, SecretOrigin};
use serde::Serialize;

/// Plaintext of one secret, in the most useful shape it parses as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretValue {
    /// A network access account blob of the form `username NUL password`.
    Credential { username: String, password: String },
    Text { value: String },
    Binary { hex: String },
}

impl SecretValue {
    fn from_secret(secret: &DecryptedSecret) -> Self {
        if secret.origin == SecretOrigin::NetworkAccessAccount {
            if let Ok(credential) = NetworkAccessCredential::from_plaintext(secret.plaintext()) {
                return Self::Credential {
                    username: credential.username.clone(),
                    password: credential.password.as_str().to_string(),
                };
            }
        }
        match secret.as_text() {
            Some(text) => Self::Text {
                value: text.trim_end_matches('\0').to_string(),
            },
            None => Self::Binary {
                hex: hex::encode(secret.plaintext()),
            },
        }
    }

    /// One-line rendering for table output.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Credential { username, password } => format!("{username} / {password}"),
            Self::Text { value } => value.clone(),
            Self::Binary { hex } => format!("0x{hex}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveredSecret {
    pub name: String,
    pub origin: SecretOrigin,
    #[serde(flatten)]
    pub value: SecretValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSecret {
    pub name: String,
    pub origin: SecretOrigin,
    pub error: String,
}

/// Outcome of a decryption batch, split into successes and failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Recovered {
    pub secrets: Vec<RecoveredSecret>,
    pub failures: Vec<FailedSecret>,
}

impl Recovered {
    #[must_use]
    pub fn from_outcomes(outcomes: Vec<BlobOutcome>) -> Self {
        let mut recovered = Self::default();
        for outcome in outcomes {
            match outcome.result {
                Ok(secret) => recovered.secrets.push(RecoveredSecret {
                    value: SecretValue::from_secret(&secret),
                    name: outcome.name,
                    origin: outcome.origin,
                }),
                Err(e) => {
                    tracing::warn!(name = %outcome.name, origin = %outcome.origin, error = %e, "secret not decrypted");
                    recovered.failures.push(FailedSecret {
                        error: format!("{:#}", anyhow::Error::new(e)),
                        name: outcome.name,
                        origin: outcome.origin,
                    });
                }
            }
        }
        recovered
    }
}

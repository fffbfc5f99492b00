//! Encrypted and decrypted secret material.

use std::fmt;

use serde::Serialize;
use zeroize::Zeroizing;

use super::SecretError;

/// Security context a blob was protected under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionContext {
    Machine,
    User,
}

/// Where a secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretOrigin {
    NetworkAccessAccount,
    TaskSequence,
    CollectionVariable,
}

impl SecretOrigin {
    /// Map a policy instance class to an origin. Other classes carry no secrets.
    #[must_use]
    pub fn from_class(class: &str) -> Option<Self> {
        match class {
            "NetworkAccessAccount" => Some(Self::NetworkAccessAccount),
            "TaskSequence" => Some(Self::TaskSequence),
            "CollectionVariable" => Some(Self::CollectionVariable),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NetworkAccessAccount => "network-access-account",
            Self::TaskSequence => "task-sequence",
            Self::CollectionVariable => "collection-variable",
        }
    }
}

impl fmt::Display for SecretOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A still-protected secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBlob {
    pub name: String,
    pub context: ProtectionContext,
    pub origin: SecretOrigin,
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for SecretBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBlob")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("origin", &self.origin)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Plaintext recovered from a [`SecretBlob`]. Wiped on drop.
pub struct DecryptedSecret {
    pub name: String,
    pub origin: SecretOrigin,
    plaintext: Zeroizing<Vec<u8>>,
}

impl DecryptedSecret {
    #[must_use]
    pub fn new(name: String, origin: SecretOrigin, plaintext: Zeroizing<Vec<u8>>) -> Self {
        Self {
            name,
            origin,
            plaintext,
        }
    }

    #[must_use]
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    /// Plaintext as UTF-8, if it is.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.plaintext).ok()
    }
}

impl fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedSecret")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Username and password of a network access account.
pub struct NetworkAccessCredential {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl NetworkAccessCredential {
    /// Split plaintext of the form `username NUL password`.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::MalformedCredential` if there is no separator,
    /// the username is empty, or either half is not UTF-8.
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, SecretError> {
        let split = plaintext
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| SecretError::MalformedCredential("no separator".to_string()))?;
        let (username, password) = (&plaintext[..split], &plaintext[split + 1..]);

        let username = std::str::from_utf8(username)
            .map_err(|_| SecretError::MalformedCredential("username is not UTF-8".to_string()))?;
        if username.is_empty() {
            return Err(SecretError::MalformedCredential("empty username".to_string()));
        }
        let password = std::str::from_utf8(password)
            .map_err(|_| SecretError::MalformedCredential("password is not UTF-8".to_string()))?;

        Ok(Self {
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
        })
    }
}

impl fmt::Debug for NetworkAccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkAccessCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

//! Client token type.

use uuid::Uuid;

use crate::error::IdentityError;

const TOKEN_PREFIX: &str = "GUID:";

/// Stable client identifier, rendered as `GUID:XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientToken(Uuid);

/// Who chose the token bound to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Generated locally for an unauthenticated registration.
    SelfChosen,
    /// Issued (or confirmed) by the management point; immutable from then on.
    ServerIssued,
}

impl ClientToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse `GUID:{uuid}`. The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidToken` for anything else.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let trimmed = s.trim();
        let rest = trimmed
            .get(..TOKEN_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(TOKEN_PREFIX))
            .map(|_| &trimmed[TOKEN_PREFIX.len()..])
            .ok_or_else(|| IdentityError::InvalidToken(s.to_string()))?;
        let uuid = Uuid::parse_str(rest).map_err(|_| IdentityError::InvalidToken(s.to_string()))?;
        Ok(Self(uuid))
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = Uuid::encode_buffer();
        write!(
            f,
            "{}{}",
            TOKEN_PREFIX,
            self.0.hyphenated().encode_upper(&mut buf)
        )
    }
}

impl std::str::FromStr for ClientToken {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_display_parse() {
        let token = ClientToken::generate();
        let text = token.to_string();
        assert!(text.starts_with("GUID:"));
        assert_eq!(text.len(), 5 + 36);
        assert_eq!(text[5..], text[5..].to_uppercase());
        assert_eq!(ClientToken::parse(&text).unwrap(), token);
        assert_eq!(ClientToken::parse(&text.to_lowercase()).unwrap(), token);
    }

    #[test]
    fn token_rejects_bare_uuid_and_garbage() {
        let bare = Uuid::new_v4().to_string();
        assert!(ClientToken::parse(&bare).is_err());
        assert!(ClientToken::parse("GUID:not-a-uuid").is_err());
        assert!(ClientToken::parse("").is_err());
        assert!(ClientToken::parse("GUI").is_err());
    }
}

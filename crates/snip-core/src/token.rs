use crate::error::CoreError;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Length of a generated token value.
pub const TOKEN_LENGTH: usize = 6;

/// Characters a token value is drawn from.
pub const TOKEN_ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// How long a token stays valid after it is issued or refreshed.
pub const DEFAULT_TOKEN_LIFETIME: SignedDuration = SignedDuration::from_hours(24);

/// Longest accepted token value.
pub const MAX_TOKEN_LENGTH: usize = 32;

/// The opaque short code of a shortened URL.
///
/// Token values contain only ASCII letters and are at most 32 characters long.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenValue(String);

impl TokenValue {
    /// Creates a new `TokenValue` after validating the input.
    pub fn new(value: impl Into<String>) -> std::result::Result<Self, CoreError> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Creates a `TokenValue` without validation.
    ///
    /// Use this only for values produced by trusted internal sources
    /// (generators and backends reading back what they stored).
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token value as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Renders the absolute short URL for this token under `base_url`.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }

    fn validate(value: &str) -> std::result::Result<(), CoreError> {
        if value.is_empty() || value.len() > MAX_TOKEN_LENGTH {
            return Err(CoreError::InvalidToken(format!(
                "length must be between 1 and {}, got {}",
                MAX_TOKEN_LENGTH,
                value.len()
            )));
        }

        if !value.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(CoreError::InvalidToken(format!(
                "must contain only ascii letters: '{}'",
                value
            )));
        }

        Ok(())
    }
}

impl Display for TokenValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TokenValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A shortened URL token with its expiration and soft-delete state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: TokenValue,
    /// The instant after which the token is stale.
    pub expire: Timestamp,
    /// Tombstone. Once set the token never resolves again.
    pub removed: bool,
}

impl Token {
    /// Issues a token that expires `lifetime` from now.
    pub fn new(value: impl Into<TokenValue>, lifetime: SignedDuration) -> Self {
        Self {
            value: value.into(),
            expire: Timestamp::now() + lifetime,
            removed: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expire < Timestamp::now()
    }

    /// Pushes the expiration to `lifetime` from now.
    pub fn refresh(&mut self, lifetime: SignedDuration) -> &mut Self {
        self.expire = Timestamp::now() + lifetime;
        self
    }

    pub fn remove(&mut self) {
        self.removed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_values() {
        assert!(TokenValue::new("abcXYZ").is_ok());
        assert!(TokenValue::new("a").is_ok());
        assert!(TokenValue::new("a".repeat(32)).is_ok());
    }

    #[test]
    fn empty_or_too_long() {
        assert!(TokenValue::new("").is_err());
        assert!(TokenValue::new("a".repeat(33)).is_err());
    }

    #[test]
    fn non_letters_rejected() {
        assert!(TokenValue::new("abc123").is_err());
        assert!(TokenValue::new("abc-def").is_err());
        assert!(TokenValue::new("abc/de").is_err());
    }

    #[test]
    fn to_url_joins_single_slash() {
        let value = TokenValue::new("qwErty").unwrap();
        assert_eq!(value.to_url("http://localhost:8080"), "http://localhost:8080/qwErty");
        assert_eq!(value.to_url("http://localhost:8080/"), "http://localhost:8080/qwErty");
    }

    #[test]
    fn new_token_is_live() {
        let token = Token::new(TokenValue::new_unchecked("abcdef"), DEFAULT_TOKEN_LIFETIME);
        assert!(!token.is_expired());
        assert!(!token.removed);
    }

    #[test]
    fn refresh_revives_expired_token() {
        let mut token = Token::new(
            TokenValue::new_unchecked("abcdef"),
            SignedDuration::from_secs(-60),
        );
        assert!(token.is_expired());

        token.refresh(DEFAULT_TOKEN_LIFETIME);
        assert!(!token.is_expired());
    }

    #[test]
    fn serializes_value_as_plain_string() {
        let token = Token::new(TokenValue::new_unchecked("abcdef"), DEFAULT_TOKEN_LIFETIME);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["value"], "abcdef");
        assert_eq!(json["removed"], false);
    }
}

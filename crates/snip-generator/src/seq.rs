use crate::Generator;
use snip_core::{GeneratorError, TokenValue, MAX_TOKEN_LENGTH, TOKEN_ALPHABET, TOKEN_LENGTH};
use std::sync::atomic::{AtomicU64, Ordering};

/// A token generator using a sequential counter.
///
/// Produces values like "aaaaaa", "aaaaab", ... by writing the counter in
/// base 52 over the token alphabet after an optional letter prefix. Values
/// are unique within a single instance, which makes it handy for tests and
/// single-node setups that want predictable tokens.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
    width: usize,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
            width: self.width,
        }
    }
}

impl SeqGenerator {
    /// Creates a generator whose values start with `prefix`.
    ///
    /// The counter fills the rest of a [`TOKEN_LENGTH`] value, or at least
    /// one character if the prefix is already that long. The prefix must be
    /// ASCII letters and leave room for at least one counter character.
    pub fn with_prefix(prefix: impl Into<String>) -> Result<Self, GeneratorError> {
        Self::with_offset(prefix, 0)
    }

    /// Creates a generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Result<Self, GeneratorError> {
        let prefix = prefix.into();
        if !prefix.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(GeneratorError::InvalidConfig(format!(
                "prefix must contain only ascii letters: '{}'",
                prefix
            )));
        }
        if prefix.len() >= MAX_TOKEN_LENGTH {
            return Err(GeneratorError::InvalidConfig(format!(
                "prefix must be shorter than {} characters, got {}",
                MAX_TOKEN_LENGTH,
                prefix.len()
            )));
        }

        let width = TOKEN_LENGTH.saturating_sub(prefix.len()).max(1);
        Ok(Self {
            counter: AtomicU64::new(offset),
            prefix,
            width,
        })
    }

    fn encode(&self, mut count: u64) -> String {
        let base = TOKEN_ALPHABET.len() as u64;
        let mut digits = Vec::with_capacity(self.width);
        loop {
            digits.push(TOKEN_ALPHABET[(count % base) as usize]);
            count /= base;
            if count == 0 {
                break;
            }
        }
        while digits.len() < self.width {
            digits.push(TOKEN_ALPHABET[0]);
        }
        digits.reverse();

        let mut out = String::with_capacity(self.prefix.len() + digits.len());
        out.push_str(&self.prefix);
        out.extend(digits.into_iter().map(char::from));
        out
    }
}

impl Generator for SeqGenerator {
    type Output = TokenValue;

    fn generate(&self) -> Result<TokenValue, GeneratorError> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        // A long prefix plus a large counter can outgrow the token limit.
        TokenValue::new(self.encode(count))
            .map_err(|e| GeneratorError::InvalidOutput(e.to_string()))
    }
}

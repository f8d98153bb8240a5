use crate::Generator;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use snip_core::{GeneratorError, TokenValue, MAX_TOKEN_LENGTH, TOKEN_ALPHABET, TOKEN_LENGTH};

// Largest multiple of the alphabet size that fits in a byte. Bytes at or
// above it are discarded so every letter is equally likely.
const ACCEPT_BELOW: u8 = (256 / TOKEN_ALPHABET.len() * TOKEN_ALPHABET.len()) as u8;

/// Draws fixed-length token values uniformly from the letter alphabet.
///
/// Backed by the operating system's entropy source unless another
/// [`RngCore`] is supplied with [`RandomGenerator::with_rng`].
#[derive(Debug)]
pub struct RandomGenerator<R = OsRng> {
    rng: Mutex<R>,
    length: usize,
}

impl RandomGenerator<OsRng> {
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }
}

impl Default for RandomGenerator<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> RandomGenerator<R> {
    /// Creates a generator that reads from `rng`.
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
            length: TOKEN_LENGTH,
        }
    }

    /// Overrides the token length, which must be between 1 and
    /// [`MAX_TOKEN_LENGTH`].
    pub fn with_length(mut self, length: usize) -> Result<Self, GeneratorError> {
        if !(1..=MAX_TOKEN_LENGTH).contains(&length) {
            return Err(GeneratorError::InvalidConfig(format!(
                "length must be between 1 and {}, got {}",
                MAX_TOKEN_LENGTH, length
            )));
        }
        self.length = length;
        Ok(self)
    }

    fn random_string(&self) -> Result<String, GeneratorError> {
        let mut out = String::with_capacity(self.length);
        let mut buf = [0u8; 16];
        let mut rng = self.rng.lock();

        while out.len() < self.length {
            rng.try_fill_bytes(&mut buf)
                .map_err(|e| GeneratorError::Entropy(e.to_string()))?;

            for byte in buf.iter().copied().filter(|b| *b < ACCEPT_BELOW) {
                if out.len() == self.length {
                    break;
                }
                let idx = usize::from(byte) % TOKEN_ALPHABET.len();
                out.push(char::from(TOKEN_ALPHABET[idx]));
            }
        }

        Ok(out)
    }
}

impl<R: RngCore + Send + 'static> Generator for RandomGenerator<R> {
    type Output = TokenValue;

    fn generate(&self) -> Result<TokenValue, GeneratorError> {
        self.random_string().map(TokenValue::new_unchecked)
    }
}

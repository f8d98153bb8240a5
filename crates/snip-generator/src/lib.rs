pub mod random;
pub mod seq;

pub use random::RandomGenerator;
pub use seq::SeqGenerator;

use snip_core::{GeneratorError, TokenValue};

/// Trait for generating token values.
///
/// Implementations are pure generators that don't interact with storage,
/// so uniqueness against stored tokens is checked by the caller.
pub trait Generator: Send + Sync + 'static {
    type Output: Into<TokenValue>;

    /// Produces a fresh token value.
    ///
    /// Fails only when the underlying source cannot produce output.
    fn generate(&self) -> Result<Self::Output, GeneratorError>;
}

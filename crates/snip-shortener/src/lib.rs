//! The snip application core.
//!
//! [`ShortenerService`] implements the transport-facing
//! [`Shortener`](snip_core::Shortener) contract on top of any storage backend
//! and token generator: URL deduplication, refresh of expired tokens, owner
//! listings with absolute short URLs and fire-and-forget removal.

pub mod config;
pub mod service;

pub use config::{ShortenerArgs, ShortenerConfig};
pub use service::ShortenerService;
pub use snip_core::{
    BatchShortened, ShortenStatus, Shortened, Shortener, ShortenerError, Stats,
};

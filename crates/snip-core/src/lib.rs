//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the token value object, the storage contract every
//! backend implements, and the application contract transports call.

pub mod error;
pub mod shortener;
pub mod storage;
pub mod token;

pub use error::{CoreError, GeneratorError, ShortenerError, StorageError};
pub use shortener::{BatchShortened, ShortenStatus, Shortened, Shortener, Stats};
pub use storage::{Association, ReadStorage, Storage, UrlPair};
pub use token::{
    Token, TokenValue, DEFAULT_TOKEN_LIFETIME, MAX_TOKEN_LENGTH, TOKEN_ALPHABET, TOKEN_LENGTH,
};

//! Disposable on-disk fixtures for integration tests.

mod error;
mod store;

pub use error::{Result, TestInfraError};
pub use store::{StoreConfig, TempStore};

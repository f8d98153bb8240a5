//! Storage backends for the snip URL shortener.
//!
//! Three interchangeable implementations of the [`Storage`] contract:
//! [`InMemoryStorage`], [`FileStorage`] and [`SqlStorage`]. A process picks
//! one at startup with [`open_storage`].

pub mod config;
pub mod file;
pub mod memory;
pub mod sql;

pub use config::{open_storage, StorageArgs, StorageBackendArg};
pub use file::FileStorage;
pub use memory::InMemoryStorage;
pub use snip_core::{ReadStorage, Storage, StorageError};
pub use sql::{SqlStorage, SqlStorageOptions};

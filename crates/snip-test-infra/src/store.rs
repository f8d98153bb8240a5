use crate::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use typed_builder::TypedBuilder;

#[derive(Debug, TypedBuilder)]
pub struct StoreConfig {
    #[builder(default = "snapshot.json".to_string())]
    snapshot_file: String,
    #[builder(default = "snip.db".to_string())]
    database_file: String,
}

/// A temporary directory holding a snapshot file and a SQLite database.
///
/// Everything is deleted when the fixture is dropped, so keep it alive for
/// as long as the storage under test.
#[derive(Debug)]
pub struct TempStore {
    dir: TempDir,
    config: StoreConfig,
}

impl TempStore {
    /// Creates a fixture with the default file names.
    pub fn new() -> Result<Self> {
        Self::with_config(StoreConfig::builder().build())
    }

    pub fn with_config(config: StoreConfig) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("snip-").tempdir()?;
        Ok(Self { dir, config })
    }

    /// Location for a file storage snapshot. The file is not created.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.path().join(&self.config.snapshot_file)
    }

    /// DSN of a SQLite database inside the fixture directory.
    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.dir.path().join(&self.config.database_file).display()
        )
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

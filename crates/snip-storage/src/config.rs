use crate::{FileStorage, InMemoryStorage, SqlStorage};
use clap::{Args, ValueEnum};
use snip_core::storage::Result;
use snip_core::{Storage, StorageError};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "file")]
    File,
    #[value(name = "sql")]
    Sql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Sql => write!(f, "sql"),
        }
    }
}

/// Backend selection, meant to be flattened into a binary's CLI.
#[derive(Debug, Clone, Args)]
pub struct StorageArgs {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, required_if_eq("storage", "file"))]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "sql"))]
    pub database_dsn: Option<String>,
}

/// Builds the one backend the process will use.
pub async fn open_storage(args: &StorageArgs) -> Result<Arc<dyn Storage>> {
    info!(storage_backend = %args.storage, "opening storage");

    let storage: Arc<dyn Storage> = match args.storage {
        StorageBackendArg::InMemory => Arc::new(InMemoryStorage::new()),
        StorageBackendArg::File => {
            let path = args.file_storage_path.clone().ok_or_else(|| {
                StorageError::Configuration("file storage path is required".to_string())
            })?;
            Arc::new(FileStorage::open(path).await?)
        }
        StorageBackendArg::Sql => {
            let dsn = args.database_dsn.as_deref().ok_or_else(|| {
                StorageError::Configuration("database dsn is required".to_string())
            })?;
            Arc::new(SqlStorage::connect(dsn).await?)
        }
    };

    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use snip_core::ReadStorage;
    use snip_test_infra::TempStore;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        storage: StorageArgs,
    }

    #[test]
    fn defaults_to_in_memory() {
        let cli = Cli::try_parse_from(["snip"]).unwrap();
        assert_eq!(cli.storage.storage, StorageBackendArg::InMemory);
    }

    #[test]
    fn file_backend_requires_path() {
        assert!(Cli::try_parse_from(["snip", "--storage", "file"]).is_err());

        let cli = Cli::try_parse_from([
            "snip",
            "--storage",
            "file",
            "--file-storage-path",
            "/tmp/links.json",
        ])
        .unwrap();
        assert_eq!(
            cli.storage.file_storage_path,
            Some(PathBuf::from("/tmp/links.json"))
        );
    }

    #[test]
    fn sql_backend_requires_dsn() {
        assert!(Cli::try_parse_from(["snip", "--storage", "sql"]).is_err());
    }

    #[tokio::test]
    async fn opens_each_backend() {
        let store = TempStore::new().unwrap();
        let cases = [
            StorageArgs {
                storage: StorageBackendArg::InMemory,
                file_storage_path: None,
                database_dsn: None,
            },
            StorageArgs {
                storage: StorageBackendArg::File,
                file_storage_path: Some(store.snapshot_path()),
                database_dsn: None,
            },
            StorageArgs {
                storage: StorageBackendArg::Sql,
                file_storage_path: None,
                database_dsn: Some(store.sqlite_dsn()),
            },
        ];

        for args in &cases {
            let storage = open_storage(args).await.unwrap();
            storage.ping().await.unwrap();
            assert_eq!(storage.count_urls().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn missing_path_is_a_configuration_error() {
        let args = StorageArgs {
            storage: StorageBackendArg::File,
            file_storage_path: None,
            database_dsn: None,
        };

        let err = open_storage(&args).await.err().unwrap();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn missing_dsn_is_a_configuration_error() {
        let args = StorageArgs {
            storage: StorageBackendArg::Sql,
            file_storage_path: None,
            database_dsn: None,
        };

        let err = open_storage(&args).await.err().unwrap();
        assert!(matches!(err, StorageError::Configuration(_)));
    }
}

use crate::{FileStore, MemoryStore, PostgresStore};
use snip_core::error::Result;
use snip_core::EntryStore;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use typed_builder::TypedBuilder;

/// Which backend a process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
    Postgres,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::File => write!(f, "file"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Storage settings resolved at process start.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct StorageConfig {
    /// PostgreSQL connection string.
    #[builder(default, setter(strip_option, into))]
    pub database_dsn: Option<String>,
    /// Path of the JSON-lines log.
    #[builder(default, setter(strip_option, into))]
    pub file_storage_path: Option<PathBuf>,
}

impl StorageConfig {
    /// A database DSN wins over a file path; with neither, entries live in memory.
    /// Empty values count as unset.
    pub fn backend(&self) -> BackendKind {
        if self.database_dsn.as_deref().is_some_and(|dsn| !dsn.is_empty()) {
            BackendKind::Postgres
        } else if self
            .file_storage_path
            .as_ref()
            .is_some_and(|path| !path.as_os_str().is_empty())
        {
            BackendKind::File
        } else {
            BackendKind::Memory
        }
    }
}

/// Opens the one backend selected by `config`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn EntryStore>> {
    let backend = config.backend();
    info!(backend = %backend, "opening entry store");

    let store: Arc<dyn EntryStore> = match backend {
        BackendKind::Postgres => {
            let dsn = config.database_dsn.as_deref().unwrap_or_default();
            Arc::new(PostgresStore::connect(dsn).await?)
        }
        BackendKind::File => {
            let path = config.file_storage_path.clone().unwrap_or_default();
            Arc::new(FileStore::open(path).await?)
        }
        BackendKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

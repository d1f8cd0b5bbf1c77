use std::sync::Arc;

// Re-export core storage types so callers can use crate::storage::*
pub use ledgerbook_core::storage::{LedgerTxn, StorageBackend, StorageError};
pub use ledgerbook_memory::InMemoryStorage;
pub use ledgerbook_postgres::PostgresStorage;

use crate::config::{StorageConfig, StorageKind};

/// Opens the configured backend, running migrations when `auto_migrate` is set.
///
/// The Postgres client is blocking; call this outside of an async context.
pub fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let storage: Arc<dyn StorageBackend> = match config.backend {
        StorageKind::Memory => {
            tracing::info!("Using in-memory storage");
            Arc::new(InMemoryStorage::new())
        }
        StorageKind::Postgres => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| StorageError::Other("storage.url is required for the postgres backend".to_string()))?;
            tracing::info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::connect(url)?)
        }
    };

    if config.auto_migrate {
        storage.migrate()?;
    }

    Ok(storage)
}

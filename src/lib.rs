pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod policy;
pub mod schema;
pub mod service;
pub mod session;
pub mod store;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{StorageBackend, StorageSettings};
use crate::store::{MemoryStore, PgStore, Store};

/// Open the configured store.
pub fn build_store(settings: &StorageSettings) -> Result<Arc<dyn Store>> {
    match settings.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Postgres => {
            let url = settings
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let store = PgStore::connect(url, settings.pool_size).context("Failed to connect to Postgres")?;
            Ok(Arc::new(store))
        }
    }
}

//! Session store contract
//!
//! Every backend persists complete session snapshots behind the same
//! interface, so switching backends never changes observable session
//! content.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StoreBackend};
use crate::database::SessionRepository;
use crate::models::{Session, SessionFilter, SessionSummary};
use crate::utils::errors::StoreResult;

use super::file_store::FileSessionStore;

/// Durable persistence for session snapshots
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend identifier used in logs and stats
    fn backend_name(&self) -> &'static str;

    /// Upsert the full snapshot; readers never observe a partial write
    async fn save(&self, session: &Session) -> StoreResult<()>;

    /// Load a snapshot by id
    async fn load(&self, id: &str) -> StoreResult<Option<Session>>;

    /// Delete a snapshot; returns whether anything was removed
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Summaries matching `filter`, newest first, without decoding contexts
    async fn query(&self, filter: &SessionFilter) -> StoreResult<Vec<SessionSummary>>;
}

/// Open the backend selected by configuration
pub async fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.backend {
        StoreBackend::File => Arc::new(FileSessionStore::open(&config.path).await?),
        StoreBackend::Sqlite => Arc::new(SessionRepository::open(&config.path, config.max_connections).await?),
    };
    info!(backend = store.backend_name(), path = %config.path, "Session store opened");
    Ok(store)
}

/// Copy every snapshot from `source` into `target`, returning how many were copied
pub async fn copy_sessions(source: &dyn SessionStore, target: &dyn SessionStore) -> StoreResult<usize> {
    let summaries = source.query(&SessionFilter::default()).await?;
    let mut copied = 0;

    for summary in summaries {
        if let Some(session) = source.load(&summary.id).await? {
            target.save(&session).await?;
            copied += 1;
        }
    }

    info!(
        from = source.backend_name(),
        to = target.backend_name(),
        copied = copied,
        "Copied sessions between stores"
    );
    Ok(copied)
}

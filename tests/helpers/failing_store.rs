//! Store wrapper whose saves can be made to fail on demand

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use ProvisionFlow::models::{Session, SessionFilter, SessionSummary};
use ProvisionFlow::state::SessionStore;
use ProvisionFlow::utils::errors::{PersistenceError, StoreResult};

/// Delegates to a real store until `fail_saves(true)` is set
pub struct FailingStore {
    inner: Arc<dyn SessionStore>,
    failing: AtomicBool,
    rejected: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn SessionStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of saves refused so far
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for FailingStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn save(&self, session: &Session) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(session).await
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Session>> {
        self.inner.load(id).await
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete(id).await
    }

    async fn query(&self, filter: &SessionFilter) -> StoreResult<Vec<SessionSummary>> {
        self.inner.query(filter).await
    }
}

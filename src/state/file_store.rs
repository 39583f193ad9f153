//! Flat-file session store
//!
//! One pretty-printed JSON document per session plus an `index.json` of
//! summaries used for listing. Documents and the index are written to a
//! temporary file, synced and renamed into place, so a reader only ever sees
//! a complete previous or complete new version.
//!
//! A crash can land between the document rename and the index rewrite, so the
//! documents are authoritative: `open` re-derives every summary from them and
//! rewrites the index when it disagrees.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{Session, SessionFilter, SessionSummary};
use crate::utils::errors::{PersistenceError, StoreResult};
use crate::utils::logging::log_store_operation;

use super::storage::SessionStore;

const INDEX_FILE: &str = "index.json";

/// Document-per-session store rooted at a directory
#[derive(Debug)]
pub struct FileSessionStore {
    root: PathBuf,
    /// In-memory mirror of `index.json`; the lock also serialises writers
    index: Mutex<BTreeMap<String, SessionSummary>>,
}

impl FileSessionStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// The summary index is reconciled with the session documents; a missing,
    /// unreadable or stale `index.json` is rewritten.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let scanned = scan_documents(&root).await?;
        let stale = match read_index(&root.join(INDEX_FILE)).await {
            Ok(Some(persisted)) if persisted == scanned => false,
            Ok(Some(persisted)) => {
                warn!(
                    path = %root.display(),
                    indexed = persisted.len(),
                    documents = scanned.len(),
                    "Session index out of date, rebuilding"
                );
                true
            }
            Ok(None) => true,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "Session index unreadable, rebuilding");
                true
            }
        };

        let store = Self {
            root,
            index: Mutex::new(scanned),
        };
        {
            let index = store.index.lock().await;
            if stale {
                store.write_index(&index).await?;
            }
            info!(path = %store.root.display(), sessions = index.len(), "File session store initialized");
        }
        Ok(store)
    }

    /// Rebuild the summary index from the documents on disk
    pub async fn rebuild_index(&self) -> StoreResult<usize> {
        let mut index = self.index.lock().await;
        *index = scan_documents(&self.root).await?;
        self.write_index(&index).await?;
        info!(sessions = index.len(), "Session index rebuilt");
        Ok(index.len())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, id: &str) -> StoreResult<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(format!("{}.json", id)))
    }

    async fn write_index(&self, index: &BTreeMap<String, SessionSummary>) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root.join(INDEX_FILE), &data).await
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, session: &Session) -> StoreResult<()> {
        let started = Instant::now();
        let path = self.document_path(&session.id)?;
        let data = serde_json::to_vec_pretty(session)?;

        let mut index = self.index.lock().await;
        let result = async {
            write_atomic(&path, &data).await?;
            index.insert(session.id.clone(), session.summary());
            self.write_index(&index).await
        }
        .await;

        log_store_operation(
            self.backend_name(),
            "save",
            Some(&session.id),
            started.elapsed().as_millis() as u64,
            result.is_ok(),
        );
        result
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Session>> {
        let path = self.document_path(id)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(session_id = id, "No session document found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let session: Session = serde_json::from_slice(&data)?;
        if session.id != id {
            return Err(PersistenceError::Corrupt(format!(
                "document {} contains session {}",
                path.display(),
                session.id
            )));
        }
        Ok(Some(session))
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let path = self.document_path(id)?;
        let mut index = self.index.lock().await;

        let existed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if index.remove(id).is_some() || existed {
            self.write_index(&index).await?;
            debug!(session_id = id, "Deleted session document");
            return Ok(true);
        }
        Ok(false)
    }

    async fn query(&self, filter: &SessionFilter) -> StoreResult<Vec<SessionSummary>> {
        let index = self.index.lock().await;
        Ok(filter.apply(index.values().cloned()))
    }
}

/// Session ids become file names, so only plain identifiers are accepted
fn validate_id(id: &str) -> StoreResult<()> {
    let valid = !id.is_empty()
        && id != INDEX_FILE.trim_end_matches(".json")
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::Corrupt(format!("invalid session id: {:?}", id)))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| PersistenceError::Corrupt(format!("path has no file name: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn read_index(path: &Path) -> StoreResult<Option<BTreeMap<String, SessionSummary>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn scan_documents(root: &Path) -> StoreResult<BTreeMap<String, SessionSummary>> {
    let mut index = BTreeMap::new();
    let mut entries = fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == INDEX_FILE || name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }

        // summary fields only; contexts and history are skipped by the decoder
        let data = fs::read(&path).await?;
        match serde_json::from_slice::<SessionSummary>(&data) {
            Ok(summary) => {
                index.insert(summary.id.clone(), summary);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable session document");
            }
        }
    }

    Ok(index)
}

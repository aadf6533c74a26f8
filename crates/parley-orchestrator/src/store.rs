//! Session persistence.
//!
//! The [`SessionStore`] trait is the session manager's only shared mutable
//! resource. [`MemoryStore`] keeps sessions in a map; [`FileStore`] writes
//! one JSON document per session, replacing it atomically on every save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ParleyError, Result};
use crate::session::Session;

/// Durable storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the session id is already taken or the write
    /// fails.
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Replaces a stored session.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Loads a session by id. Unknown ids yield `Ok(None)`.
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Every session owned by `candidate_id`, in no particular order.
    async fn list_for_candidate(&self, candidate_id: &str) -> Result<Vec<Session>>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(ParleyError::persistence(format!(
                "session '{}' already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list_for_candidate(&self, candidate_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.candidate_id == candidate_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// Directory of `<session-id>.json` documents.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the store directory.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ParleyError::persistence(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// The store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a session document. Ids that are not UUIDs have no path,
    /// which keeps request-supplied ids from escaping the directory.
    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        Uuid::parse_str(session_id)
            .ok()
            .map(|id| self.dir.join(format!("{id}.json")))
    }

    async fn write_atomic(&self, path: &Path, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(session)?;
        let temp_path = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));

        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ParleyError::persistence(format!(
                "failed to write {}: {e}",
                path.display()
            )));
        }

        debug!(session_id = %session.id, path = %path.display(), "Session saved");
        Ok(())
    }

    async fn read(path: &Path) -> Result<Option<Session>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                ParleyError::persistence(format!("corrupt session file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ParleyError::persistence(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let path = self
            .path_for(&session.id)
            .ok_or_else(|| ParleyError::persistence("session id is not a UUID"))?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ParleyError::persistence(format!(
                "session '{}' already exists",
                session.id
            )));
        }
        self.write_atomic(&path, session).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let path = self
            .path_for(&session.id)
            .ok_or_else(|| ParleyError::persistence("session id is not a UUID"))?;
        self.write_atomic(&path, session).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        match self.path_for(session_id) {
            Some(path) => Self::read(&path).await,
            None => Ok(None),
        }
    }

    async fn list_for_candidate(&self, candidate_id: &str) -> Result<Vec<Session>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            ParleyError::persistence(format!("cannot list {}: {e}", self.dir.display()))
        })?;

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ParleyError::persistence(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(session)) if session.candidate_id == candidate_id => sessions.push(session),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable session file"),
            }
        }
        Ok(sessions)
    }
}

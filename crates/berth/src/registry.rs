use crate::admission::AdmissionController;
use berth_core::{Error, Result, Session, StateStore, epoch_millis};
use std::sync::Arc;
use tracing::warn;

pub(crate) const ACTIVE_SET_KEY: &str = "sessions:active";

fn record_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// CRUD over session records; the single consistent view of active sessions.
///
/// The registry is the sole owner of session identity. Inserts write the
/// record before adding the id to the active set; the list read path checks
/// membership first, so a record orphaned between the two deletions is
/// invisible rather than fatal.
pub struct SessionRegistry {
    store: Arc<dyn StateStore>,
    admission: Arc<AdmissionController>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn StateStore>, admission: Arc<AdmissionController>) -> Self {
        Self { store, admission }
    }

    /// Persists a session. Only the provisioner calls this, and only after a
    /// capacity slot was granted.
    pub async fn put(&self, session: &Session) -> Result<()> {
        let record = serde_json::to_string(session)
            .map_err(|e| Error::MalformedRecord(e.to_string()))?;
        self.store
            .set(&record_key(&session.session_id), &record)
            .await?;
        self.store
            .set_add(ACTIVE_SET_KEY, &session.session_id)
            .await?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        match self.store.get(&record_key(session_id)).await? {
            Some(record) => {
                let session = serde_json::from_str(&record)
                    .map_err(|e| Error::MalformedRecord(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Advances `last_active` to now. A missing session is a no-op: it may
    /// have been evicted between the caller's read and this write.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        if let Some(mut session) = self.get(session_id).await? {
            session.last_active = epoch_millis();
            let record = serde_json::to_string(&session)
                .map_err(|e| Error::MalformedRecord(e.to_string()))?;
            self.store
                .set(&record_key(session_id), &record)
                .await?;
        }
        Ok(())
    }

    /// Deregisters a session and releases its capacity slot.
    ///
    /// Idempotent: three independent triggers (explicit API delete, the
    /// sandbox's self-exit watcher, the eviction sweep) may race to delete
    /// the same session. The atomic set-removal picks exactly one winner;
    /// the losers return `Ok` without touching anything.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        if !self.store.set_remove(ACTIVE_SET_KEY, session_id).await? {
            return Ok(());
        }
        // The slot must be released even when the record delete fails: an
        // orphaned record is recoverable, a leaked slot is not.
        let record_deleted = self.store.delete(&record_key(session_id)).await;
        self.admission.release().await?;
        record_deleted
    }

    /// All active sessions, fetched in one batched read.
    ///
    /// Ids whose record vanished between the membership read and the fetch
    /// (a race with a concurrent delete) are dropped from the result, as are
    /// records that fail to decode.
    pub async fn list_all(&self) -> Result<Vec<Session>> {
        let ids = self.store.set_members(ACTIVE_SET_KEY).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| record_key(id)).collect();
        let records = self.store.multi_get(&keys).await?;

        let mut sessions = Vec::with_capacity(records.len());
        for (id, record) in ids.iter().zip(records) {
            let Some(record) = record else { continue };
            match serde_json::from_str::<Session>(&record) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "dropping malformed session record");
                }
            }
        }
        Ok(sessions)
    }
}

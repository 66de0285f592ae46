use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use multiview_proto::{SessionCode, SessionRecord, StatePatch, ViewState};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{DirectoryError, DirectoryResult, SessionDirectory, DEFAULT_SESSION_TTL};

struct Entry {
    record: SessionRecord,
    expires_at: Instant,
}

/// In-process directory with sliding expiry. Used by tests, local demos and
/// the relay's memory backend.
pub struct MemoryDirectory {
    records: Mutex<HashMap<SessionCode, Entry>>,
    ttl: Duration,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops expired records and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.records.lock().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        before - guard.len()
    }

    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        self.records
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

#[async_trait]
impl SessionDirectory for MemoryDirectory {
    async fn insert(&self, code: SessionCode, state: ViewState) -> DirectoryResult<SessionRecord> {
        let now = Instant::now();
        let mut guard = self.records.lock().await;
        if guard.get(&code).is_some_and(|entry| entry.expires_at > now) {
            return Err(DirectoryError::Conflict(code));
        }
        let record = SessionRecord::new(code, state);
        guard.insert(
            code,
            Entry {
                record: record.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(record)
    }

    async fn get(&self, code: SessionCode) -> DirectoryResult<SessionRecord> {
        let now = Instant::now();
        let mut guard = self.records.lock().await;
        match guard.get(&code) {
            Some(entry) if entry.expires_at > now => Ok(entry.record.clone()),
            Some(_) => {
                guard.remove(&code);
                Err(DirectoryError::NotFound(code))
            }
            None => Err(DirectoryError::NotFound(code)),
        }
    }

    async fn replace(&self, code: SessionCode, patch: StatePatch) -> DirectoryResult<SessionRecord> {
        let now = Instant::now();
        let mut guard = self.records.lock().await;
        let entry = guard
            .get_mut(&code)
            .filter(|entry| entry.expires_at > now)
            .ok_or(DirectoryError::NotFound(code))?;
        patch.apply_to(&mut entry.record.state);
        entry.record.touch();
        entry.expires_at = now + self.ttl;
        Ok(entry.record.clone())
    }

    async fn delete(&self, code: SessionCode) -> DirectoryResult<()> {
        self.records.lock().await.remove(&code);
        Ok(())
    }
}

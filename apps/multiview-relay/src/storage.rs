use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use multiview_proto::{SessionCode, SessionRecord, StatePatch, ViewState};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use session_directory::{DirectoryError, DirectoryResult, MemoryDirectory, SessionDirectory};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{Config, DirectoryBackend};

/// Session directory backed by Redis string keys with `EX` expiry.
#[derive(Clone)]
pub struct RedisDirectory {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisDirectory {
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self { redis, ttl_seconds })
    }

    fn key(code: SessionCode) -> String {
        format!("multiview:session:{}", code)
    }

    fn encode(record: &SessionRecord) -> DirectoryResult<String> {
        serde_json::to_string(record).map_err(|e| DirectoryError::Backend(e.to_string()))
    }

    async fn load(&self, code: SessionCode) -> DirectoryResult<SessionRecord> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(Self::key(code)).await.map_err(backend)?;
        match value {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| DirectoryError::Backend(e.to_string()))
            }
            None => Err(DirectoryError::NotFound(code)),
        }
    }
}

fn backend(err: redis::RedisError) -> DirectoryError {
    DirectoryError::Backend(err.to_string())
}

#[async_trait]
impl SessionDirectory for RedisDirectory {
    async fn insert(&self, code: SessionCode, state: ViewState) -> DirectoryResult<SessionRecord> {
        let record = SessionRecord::new(code, state);
        let value = Self::encode(&record)?;
        let mut conn = self.redis.clone();
        // NX makes the collision check and the write one step.
        let stored: Option<String> = redis::cmd("SET")
            .arg(Self::key(code))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        match stored {
            Some(_) => Ok(record),
            None => Err(DirectoryError::Conflict(code)),
        }
    }

    async fn get(&self, code: SessionCode) -> DirectoryResult<SessionRecord> {
        self.load(code).await
    }

    async fn is_live(&self, code: SessionCode) -> DirectoryResult<bool> {
        let mut conn = self.redis.clone();
        conn.exists(Self::key(code)).await.map_err(backend)
    }

    async fn replace(&self, code: SessionCode, patch: StatePatch) -> DirectoryResult<SessionRecord> {
        let mut record = self.load(code).await?;
        patch.apply_to(&mut record.state);
        record.touch();
        let value = Self::encode(&record)?;
        let mut conn = self.redis.clone();
        // XX keeps a record deleted in the meantime from coming back.
        let stored: Option<String> = redis::cmd("SET")
            .arg(Self::key(code))
            .arg(value)
            .arg("XX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        match stored {
            Some(_) => Ok(record),
            None => Err(DirectoryError::NotFound(code)),
        }
    }

    async fn delete(&self, code: SessionCode) -> DirectoryResult<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::key(code)).await.map_err(backend)
    }
}

/// The configured directory, plus the expiry sweeper the memory backend
/// needs.
pub async fn build_directory(
    config: &Config,
) -> Result<(Arc<dyn SessionDirectory>, Option<JoinHandle<()>>)> {
    match config.directory_backend {
        DirectoryBackend::Redis => {
            info!(redis_url = %config.redis_url, "using redis session directory");
            let directory = RedisDirectory::new(&config.redis_url, config.session_ttl_seconds).await?;
            Ok((Arc::new(directory), None))
        }
        DirectoryBackend::Memory => {
            info!("using in-memory session directory");
            let directory = MemoryDirectory::with_ttl(config.session_ttl());
            let sweeper = spawn_memory_sweeper(directory.clone(), Duration::from_secs(60));
            Ok((directory, Some(sweeper)))
        }
    }
}

pub fn spawn_memory_sweeper(directory: Arc<MemoryDirectory>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = directory.purge_expired().await;
            if purged > 0 {
                debug!(purged, "purged expired session records");
            }
        }
    })
}

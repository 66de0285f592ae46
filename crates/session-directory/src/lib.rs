//! Contract between the remote-control engine and the short-lived session
//! directory, plus the implementations shared by the engine and the relay.
//!
//! Records are keyed by four-digit codes and expire on a sliding TTL. Codes
//! are independent keys, so every operation is safe to run concurrently for
//! different codes.

use std::time::Duration;

use async_trait::async_trait;
use multiview_proto::{SessionCode, SessionRecord, StatePatch, ViewState};
use thiserror::Error;

pub mod code;
pub mod http;
pub mod memory;

pub use code::{create_session, generate_code, DEFAULT_CODE_ATTEMPTS};
pub use http::HttpDirectory;
pub use memory::MemoryDirectory;

/// Records live this long after their last write.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("session {0} not found")]
    NotFound(SessionCode),
    #[error("session {0} is already live")]
    Conflict(SessionCode),
    #[error("no free session code after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("directory backend error: {0}")]
    Backend(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Stores a fresh record under `code`. Fails with `Conflict` while a live
    /// record already holds the code.
    async fn insert(&self, code: SessionCode, state: ViewState) -> DirectoryResult<SessionRecord>;

    async fn get(&self, code: SessionCode) -> DirectoryResult<SessionRecord>;

    /// Defaults to a `get`; backends can override with a cheaper existence check.
    async fn is_live(&self, code: SessionCode) -> DirectoryResult<bool> {
        match self.get(code).await {
            Ok(_) => Ok(true),
            Err(DirectoryError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Merges `patch` into the stored state, re-timestamps the record and
    /// restarts its TTL.
    async fn replace(&self, code: SessionCode, patch: StatePatch)
        -> DirectoryResult<SessionRecord>;

    /// Idempotent; deleting an absent record succeeds.
    async fn delete(&self, code: SessionCode) -> DirectoryResult<()>;
}

use std::time::Duration;

use multiview_proto::{ModelError, SessionCode};
use session_directory::DirectoryError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open channel: {0}")]
    Connect(String),
    #[error("channel closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Codec(String),
    #[error("channel authorization failed: {0}")]
    Auth(String),
}

/// Failures surfaced to whoever drives a role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no free session code after {attempts} attempts")]
    SessionCreationExhausted { attempts: u32 },
    #[error("no state received from the display within {0:?}")]
    ConnectionTimeout(Duration),
    #[error("realtime channel lost: {0}")]
    TransportLost(String),
    #[error("session {0} no longer exists")]
    SessionNotFound(SessionCode),
    #[error("invalid session code {0:?}")]
    InvalidCode(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("session directory unavailable: {0}")]
    Directory(String),
    #[error("session has ended")]
    Ended,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::TransportLost(err.to_string())
    }
}

impl From<DirectoryError> for SessionError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(code) => SessionError::SessionNotFound(code),
            DirectoryError::Exhausted { attempts } => {
                SessionError::SessionCreationExhausted { attempts }
            }
            other => SessionError::Directory(other.to_string()),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

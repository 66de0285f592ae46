use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::view::ViewState;

/// Prefix shared by every session channel name.
pub const CHANNEL_PREFIX: &str = "multiview:remote:";

/// Four-digit code binding a directory record to a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(u16);

impl SessionCode {
    pub const MIN: u16 = 1000;
    pub const MAX: u16 = 9999;

    pub fn from_number(value: u16) -> Result<Self, ModelError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ModelError::InvalidCode(value.to_string()))
        }
    }

    /// Maps `offset` in `0..9000` onto the code space; larger offsets wrap.
    pub fn from_offset(offset: u16) -> Self {
        Self(Self::MIN + offset % (Self::MAX - Self::MIN + 1))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl FromStr for SessionCode {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.len() != 4 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ModelError::InvalidCode(raw.to_string()));
        }
        trimmed
            .parse::<u16>()
            .map_err(|_| ModelError::InvalidCode(raw.to_string()))
            .and_then(|value| {
                Self::from_number(value).map_err(|_| ModelError::InvalidCode(raw.to_string()))
            })
    }
}

impl TryFrom<String> for SessionCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.to_string()
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Channel both roles attach to for `code`.
pub fn channel_name(code: SessionCode) -> String {
    format!("{CHANNEL_PREFIX}{code}")
}

/// Inverse of [`channel_name`]; `None` for anything outside the session namespace.
pub fn code_from_channel(channel: &str) -> Option<SessionCode> {
    channel.strip_prefix(CHANNEL_PREFIX)?.parse().ok()
}

/// What the session directory stores per code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub code: SessionCode,
    #[serde(flatten)]
    pub state: ViewState,
    /// Unix milliseconds of the last write.
    pub timestamp: i64,
}

impl SessionRecord {
    pub fn new(code: SessionCode, state: ViewState) -> Self {
        Self {
            code,
            state,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn touch(&mut self) {
        self.timestamp = chrono::Utc::now().timestamp_millis();
    }
}

/// Body of `POST /sessions`. Without a code the directory picks one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<SessionCode>,
    #[serde(flatten)]
    pub state: ViewState,
}

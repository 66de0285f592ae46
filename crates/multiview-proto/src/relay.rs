//! Frames exchanged between a realtime client and the relay. The relay never
//! looks inside `data`; it only fans it out to the other channel members.

use serde::{Deserialize, Serialize};

/// Capabilities a channel token can grant.
pub const CAPABILITY_PUBLISH: &str = "publish";
pub const CAPABILITY_SUBSCRIBE: &str = "subscribe";

/// Messages sent from a channel member to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Publish { data: serde_json::Value },
    /// Heartbeat to keep the membership alive
    Ping,
}

/// Messages sent from the relay to a channel member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Subscription is live; `members` lists everyone already attached.
    Attached {
        client_id: String,
        members: Vec<String>,
    },
    Message {
        from: String,
        data: serde_json::Value,
    },
    Presence {
        client_id: String,
        action: PresenceAction,
    },
    Pong,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Enter,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub client_id: String,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Claims carried by a channel capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelClaims {
    pub sub: String,
    pub channel: String,
    pub capabilities: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

impl ChannelClaims {
    pub fn allows(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

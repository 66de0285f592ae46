//! Realtime channel abstraction used by both roles.
//!
//! Transports decode the wire envelope once; undecodable payloads are logged
//! and dropped here and never reach a role.

use async_trait::async_trait;
use multiview_proto::relay::PresenceAction;
use multiview_proto::Message;

use crate::error::TransportError;

pub mod bus;
pub mod websocket;

pub use bus::{BusConnector, BusTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Suspended,
    Closed,
    Failed,
}

impl ConnectionState {
    /// States after which the channel delivers nothing more.
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            ConnectionState::Suspended | ConnectionState::Closed | ConnectionState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connection(ConnectionState),
    Message { from: String, message: Message },
    Presence {
        client_id: String,
        action: PresenceAction,
    },
}

/// One attached member of a session channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn channel(&self) -> &str;

    fn client_id(&self) -> &str;

    /// Fire and forget; no delivery acknowledgement.
    async fn publish(&self, message: &Message) -> Result<(), TransportError>;

    /// `None` once the channel is closed and drained.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Releases the subscription. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens channel members. Implemented per backend.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(
        &self,
        channel: &str,
        client_id: &str,
    ) -> Result<Box<dyn ChannelTransport>, TransportError>;
}

pub fn generate_client_id(role: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{role}-{}", &id[..8])
}

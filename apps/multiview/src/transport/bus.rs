use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use multiview_proto::relay::PresenceAction;
use multiview_proto::Message;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use transport_bus::{Bus, BusMessage, BusPayload, LocalBus};

use super::{ChannelTransport, ConnectionState, TransportConnector, TransportEvent};
use crate::error::TransportError;

type Links = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ConnectionState>>>>;

/// Channel members that live in one process and share a [`LocalBus`].
#[derive(Clone)]
pub struct BusConnector {
    bus: Arc<LocalBus>,
    links: Links,
}

impl BusConnector {
    pub fn new(bus: Arc<LocalBus>) -> Self {
        Self {
            bus,
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn bus(&self) -> &Arc<LocalBus> {
        &self.bus
    }

    /// Pushes a connection change to one member, the way a relay drop would
    /// surface. Returns false when no such member is attached.
    pub fn interrupt(&self, client_id: &str, state: ConnectionState) -> bool {
        self.links
            .lock()
            .get(client_id)
            .map(|link| link.send(state).is_ok())
            .unwrap_or(false)
    }
}

impl Default for BusConnector {
    fn default() -> Self {
        Self::new(Arc::new(LocalBus::new()))
    }
}

#[async_trait]
impl TransportConnector for BusConnector {
    async fn open(
        &self,
        channel: &str,
        client_id: &str,
    ) -> Result<Box<dyn ChannelTransport>, TransportError> {
        // Subscribe before joining so no message published after the join is missed.
        let rx = self.bus.subscribe(channel);
        let (link, control) = mpsc::unbounded_channel();
        self.links.lock().insert(client_id.to_string(), link);
        let members = self.bus.join(channel, client_id);
        debug!(channel, client_id, members = members.len(), "attached to local channel");

        Ok(Box::new(BusTransport {
            bus: Arc::clone(&self.bus),
            links: Arc::clone(&self.links),
            channel: channel.to_string(),
            client_id: client_id.to_string(),
            rx,
            control,
            pending: VecDeque::from([TransportEvent::Connection(ConnectionState::Connected)]),
            closed: false,
        }))
    }
}

pub struct BusTransport {
    bus: Arc<LocalBus>,
    links: Links,
    channel: String,
    client_id: String,
    rx: broadcast::Receiver<BusMessage>,
    control: mpsc::UnboundedReceiver<ConnectionState>,
    pending: VecDeque<TransportEvent>,
    closed: bool,
}

impl BusTransport {
    fn detach(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.links.lock().remove(&self.client_id);
        self.bus.leave(&self.channel, &self.client_id);
    }

    fn decode(&self, msg: BusMessage) -> Option<TransportEvent> {
        match msg.payload {
            BusPayload::Data(bytes) => match serde_json::from_slice::<Message>(&bytes) {
                Ok(message) => Some(TransportEvent::Message {
                    from: msg.sender,
                    message,
                }),
                Err(err) => {
                    warn!(channel = %self.channel, from = %msg.sender, error = %err, "dropping undecodable message");
                    None
                }
            },
            BusPayload::Joined => Some(TransportEvent::Presence {
                client_id: msg.sender,
                action: PresenceAction::Enter,
            }),
            BusPayload::Left => Some(TransportEvent::Presence {
                client_id: msg.sender,
                action: PresenceAction::Leave,
            }),
        }
    }
}

#[async_trait]
impl ChannelTransport for BusTransport {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, message: &Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let encoded =
            serde_json::to_vec(message).map_err(|err| TransportError::Codec(err.to_string()))?;
        self.bus
            .publish(&self.channel, &self.client_id, Bytes::from(encoded))
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.closed {
            return None;
        }
        loop {
            tokio::select! {
                biased;
                state = self.control.recv() => {
                    let state = state.unwrap_or(ConnectionState::Closed);
                    if state.is_lost() {
                        self.detach();
                    }
                    return Some(TransportEvent::Connection(state));
                }
                received = self.rx.recv() => match received {
                    Ok(msg) if msg.sender == self.client_id => continue,
                    Ok(msg) => {
                        if let Some(event) = self.decode(msg) {
                            return Some(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(channel = %self.channel, skipped, "local channel receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.detach();
                        return Some(TransportEvent::Connection(ConnectionState::Closed));
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        self.detach();
    }
}

impl Drop for BusTransport {
    fn drop(&mut self) {
        self.detach();
    }
}

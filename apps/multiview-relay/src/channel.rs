//! Realtime session channels over WebSocket.
//!
//! Each socket is one channel member. Published data fans out through a
//! [`LocalBus`] topic per channel; members never see their own messages.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use multiview_proto::relay::{ClientFrame, PresenceAction, RelayFrame};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use transport_bus::{Bus, BusMessage, BusPayload, LocalBus};

use crate::handlers::{ApiError, AppState};
use crate::metrics;

/// Members silent for longer than this are dropped.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(600);
pub const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

struct Member {
    last_seen: Instant,
    evict: Option<oneshot::Sender<()>>,
}

/// Channel membership and fan-out shared by every socket.
#[derive(Clone)]
pub struct ChannelHub {
    bus: Arc<LocalBus>,
    /// channel -> (client_id -> member)
    channels: Arc<DashMap<String, DashMap<String, Member>>>,
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelHub {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(LocalBus::new()),
            channels: Arc::new(DashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<LocalBus> {
        &self.bus
    }

    /// `None` when `client_id` is already attached to `channel`.
    fn register(&self, channel: &str, client_id: &str) -> Option<oneshot::Receiver<()>> {
        let members = self.channels.entry(channel.to_string()).or_default();
        if members.contains_key(client_id) {
            return None;
        }
        let (evict, evicted) = oneshot::channel();
        members.insert(
            client_id.to_string(),
            Member {
                last_seen: Instant::now(),
                evict: Some(evict),
            },
        );
        Some(evicted)
    }

    fn touch(&self, channel: &str, client_id: &str) {
        if let Some(members) = self.channels.get(channel) {
            if let Some(mut member) = members.get_mut(client_id) {
                member.last_seen = Instant::now();
            }
        }
    }

    fn unregister(&self, channel: &str, client_id: &str) -> Option<Member> {
        let mut remove_channel = false;
        let mut removed = None;

        if let Some(members) = self.channels.get(channel) {
            removed = members.remove(client_id).map(|(_, member)| member);
            remove_channel = members.is_empty();
        }

        if remove_channel {
            self.channels.remove_if(channel, |_, members| members.is_empty());
        }
        removed
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Drops members whose last frame is older than `timeout`, announces
    /// their leave and signals their sockets to close.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut stale = Vec::new();
        for channel in self.channels.iter() {
            for member in channel.value().iter() {
                if now.duration_since(member.last_seen) > timeout {
                    stale.push((channel.key().clone(), member.key().clone()));
                }
            }
        }

        for (channel, client_id) in &stale {
            info!(%channel, %client_id, "removing stale member (heartbeat timeout)");
            if let Some(mut member) = self.unregister(channel, client_id) {
                if let Some(evict) = member.evict.take() {
                    let _ = evict.send(());
                }
            }
            self.bus.leave(channel, client_id);
        }
        stale
    }

    pub fn spawn_heartbeat_monitor(&self, every: Duration, timeout: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let evicted = hub.evict_stale(timeout);
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "evicted stale channel members");
                }
                hub.bus.prune();
            }
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    token: Option<String>,
}

/// `GET /ws/:channel?token=…`
pub async fn channel_socket(
    Path(channel): Path<String>,
    Query(params): Query<ChannelParams>,
    State(state): State<AppState>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(token) = params.token else {
        return ApiError::new(StatusCode::UNAUTHORIZED, "missing_token").into_response();
    };
    let claims = match state.tokens.verify(&token, &channel) {
        Ok(claims) => claims,
        Err(err) => return ApiError::from(err).into_response(),
    };
    let Some(ws) = ws else {
        return ApiError::new(StatusCode::UPGRADE_REQUIRED, "websocket_required").into_response();
    };

    let hub = state.channels.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, channel, claims.sub, hub))
}

async fn handle_socket(socket: WebSocket, channel: String, client_id: String, hub: ChannelHub) {
    let (mut sender, mut receiver) = socket.split();

    let Some(mut evicted) = hub.register(&channel, &client_id) else {
        warn!(%channel, %client_id, "client id already attached; refusing socket");
        let frame = RelayFrame::Error {
            message: format!("client {client_id} is already attached"),
        };
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = sender.send(Message::Text(json)).await;
        }
        let _ = sender.close().await;
        return;
    };

    // Subscribe before joining so nothing published after the join is missed.
    let bus_rx = hub.bus.subscribe(&channel);
    let members = hub.bus.join(&channel, &client_id);
    metrics::CONNECTED_MEMBERS.inc();
    info!(%channel, %client_id, members = members.len(), "member attached");

    let (tx, mut rx) = mpsc::unbounded_channel::<RelayFrame>();
    let _ = tx.send(RelayFrame::Attached {
        client_id: client_id.clone(),
        members,
    });

    let send_client = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to encode relay frame"),
            }
        }
        let _ = sender.close().await;
        debug!(client_id = %send_client, "socket sender task ended");
    });

    let fanout_task = tokio::spawn(fan_out(bus_rx, client_id.clone(), tx.clone()));

    loop {
        tokio::select! {
            _ = &mut evicted => {
                debug!(%channel, %client_id, "member evicted; closing socket");
                break;
            }
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(err)) => {
                        debug!(%channel, %client_id, error = %err, "websocket error");
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => handle_frame(&text, &channel, &client_id, &hub, &tx),
                    Message::Binary(data) => match String::from_utf8(data) {
                        Ok(text) => handle_frame(&text, &channel, &client_id, &hub, &tx),
                        Err(_) => debug!(%client_id, "ignoring non-UTF8 binary frame"),
                    },
                    Message::Ping(_) | Message::Pong(_) => hub.touch(&channel, &client_id),
                    Message::Close(_) => break,
                }
            }
        }
    }

    fanout_task.abort();
    hub.unregister(&channel, &client_id);
    hub.bus.leave(&channel, &client_id);
    metrics::CONNECTED_MEMBERS.dec();
    drop(tx);
    let _ = tokio::time::timeout(Duration::from_secs(2), send_task).await;
    info!(%channel, %client_id, "member detached");
}

fn handle_frame(
    text: &str,
    channel: &str,
    client_id: &str,
    hub: &ChannelHub,
    tx: &mpsc::UnboundedSender<RelayFrame>,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%client_id, error = %err, "invalid client frame");
            let _ = tx.send(RelayFrame::Error {
                message: format!("invalid frame: {err}"),
            });
            return;
        }
    };
    hub.touch(channel, client_id);

    match frame {
        ClientFrame::Publish { data } => match serde_json::to_vec(&data) {
            Ok(encoded) => match hub.bus.publish(channel, client_id, Bytes::from(encoded)) {
                Ok(delivered) => {
                    metrics::MESSAGES_RELAYED.inc();
                    debug!(%channel, %client_id, delivered, "relayed message");
                }
                Err(err) => {
                    let _ = tx.send(RelayFrame::Error {
                        message: err.to_string(),
                    });
                }
            },
            Err(err) => warn!(%client_id, error = %err, "failed to encode published data"),
        },
        ClientFrame::Ping => {
            let _ = tx.send(RelayFrame::Pong);
        }
    }
}

async fn fan_out(
    mut bus_rx: broadcast::Receiver<BusMessage>,
    client_id: String,
    tx: mpsc::UnboundedSender<RelayFrame>,
) {
    loop {
        match bus_rx.recv().await {
            Ok(msg) if msg.sender == client_id => continue,
            Ok(msg) => {
                let Some(frame) = relay_frame(msg) else {
                    continue;
                };
                if tx.send(frame).is_err() {
                    break;
                }
            }
            // Skipped messages are not replayed; see the bus topic capacity.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%client_id, skipped, "member lagged behind channel; messages dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn relay_frame(msg: BusMessage) -> Option<RelayFrame> {
    match msg.payload {
        BusPayload::Data(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => Some(RelayFrame::Message {
                from: msg.sender,
                data,
            }),
            Err(err) => {
                warn!(from = %msg.sender, error = %err, "dropping undecodable bus payload");
                None
            }
        },
        BusPayload::Joined => Some(RelayFrame::Presence {
            client_id: msg.sender,
            action: PresenceAction::Enter,
        }),
        BusPayload::Left => Some(RelayFrame::Presence {
            client_id: msg.sender,
            action: PresenceAction::Leave,
        }),
    }
}

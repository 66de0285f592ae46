use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use multiview_proto::relay::{ClientFrame, RelayFrame, TokenRequest, TokenResponse};
use multiview_proto::Message;
use reqwest::{Client, StatusCode};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{ChannelTransport, ConnectionState, TransportConnector, TransportEvent};
use crate::config::RemoteConfig;
use crate::error::TransportError;

/// Relay evicts members silent for ten minutes; ping well inside that.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

enum Outbound {
    Frame(ClientFrame),
    Close,
}

/// Attaches to relay channels: fetches a channel token, then upgrades.
#[derive(Clone)]
pub struct WebSocketConnector {
    http: Client,
    relay_url: String,
    ws_base: String,
    heartbeat: Duration,
}

impl WebSocketConnector {
    pub fn new(config: &RemoteConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(4))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            relay_url: config.relay_url.clone(),
            ws_base: config.websocket_base(),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    async fn fetch_token(&self, channel: &str, client_id: &str) -> Result<String, TransportError> {
        let request = TokenRequest {
            client_id: client_id.to_string(),
            channel: channel.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/token", self.relay_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {}
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST) => {
                return Err(TransportError::Auth(format!("token request rejected: {status}")));
            }
            status => {
                return Err(TransportError::Connect(format!("token request failed: {status}")));
            }
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(token.token)
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(
        &self,
        channel: &str,
        client_id: &str,
    ) -> Result<Box<dyn ChannelTransport>, TransportError> {
        let token = self.fetch_token(channel, client_id).await?;
        let ws_url = format!("{}/ws/{}?token={}", self.ws_base, channel, token);
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(channel, client_id, "websocket attached to relay");

        let (outgoing, rx_outgoing) = mpsc::unbounded_channel::<Outbound>();
        let (tx_events, incoming) = mpsc::unbounded_channel::<TransportEvent>();
        let _ = tx_events.send(TransportEvent::Connection(ConnectionState::Connecting));

        let channel_name = channel.to_string();
        let reader = tokio::spawn(async move {
            handle_websocket(ws_stream, rx_outgoing, tx_events, channel_name).await;
        });

        let tx_heartbeat = outgoing.clone();
        let period = self.heartbeat;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx_heartbeat.send(Outbound::Frame(ClientFrame::Ping)).is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(WebSocketTransport {
            channel: channel.to_string(),
            client_id: client_id.to_string(),
            outgoing,
            incoming,
            reader: Some(reader),
            heartbeat,
        }))
    }
}

pub struct WebSocketTransport {
    channel: String,
    client_id: String,
    outgoing: mpsc::UnboundedSender<Outbound>,
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
    reader: Option<JoinHandle<()>>,
    heartbeat: JoinHandle<()>,
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, message: &Message) -> Result<(), TransportError> {
        let data = message
            .to_value()
            .map_err(|err| TransportError::Codec(err.to_string()))?;
        self.outgoing
            .send(Outbound::Frame(ClientFrame::Publish { data }))
            .map_err(|_| TransportError::Closed)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.incoming.recv().await
    }

    async fn close(&mut self) {
        self.heartbeat.abort();
        let _ = self.outgoing.send(Outbound::Close);
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut reader)
                .await
                .is_err()
            {
                debug!(channel = %self.channel, "websocket close timed out");
                reader.abort();
            }
        }
        self.incoming.close();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_outgoing: mpsc::UnboundedReceiver<Outbound>,
    tx_events: mpsc::UnboundedSender<TransportEvent>,
    channel: String,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Forward outbound frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx_outgoing.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    let Ok(json) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut final_state = ConnectionState::Closed;
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let frame = match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(%channel, error = %err, "dropping malformed relay frame");
                        continue;
                    }
                };
                let event = match frame {
                    RelayFrame::Attached { members, .. } => {
                        debug!(%channel, members = members.len(), "channel attached");
                        TransportEvent::Connection(ConnectionState::Connected)
                    }
                    RelayFrame::Message { from, data } => match Message::from_value(data) {
                        Ok(message) => TransportEvent::Message { from, message },
                        Err(err) => {
                            warn!(%channel, %from, error = %err, "dropping undecodable message");
                            continue;
                        }
                    },
                    RelayFrame::Presence { client_id, action } => {
                        TransportEvent::Presence { client_id, action }
                    }
                    RelayFrame::Pong => {
                        trace!(%channel, "pong");
                        continue;
                    }
                    RelayFrame::Error { message } => {
                        warn!(%channel, %message, "relay reported an error");
                        continue;
                    }
                };
                if tx_events.send(event).is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Err(err) => {
                debug!(%channel, error = %err, "websocket receive failed");
                final_state = ConnectionState::Failed;
                break;
            }
            _ => {}
        }
    }

    let _ = tx_events.send(TransportEvent::Connection(final_state));
    send_task.abort();
}

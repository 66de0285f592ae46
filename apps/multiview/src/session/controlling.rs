use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use multiview_proto::{channel_name, Message, SessionCode, ViewState};
use session_directory::SessionDirectory;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{Command, RoleControls, RolePhase};
use crate::config::{RemoteConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::error::{SessionError, SessionResult};
use crate::transport::{generate_client_id, ChannelTransport, TransportConnector, TransportEvent};

/// The remote side. Edits a working copy and pushes every change.
pub struct ControllingSession {
    connector: Arc<dyn TransportConnector>,
    directory: Option<Arc<dyn SessionDirectory>>,
    connect_timeout: Duration,
    client_id: String,
    phase_tx: watch::Sender<RolePhase>,
}

impl ControllingSession {
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            directory: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client_id: generate_client_id("remote"),
            phase_tx: watch::channel(RolePhase::Idle).0,
        }
    }

    pub fn configure(mut self, config: &RemoteConfig) -> Self {
        self.connect_timeout = config.connect_timeout;
        self
    }

    /// Lets `terminate` delete the session record.
    pub fn with_directory(mut self, directory: Arc<dyn SessionDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Observes the phase from before the session starts, including the
    /// fall back to `Idle` when it fails to start.
    pub fn subscribe_phase(&self) -> watch::Receiver<RolePhase> {
        self.phase_tx.subscribe()
    }

    /// Attaches to the session behind `code` and waits for the display's
    /// first snapshot.
    ///
    /// The watchdog starts on entry into `Connecting` and only a
    /// `stateUpdate` satisfies it; a transport that connects but never
    /// delivers a snapshot still times out. Any failure leaves the phase at
    /// `Idle` with the channel released.
    pub async fn join(self, code: &str) -> SessionResult<ControllingHandle> {
        let code: SessionCode = code
            .parse()
            .map_err(|_| SessionError::InvalidCode(code.trim().to_string()))?;

        let phase_rx = self.phase_tx.subscribe();
        self.phase_tx.send_replace(RolePhase::Connecting);
        let deadline = Instant::now() + self.connect_timeout;

        let mut transport =
            match timeout_at(deadline, self.connector.open(&channel_name(code), &self.client_id)).await {
                Ok(Ok(transport)) => transport,
                Ok(Err(err)) => {
                    self.phase_tx.send_replace(RolePhase::Idle);
                    warn!(%code, error = %err, "failed to attach remote to channel");
                    return Err(SessionError::TransportLost(err.to_string()));
                }
                Err(_) => {
                    self.phase_tx.send_replace(RolePhase::Idle);
                    warn!(%code, "timed out attaching to channel");
                    return Err(SessionError::ConnectionTimeout(self.connect_timeout));
                }
            };

        let snapshot = match timeout_at(deadline, request_snapshot(transport.as_mut())).await {
            Ok(Ok(state)) => state,
            Ok(Err(err)) => {
                transport.close().await;
                self.phase_tx.send_replace(RolePhase::Idle);
                warn!(%code, error = %err, "channel lost before the first snapshot");
                return Err(err);
            }
            Err(_) => {
                transport.close().await;
                self.phase_tx.send_replace(RolePhase::Idle);
                warn!(%code, timeout = ?self.connect_timeout, "no snapshot from display");
                return Err(SessionError::ConnectionTimeout(self.connect_timeout));
            }
        };

        self.phase_tx.send_replace(RolePhase::Active);
        info!(%code, client_id = %self.client_id, "remote session active");

        let (state_tx, state_rx) = watch::channel(snapshot.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = ControllingDriver {
            code,
            state: snapshot,
            unacked: VecDeque::new(),
            transport,
            directory: self.directory,
            state_tx,
            phase_tx: self.phase_tx,
            commands: commands_rx,
        };
        let task = tokio::spawn(driver.run());

        Ok(ControllingHandle {
            code,
            controls: RoleControls::new(commands_tx, state_rx, phase_rx),
            task,
        })
    }
}

async fn request_snapshot(transport: &mut dyn ChannelTransport) -> SessionResult<ViewState> {
    transport.publish(&Message::RequestInitialState).await?;
    loop {
        match transport.next_event().await {
            Some(TransportEvent::Message {
                message: Message::StateUpdate(state),
                ..
            }) => return Ok(state),
            Some(TransportEvent::Connection(state)) if state.is_lost() => {
                return Err(SessionError::TransportLost(format!("connection {state:?}")));
            }
            Some(other) => debug!(?other, "waiting for the first snapshot"),
            None => return Err(SessionError::TransportLost("channel closed".into())),
        }
    }
}

pub struct ControllingHandle {
    code: SessionCode,
    controls: RoleControls,
    task: JoinHandle<SessionResult<()>>,
}

impl ControllingHandle {
    pub fn code(&self) -> SessionCode {
        self.code
    }

    pub fn controls(&self) -> &RoleControls {
        &self.controls
    }

    /// Leaves the channel; deletes the directory record when one was given.
    pub async fn terminate(self) -> SessionResult<()> {
        self.controls.request_end();
        self.wait().await
    }

    pub async fn wait(self) -> SessionResult<()> {
        self.task
            .await
            .map_err(|err| SessionError::TransportLost(format!("session task failed: {err}")))?
    }
}

impl Deref for ControllingHandle {
    type Target = RoleControls;

    fn deref(&self) -> &Self::Target {
        &self.controls
    }
}

struct ControllingDriver {
    code: SessionCode,
    state: ViewState,
    /// States pushed to the display that it has not echoed back yet, oldest
    /// first.
    unacked: VecDeque<ViewState>,
    transport: Box<dyn ChannelTransport>,
    directory: Option<Arc<dyn SessionDirectory>>,
    state_tx: watch::Sender<ViewState>,
    phase_tx: watch::Sender<RolePhase>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ControllingDriver {
    async fn run(mut self) -> SessionResult<()> {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let outcome = match command {
                        Some(command) => self.handle_command(command).await,
                        None => Err(None),
                    };
                    if let Err(reason) = outcome {
                        return self.finish(reason).await;
                    }
                }
                event = self.transport.next_event() => {
                    let outcome = match event {
                        Some(event) => self.handle_event(event),
                        None => Err(SessionError::TransportLost("channel closed".into())),
                    };
                    if let Err(err) = outcome {
                        return self.finish(Some(err)).await;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), Option<SessionError>> {
        match command {
            Command::Edit { op, reply } => {
                let mut next = self.state.clone();
                if let Err(err) = op(&mut next) {
                    let _ = reply.send(Err(err.into()));
                    return Ok(());
                }
                self.replace_working_copy(next);
                self.unacked.push_back(self.state.clone());
                let outcome = self.publish(Message::UpdateState(self.state.clone())).await;
                let _ = reply.send(outcome.clone());
                outcome.map_err(Some)
            }
            Command::Reload { slot, reply } => {
                let outcome = self.publish(Message::Reload(slot)).await;
                let _ = reply.send(outcome.clone());
                outcome.map_err(Some)
            }
            Command::Fullscreen { request, reply } => {
                let mut next = self.state.clone();
                let slot = request.apply(&mut next);
                self.replace_working_copy(next);
                self.unacked.push_back(self.state.clone());
                let outcome = self.publish(Message::ToggleFullscreen(slot)).await;
                let _ = reply.send(outcome.clone().map(|_| slot));
                outcome.map_err(Some)
            }
            Command::End => Err(None),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) -> SessionResult<()> {
        match event {
            TransportEvent::Connection(state) if state.is_lost() => {
                Err(SessionError::TransportLost(format!("connection {state:?}")))
            }
            TransportEvent::Message {
                message: Message::StateUpdate(state),
                ..
            } => {
                self.accept_display_state(state);
                Ok(())
            }
            other => {
                debug!(code = %self.code, ?other, "remote ignoring event");
                Ok(())
            }
        }
    }

    /// Drops snapshots the display sent before it handled every push. Assumes
    /// this remote is the only writer.
    fn accept_display_state(&mut self, state: ViewState) {
        if !self.unacked.is_empty() {
            let Some(position) = self.unacked.iter().position(|pushed| *pushed == state) else {
                debug!(code = %self.code, pending = self.unacked.len(), "dropping stale display state");
                return;
            };
            self.unacked.drain(..=position);
            if !self.unacked.is_empty() {
                return;
            }
        }
        debug!(code = %self.code, "remote working copy replaced by display state");
        self.replace_working_copy(state);
    }

    fn replace_working_copy(&mut self, next: ViewState) {
        self.state = next;
        self.state_tx.send_replace(self.state.clone());
    }

    async fn publish(&self, message: Message) -> SessionResult<()> {
        self.transport
            .publish(&message)
            .await
            .map_err(SessionError::from)
    }

    /// Only a requested end deletes the record. Losing the channel
    /// deliberately leaves the record to the display, which deletes it when
    /// it ends.
    async fn finish(mut self, reason: Option<SessionError>) -> SessionResult<()> {
        self.transport.close().await;
        self.phase_tx.send_replace(RolePhase::Ended);
        match reason {
            None => {
                if let Some(directory) = &self.directory {
                    if let Err(err) = directory.delete(self.code).await {
                        warn!(code = %self.code, error = %err, "failed to delete session record");
                    }
                }
                info!(code = %self.code, "remote session terminated");
                Ok(())
            }
            Some(err) => {
                warn!(code = %self.code, error = %err, "remote session lost");
                Err(err)
            }
        }
    }
}

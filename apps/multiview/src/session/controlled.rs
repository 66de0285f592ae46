use std::ops::Deref;
use std::sync::Arc;

use multiview_proto::relay::PresenceAction;
use multiview_proto::{
    channel_name, Message, SessionCode, SessionRecord, SlotIndex, StatePatch, ViewState,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use session_directory::{create_session, DirectoryError, SessionDirectory, DEFAULT_CODE_ATTEMPTS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Command, FullscreenRequest, RoleControls, RolePhase};
use crate::config::RemoteConfig;
use crate::error::{SessionError, SessionResult};
use crate::store::{NoopStore, ViewStore};
use crate::surface::{DisplaySurface, LogSurface};
use crate::transport::{generate_client_id, ChannelTransport, TransportConnector, TransportEvent};

/// The display side. Holds the authoritative state and answers the remote.
pub struct ControlledSession {
    directory: Arc<dyn SessionDirectory>,
    connector: Arc<dyn TransportConnector>,
    surface: Arc<dyn DisplaySurface>,
    store: Arc<dyn ViewStore>,
    code_attempts: u32,
    preferred_code: Option<SessionCode>,
    client_id: String,
    phase_tx: watch::Sender<RolePhase>,
}

impl ControlledSession {
    pub fn new(directory: Arc<dyn SessionDirectory>, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            directory,
            connector,
            surface: Arc::new(LogSurface),
            store: Arc::new(NoopStore),
            code_attempts: DEFAULT_CODE_ATTEMPTS,
            preferred_code: None,
            client_id: generate_client_id("display"),
            phase_tx: watch::channel(RolePhase::Idle).0,
        }
    }

    pub fn configure(mut self, config: &RemoteConfig) -> Self {
        self.code_attempts = config.code_attempts;
        self
    }

    pub fn with_surface(mut self, surface: Arc<dyn DisplaySurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ViewStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_code_attempts(mut self, attempts: u32) -> Self {
        self.code_attempts = attempts;
        self
    }

    /// Tried before any generated code; ignored when already live.
    pub fn with_preferred_code(mut self, code: SessionCode) -> Self {
        self.preferred_code = Some(code);
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

    /// Registers a session for `initial` and attaches to its channel.
    ///
    /// On failure the phase returns to `Idle` and no record is left behind
    /// beyond what the directory TTL will reap.
    pub async fn activate(self, initial: ViewState) -> SessionResult<ControlledHandle> {
        let phase_rx = self.phase_tx.subscribe();
        self.phase_tx.send_replace(RolePhase::Connecting);

        let record = match self.create_record(initial).await {
            Ok(record) => record,
            Err(err) => {
                self.phase_tx.send_replace(RolePhase::Idle);
                warn!(error = %err, "failed to create session record");
                return Err(err.into());
            }
        };
        let code = record.code;

        let transport = match self.connector.open(&channel_name(code), &self.client_id).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(%code, error = %err, "failed to attach display to channel");
                if let Err(delete_err) = self.directory.delete(code).await {
                    warn!(%code, error = %delete_err, "failed to delete session record");
                }
                self.phase_tx.send_replace(RolePhase::Idle);
                return Err(SessionError::TransportLost(err.to_string()));
            }
        };

        self.surface.apply_view(&record.state);
        if record.state.fullscreen_index.is_some() {
            self.surface.set_fullscreen(record.state.fullscreen_index);
        }
        self.phase_tx.send_replace(RolePhase::Active);
        info!(%code, client_id = %self.client_id, "display session active");

        let (state_tx, state_rx) = watch::channel(record.state.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = ControlledDriver {
            code,
            state: record.state,
            transport,
            directory: self.directory,
            surface: self.surface,
            store: self.store,
            state_tx,
            phase_tx: self.phase_tx,
            commands: commands_rx,
        };
        let task = tokio::spawn(driver.run());

        Ok(ControlledHandle {
            code,
            controls: RoleControls::new(commands_tx, state_rx, phase_rx),
            task,
        })
    }

    async fn create_record(&self, initial: ViewState) -> Result<SessionRecord, DirectoryError> {
        if let Some(code) = self.preferred_code {
            match self.directory.insert(code, initial.clone()).await {
                Ok(record) => return Ok(record),
                Err(DirectoryError::Conflict(_)) => {
                    debug!(%code, "preferred session code is live; generating one");
                }
                Err(err) => return Err(err),
            }
        }
        let mut rng = StdRng::from_entropy();
        create_session(self.directory.as_ref(), initial, self.code_attempts, &mut rng).await
    }
}

pub struct ControlledHandle {
    code: SessionCode,
    controls: RoleControls,
    task: JoinHandle<SessionResult<()>>,
}

impl ControlledHandle {
    /// The code to show for the remote to type in.
    pub fn code(&self) -> SessionCode {
        self.code
    }

    pub fn controls(&self) -> &RoleControls {
        &self.controls
    }

    /// Releases the channel and deletes the directory record.
    pub async fn end(self) -> SessionResult<()> {
        self.controls.request_end();
        self.wait().await
    }

    /// Resolves when the session ends on its own.
    pub async fn wait(self) -> SessionResult<()> {
        self.task
            .await
            .map_err(|err| SessionError::TransportLost(format!("session task failed: {err}")))?
    }
}

impl Deref for ControlledHandle {
    type Target = RoleControls;

    fn deref(&self) -> &Self::Target {
        &self.controls
    }
}

struct ControlledDriver {
    code: SessionCode,
    state: ViewState,
    transport: Box<dyn ChannelTransport>,
    directory: Arc<dyn SessionDirectory>,
    surface: Arc<dyn DisplaySurface>,
    store: Arc<dyn ViewStore>,
    state_tx: watch::Sender<ViewState>,
    phase_tx: watch::Sender<RolePhase>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ControlledDriver {
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
                        Some(event) => self.handle_event(event).await,
                        None => Err(SessionError::TransportLost("channel closed".into())),
                    };
                    if let Err(err) = outcome {
                        return self.finish(Some(err)).await;
                    }
                }
            }
        }
    }

    /// `Err(None)` ends the session cleanly.
    async fn handle_command(&mut self, command: Command) -> Result<(), Option<SessionError>> {
        match command {
            Command::Edit { op, reply } => {
                let mut next = self.state.clone();
                if let Err(err) = op(&mut next) {
                    let _ = reply.send(Err(err.into()));
                    return Ok(());
                }
                let outcome = self.commit(next).await;
                let _ = reply.send(outcome.clone());
                outcome.map_err(Some)
            }
            Command::Reload { slot, reply } => {
                self.surface.reload(slot);
                let _ = reply.send(Ok(()));
                Ok(())
            }
            Command::Fullscreen { request, reply } => {
                let mut next = self.state.clone();
                let slot = request.apply(&mut next);
                let outcome = self.apply_fullscreen(next, slot).await;
                let _ = reply.send(outcome.clone().map(|_| slot));
                outcome.map_err(Some)
            }
            Command::End => Err(None),
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) -> SessionResult<()> {
        match event {
            TransportEvent::Connection(state) if state.is_lost() => {
                Err(SessionError::TransportLost(format!("connection {state:?}")))
            }
            TransportEvent::Connection(state) => {
                debug!(code = %self.code, ?state, "display connection state");
                Ok(())
            }
            TransportEvent::Presence { client_id, action } => match action {
                PresenceAction::Enter => {
                    debug!(code = %self.code, %client_id, "remote attached; sending state");
                    self.publish_state().await
                }
                PresenceAction::Leave => {
                    debug!(code = %self.code, %client_id, "remote detached");
                    Ok(())
                }
            },
            TransportEvent::Message { from, message } => {
                debug!(code = %self.code, %from, action = message.kind(), "display received message");
                self.handle_message(message).await
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> SessionResult<()> {
        match message {
            Message::RequestInitialState => self.publish_state().await,
            Message::UpdateState(state) => self.commit(state).await,
            Message::Reload(slot) => {
                self.surface.reload(slot);
                Ok(())
            }
            Message::ToggleFullscreen(slot) => {
                let mut next = self.state.clone();
                next.set_fullscreen(slot);
                self.apply_fullscreen(next, slot).await
            }
            Message::StateUpdate(_) => {
                debug!(code = %self.code, "ignoring stateUpdate from another display");
                Ok(())
            }
        }
    }

    /// Replaces the state wholesale and renders it before persisting and
    /// republishing. The surface hears about a fullscreen change even when it
    /// arrives inside a full state, such as an edit clearing that window.
    async fn commit(&mut self, next: ViewState) -> SessionResult<()> {
        let fullscreen_changed = next.fullscreen_index != self.state.fullscreen_index;
        self.state = next;
        self.surface.apply_view(&self.state);
        if fullscreen_changed {
            self.surface.set_fullscreen(self.state.fullscreen_index);
        }
        self.after_change(StatePatch::from(self.state.clone())).await
    }

    async fn apply_fullscreen(&mut self, next: ViewState, slot: Option<SlotIndex>) -> SessionResult<()> {
        self.state = next;
        self.surface.set_fullscreen(slot);
        let patch = StatePatch {
            fullscreen_index: Some(slot),
            ..StatePatch::default()
        };
        self.after_change(patch).await
    }

    /// Watchers of the state see a change only once it is persisted.
    async fn after_change(&mut self, patch: StatePatch) -> SessionResult<()> {
        if let Err(err) = self.store.save(&self.state).await {
            warn!(code = %self.code, error = %err, "failed to persist view");
        }
        match self.directory.replace(self.code, patch).await {
            Ok(_) => {}
            Err(DirectoryError::NotFound(code)) => return Err(SessionError::SessionNotFound(code)),
            Err(err) => warn!(code = %self.code, error = %err, "failed to refresh session record"),
        }
        self.state_tx.send_replace(self.state.clone());
        self.publish_state().await
    }

    async fn publish_state(&self) -> SessionResult<()> {
        self.transport
            .publish(&Message::StateUpdate(self.state.clone()))
            .await
            .map_err(SessionError::from)
    }

    async fn finish(mut self, reason: Option<SessionError>) -> SessionResult<()> {
        self.transport.close().await;
        if let Err(err) = self.directory.delete(self.code).await {
            warn!(code = %self.code, error = %err, "failed to delete session record");
        }
        self.phase_tx.send_replace(RolePhase::Ended);
        match reason {
            None => {
                info!(code = %self.code, "display session ended");
                Ok(())
            }
            Some(err) => {
                warn!(code = %self.code, error = %err, "display session lost");
                Err(err)
            }
        }
    }
}

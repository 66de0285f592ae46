//! The two roles of a remote-control session.
//!
//! Each role owns its `ViewState` inside a single driver task that selects
//! over handle commands and transport events, so handlers never interleave.
//! Handles talk to the driver over a command channel and observe it through
//! `watch` channels.

use multiview_proto::{FeedRef, ModelError, Schedule, SlotIndex, ViewState};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{SessionError, SessionResult};

pub mod controlled;
pub mod controlling;

pub use controlled::{ControlledHandle, ControlledSession};
pub use controlling::{ControllingHandle, ControllingSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePhase {
    Idle,
    Connecting,
    Active,
    Ended,
}

impl RolePhase {
    pub fn is_terminal(self) -> bool {
        self == RolePhase::Ended
    }
}

pub(crate) type EditFn = Box<dyn FnOnce(&mut ViewState) -> Result<(), ModelError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FullscreenRequest {
    Toggle(SlotIndex),
    Set(Option<SlotIndex>),
}

impl FullscreenRequest {
    pub(crate) fn apply(self, state: &mut ViewState) -> Option<SlotIndex> {
        match self {
            FullscreenRequest::Toggle(slot) => state.toggle_fullscreen(slot),
            FullscreenRequest::Set(slot) => {
                state.set_fullscreen(slot);
                slot
            }
        }
    }
}

pub(crate) enum Command {
    Edit {
        op: EditFn,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Reload {
        slot: SlotIndex,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Fullscreen {
        request: FullscreenRequest,
        reply: oneshot::Sender<SessionResult<Option<SlotIndex>>>,
    },
    End,
}

/// Operations shared by both role handles.
pub struct RoleControls {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ViewState>,
    phase: watch::Receiver<RolePhase>,
}

impl RoleControls {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ViewState>,
        phase: watch::Receiver<RolePhase>,
    ) -> Self {
        Self {
            commands,
            state,
            phase,
        }
    }

    /// Snapshot of the role's current state.
    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    pub fn phase(&self) -> RolePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RolePhase> {
        self.phase.clone()
    }

    /// Applies `f` to the role's state. A rejected edit leaves the state
    /// untouched and publishes nothing.
    pub async fn edit<T, F>(&self, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ViewState) -> Result<T, ModelError> + Send + 'static,
    {
        let (value_tx, value_rx) = oneshot::channel();
        let op: EditFn = Box::new(move |state: &mut ViewState| {
            let value = f(state)?;
            let _ = value_tx.send(value);
            Ok(())
        });
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Edit { op, reply })?;
        outcome.await.map_err(|_| SessionError::Ended)??;
        value_rx.await.map_err(|_| SessionError::Ended)
    }

    pub async fn set_slot(&self, index: usize, feed: Option<FeedRef>) -> SessionResult<()> {
        self.edit(move |state| state.set_slot(index, feed)).await
    }

    pub async fn place_feed(&self, feed: FeedRef) -> SessionResult<SlotIndex> {
        self.edit(move |state| state.place_feed(feed)).await
    }

    pub async fn remove_feed(&self, feed_id: impl Into<String>) -> SessionResult<usize> {
        let feed_id = feed_id.into();
        self.edit(move |state| Ok(state.remove_feed(&feed_id))).await
    }

    pub async fn set_order(&self, prefix: Vec<usize>) -> SessionResult<()> {
        self.edit(move |state| state.set_order(&prefix)).await
    }

    pub async fn set_gap(&self, gap: u32) -> SessionResult<()> {
        self.edit(move |state| state.set_gap(gap)).await
    }

    pub async fn set_border_color(&self, color: impl Into<String>) -> SessionResult<()> {
        let color = color.into();
        self.edit(move |state| state.set_border_color(&color)).await
    }

    pub async fn set_chat_enabled(&self, enabled: bool) -> SessionResult<()> {
        self.edit(move |state| {
            state.set_chat_enabled(enabled);
            Ok(())
        })
        .await
    }

    pub async fn replace_schedules(&self, schedules: Vec<Schedule>) -> SessionResult<()> {
        self.edit(move |state| {
            state.replace_schedules(schedules);
            Ok(())
        })
        .await
    }

    pub async fn upsert_schedule(&self, schedule: Schedule) -> SessionResult<()> {
        self.edit(move |state| {
            state.upsert_schedule(schedule);
            Ok(())
        })
        .await
    }

    pub async fn remove_schedule(&self, id: impl Into<String>) -> SessionResult<Option<Schedule>> {
        let id = id.into();
        self.edit(move |state| Ok(state.remove_schedule(&id))).await
    }

    /// Re-fetches one window on the display. Never changes state.
    pub async fn reload(&self, slot: SlotIndex) -> SessionResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Reload { slot, reply })?;
        outcome.await.map_err(|_| SessionError::Ended)?
    }

    /// Same window exits fullscreen; any other window takes it over.
    pub async fn toggle_fullscreen(&self, slot: SlotIndex) -> SessionResult<Option<SlotIndex>> {
        self.fullscreen(FullscreenRequest::Toggle(slot)).await
    }

    pub async fn set_fullscreen(&self, slot: Option<SlotIndex>) -> SessionResult<Option<SlotIndex>> {
        self.fullscreen(FullscreenRequest::Set(slot)).await
    }

    async fn fullscreen(&self, request: FullscreenRequest) -> SessionResult<Option<SlotIndex>> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Fullscreen { request, reply })?;
        outcome.await.map_err(|_| SessionError::Ended)?
    }

    pub(crate) fn request_end(&self) {
        let _ = self.commands.send(Command::End);
    }

    fn send(&self, command: Command) -> SessionResult<()> {
        self.commands.send(command).map_err(|_| SessionError::Ended)
    }
}

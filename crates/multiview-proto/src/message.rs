use serde::{Deserialize, Serialize};

use crate::selection::SlotIndex;
use crate::view::ViewState;

/// Everything the two roles say to each other on a session channel.
///
/// Encoded as `{"action": "<tag>", "payload": ...}` and decoded once at the
/// transport boundary, so roles only ever match on this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum Message {
    /// Controlling asks for a snapshot.
    RequestInitialState,
    /// Controlled announces its current state.
    StateUpdate(ViewState),
    /// Controlling pushes a full replacement state.
    UpdateState(ViewState),
    /// Re-fetch one window in place on the display.
    Reload(SlotIndex),
    /// Enter fullscreen for a window, or leave it with `None`.
    ToggleFullscreen(Option<SlotIndex>),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestInitialState => "requestInitialState",
            Message::StateUpdate(_) => "stateUpdate",
            Message::UpdateState(_) => "updateState",
            Message::Reload(_) => "reload",
            Message::ToggleFullscreen(_) => "toggleFullscreen",
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

//! Where the controlled role's state becomes pixels.

use multiview_proto::{SlotIndex, ViewState};
use parking_lot::Mutex;
use tracing::info;

/// Rendering hooks invoked by the controlled role. Calls arrive on the role's
/// driver task and must not block.
pub trait DisplaySurface: Send + Sync {
    /// Re-render from a full state.
    fn apply_view(&self, state: &ViewState);

    /// Re-fetch one window in place.
    fn reload(&self, slot: SlotIndex);

    fn set_fullscreen(&self, slot: Option<SlotIndex>);
}

/// Logs rendering commands; the CLI host's display.
#[derive(Debug, Default)]
pub struct LogSurface;

impl DisplaySurface for LogSurface {
    fn apply_view(&self, state: &ViewState) {
        let order: Vec<String> = state
            .render_order()
            .into_iter()
            .filter(|slot| state.selected_events.is_occupied(*slot))
            .map(|slot| slot.to_string())
            .collect();
        info!(
            occupied = state.count_occupied(),
            order = %order.join(","),
            gap = state.layout.gap(),
            border = %state.layout.border_color().as_str(),
            chat = state.layout.chat_enabled(),
            fullscreen = ?state.fullscreen_index,
            "render view"
        );
    }

    fn reload(&self, slot: SlotIndex) {
        info!(%slot, "reload window");
    }

    fn set_fullscreen(&self, slot: Option<SlotIndex>) {
        match slot {
            Some(slot) => info!(%slot, "enter fullscreen"),
            None => info!("exit fullscreen"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Apply(ViewState),
    Reload(SlotIndex),
    Fullscreen(Option<SlotIndex>),
}

/// Keeps every call for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }

    pub fn reloads(&self) -> Vec<SlotIndex> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Reload(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    pub fn last_applied(&self) -> Option<ViewState> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            SurfaceCall::Apply(state) => Some(state.clone()),
            _ => None,
        })
    }
}

impl DisplaySurface for RecordingSurface {
    fn apply_view(&self, state: &ViewState) {
        self.calls.lock().push(SurfaceCall::Apply(state.clone()));
    }

    fn reload(&self, slot: SlotIndex) {
        self.calls.lock().push(SurfaceCall::Reload(slot));
    }

    fn set_fullscreen(&self, slot: Option<SlotIndex>) {
        self.calls.lock().push(SurfaceCall::Fullscreen(slot));
    }
}

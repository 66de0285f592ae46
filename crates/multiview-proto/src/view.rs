use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModelError;
use crate::layout::{BorderColor, Layout};
use crate::order::ViewOrder;
use crate::schedule::{Schedule, ScheduleList};
use crate::selection::{FeedRef, SlotIndex, Slots};

/// The full synchronized payload. Every update message carries one of these
/// whole; receivers replace, never merge.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    #[serde(default)]
    pub selected_events: Slots,
    #[serde(default)]
    pub view_order: ViewOrder,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub schedules: ScheduleList,
    #[serde(default)]
    pub fullscreen_index: Option<SlotIndex>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces one window. The view order is left alone; consumers filter it
    /// by occupancy when rendering.
    pub fn set_slot(&mut self, index: usize, feed: Option<FeedRef>) -> Result<(), ModelError> {
        let index = SlotIndex::new(index)?;
        let clearing = feed.is_none();
        self.selected_events.set(index, feed);
        if clearing && self.fullscreen_index == Some(index) {
            self.fullscreen_index = None;
        }
        Ok(())
    }

    /// Puts `feed` into the lowest empty window.
    pub fn place_feed(&mut self, feed: FeedRef) -> Result<SlotIndex, ModelError> {
        let index = self
            .selected_events
            .first_empty()
            .ok_or(ModelError::SelectionFull)?;
        self.selected_events.set(index, Some(feed));
        Ok(index)
    }

    /// Clears every window showing `feed_id`; returns how many were cleared.
    pub fn remove_feed(&mut self, feed_id: &str) -> usize {
        let cleared = self.selected_events.clear_feed(feed_id);
        if let Some(fullscreen) = self.fullscreen_index {
            if cleared.contains(&fullscreen) {
                self.fullscreen_index = None;
            }
        }
        cleared.len()
    }

    pub fn set_order(&mut self, prefix: &[usize]) -> Result<(), ModelError> {
        self.view_order = ViewOrder::from_prefix(prefix)?;
        Ok(())
    }

    pub fn count_occupied(&self) -> usize {
        self.selected_events.count_occupied()
    }

    pub fn render_order(&self) -> Vec<SlotIndex> {
        self.view_order.render_order(&self.selected_events)
    }

    pub fn set_gap(&mut self, gap: u32) -> Result<(), ModelError> {
        self.layout.set_gap(gap)
    }

    pub fn set_border_color(&mut self, color: &str) -> Result<(), ModelError> {
        self.layout.set_border_color(BorderColor::parse(color)?);
        Ok(())
    }

    pub fn set_chat_enabled(&mut self, enabled: bool) {
        self.layout.set_chat_enabled(enabled);
    }

    pub fn set_fullscreen(&mut self, index: Option<SlotIndex>) {
        self.fullscreen_index = index;
    }

    /// Same window exits fullscreen, any other window takes it over.
    pub fn toggle_fullscreen(&mut self, index: SlotIndex) -> Option<SlotIndex> {
        self.fullscreen_index = if self.fullscreen_index == Some(index) {
            None
        } else {
            Some(index)
        };
        self.fullscreen_index
    }

    pub fn replace_schedules(&mut self, schedules: Vec<Schedule>) {
        self.schedules = ScheduleList::from(schedules);
    }

    pub fn upsert_schedule(&mut self, schedule: Schedule) {
        self.schedules.upsert(schedule);
    }

    pub fn remove_schedule(&mut self, id: &str) -> Option<Schedule> {
        self.schedules.remove(id)
    }
}

/// Partial write accepted by the session directory. Absent fields keep the
/// stored value; `fullscreenIndex: null` clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_events: Option<Slots>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_order: Option<ViewOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<ScheduleList>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub fullscreen_index: Option<Option<SlotIndex>>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self == &StatePatch::default()
    }

    pub fn apply_to(self, state: &mut ViewState) {
        if let Some(slots) = self.selected_events {
            state.selected_events = slots;
        }
        if let Some(order) = self.view_order {
            state.view_order = order;
        }
        if let Some(layout) = self.layout {
            state.layout = layout;
        }
        if let Some(schedules) = self.schedules {
            state.schedules = schedules;
        }
        if let Some(fullscreen) = self.fullscreen_index {
            state.fullscreen_index = fullscreen;
        }
    }
}

impl From<ViewState> for StatePatch {
    fn from(state: ViewState) -> Self {
        Self {
            selected_events: Some(state.selected_events),
            view_order: Some(state.view_order),
            layout: Some(state.layout),
            schedules: Some(state.schedules),
            fullscreen_index: Some(state.fullscreen_index),
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(id: &str) -> FeedRef {
        FeedRef::new(id, id.to_uppercase(), format!("https://embed.example/{id}"))
    }

    #[test]
    fn set_slot_rejects_out_of_bounds() {
        let mut state = ViewState::new();
        assert_eq!(
            state.set_slot(9, Some(feed("a"))),
            Err(ModelError::SlotOutOfRange(9))
        );
        assert_eq!(state.count_occupied(), 0);
    }

    #[test]
    fn set_slot_leaves_order_untouched() {
        let mut state = ViewState::new();
        state.set_order(&[4, 2]).unwrap();
        let before = state.view_order;
        state.set_slot(2, Some(feed("a"))).unwrap();
        assert_eq!(state.view_order, before);
    }

    #[test]
    fn place_feed_fills_lowest_empty_then_reports_full() {
        let mut state = ViewState::new();
        state.set_slot(0, Some(feed("x"))).unwrap();
        assert_eq!(state.place_feed(feed("a")).unwrap().get(), 1);
        for _ in 0..7 {
            state.place_feed(feed("b")).unwrap();
        }
        assert_eq!(state.place_feed(feed("c")), Err(ModelError::SelectionFull));
    }

    #[test]
    fn removing_unselected_feed_is_noop() {
        let mut state = ViewState::new();
        state.set_slot(3, Some(feed("a"))).unwrap();
        let before = state.clone();
        assert_eq!(state.remove_feed("zzz"), 0);
        assert_eq!(state, before);
    }

    #[test]
    fn fullscreen_is_exclusive() {
        let mut state = ViewState::new();
        let k = SlotIndex::new(1).unwrap();
        let j = SlotIndex::new(6).unwrap();
        state.toggle_fullscreen(k);
        state.toggle_fullscreen(j);
        assert_eq!(state.fullscreen_index, Some(j));
        assert_eq!(state.toggle_fullscreen(j), None);
    }

    #[test]
    fn clearing_fullscreen_window_exits_fullscreen() {
        let mut state = ViewState::new();
        state.set_slot(2, Some(feed("a"))).unwrap();
        state.set_fullscreen(Some(SlotIndex::new(2).unwrap()));
        state.set_slot(2, None).unwrap();
        assert_eq!(state.fullscreen_index, None);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let mut state = ViewState::new();
        state.set_slot(0, Some(feed("a"))).unwrap();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["selectedEvents"][0]["selectedOption"], "https://embed.example/a");
        assert_eq!(value["viewOrder"], json!([0, 1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(value["layout"]["borderColor"], "#000000");
        assert!(value["fullscreenIndex"].is_null());
    }

    #[test]
    fn patch_distinguishes_absent_and_null_fullscreen() {
        let mut state = ViewState::new();
        state.set_fullscreen(SlotIndex::new(4).ok());

        let absent: StatePatch = serde_json::from_value(json!({"viewOrder": [8]})).unwrap();
        absent.apply_to(&mut state);
        assert_eq!(state.fullscreen_index, SlotIndex::new(4).ok());
        assert_eq!(state.view_order.as_slice()[0], 8);

        let cleared: StatePatch = serde_json::from_value(json!({"fullscreenIndex": null})).unwrap();
        cleared.apply_to(&mut state);
        assert_eq!(state.fullscreen_index, None);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of windows a view can hold. Fixed for the lifetime of every state.
pub const SLOT_COUNT: usize = 9;

/// Identity of one of the nine windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub fn new(index: usize) -> Result<Self, ModelError> {
        if index < SLOT_COUNT {
            Ok(Self(index as u8))
        } else {
            Err(ModelError::SlotOutOfRange(index))
        }
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// All indices in ascending order.
    pub fn all() -> impl Iterator<Item = SlotIndex> {
        (0..SLOT_COUNT as u8).map(SlotIndex)
    }
}

impl TryFrom<u8> for SlotIndex {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as usize)
    }
}

impl From<SlotIndex> for u8 {
    fn from(index: SlotIndex) -> Self {
        index.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A selectable stream or channel as chosen into a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    /// Playback option (embed URL) picked for this window.
    pub selected_option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl FeedRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: String::new(),
            selected_option: option.into(),
            image: None,
            time_label: None,
            status: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Same feed, different playback option. The only mutation a selected feed allows.
    pub fn with_option(&self, option: impl Into<String>) -> Self {
        Self {
            selected_option: option.into(),
            ..self.clone()
        }
    }
}

/// The nine windows. Never grows or shrinks; clearing a window empties it in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<FeedRef>>", into = "Vec<Option<FeedRef>>")]
pub struct Slots([Option<FeedRef>; SLOT_COUNT]);

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        SLOT_COUNT
    }

    pub fn get(&self, index: SlotIndex) -> Option<&FeedRef> {
        self.0[index.get()].as_ref()
    }

    /// Replaces the content of `index`, returning what was there.
    pub fn set(&mut self, index: SlotIndex, feed: Option<FeedRef>) -> Option<FeedRef> {
        std::mem::replace(&mut self.0[index.get()], feed)
    }

    pub fn is_occupied(&self, index: SlotIndex) -> bool {
        self.0[index.get()].is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, Option<&FeedRef>)> {
        SlotIndex::all().zip(self.0.iter().map(Option::as_ref))
    }

    pub fn count_occupied(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn first_empty(&self) -> Option<SlotIndex> {
        find_first_empty_slot(self)
    }

    /// Empties every window showing `feed_id` and returns the cleared indices.
    pub fn clear_feed(&mut self, feed_id: &str) -> Vec<SlotIndex> {
        let mut cleared = Vec::new();
        for (index, slot) in SlotIndex::all().zip(self.0.iter_mut()) {
            if slot.as_ref().is_some_and(|feed| feed.id == feed_id) {
                *slot = None;
                cleared.push(index);
            }
        }
        cleared
    }
}

impl TryFrom<Vec<Option<FeedRef>>> for Slots {
    type Error = ModelError;

    fn try_from(value: Vec<Option<FeedRef>>) -> Result<Self, Self::Error> {
        let len = value.len();
        <[Option<FeedRef>; SLOT_COUNT]>::try_from(value)
            .map(Slots)
            .map_err(|_| ModelError::InvalidSlotCount(len))
    }
}

impl From<Slots> for Vec<Option<FeedRef>> {
    fn from(slots: Slots) -> Self {
        slots.0.into()
    }
}

/// Lowest empty index, or `None` when all nine windows are taken.
pub fn find_first_empty_slot(slots: &Slots) -> Option<SlotIndex> {
    slots
        .iter()
        .find(|(_, feed)| feed.is_none())
        .map(|(index, _)| index)
}

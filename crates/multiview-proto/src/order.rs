use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::selection::{SlotIndex, Slots, SLOT_COUNT};

/// Draw order of the windows: always a full permutation of 0..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct ViewOrder([u8; SLOT_COUNT]);

impl ViewOrder {
    pub fn identity() -> Self {
        let mut order = [0u8; SLOT_COUNT];
        for (position, entry) in order.iter_mut().enumerate() {
            *entry = position as u8;
        }
        Self(order)
    }

    /// Completes `prefix` into a permutation by appending the missing indices
    /// in ascending order. `[3, 1]` becomes `[3, 1, 0, 2, 4, 5, 6, 7, 8]`.
    pub fn from_prefix(prefix: &[usize]) -> Result<Self, ModelError> {
        let mut seen = [false; SLOT_COUNT];
        let mut order = [0u8; SLOT_COUNT];
        let mut filled = 0;

        for &index in prefix {
            if index >= SLOT_COUNT {
                return Err(ModelError::SlotOutOfRange(index));
            }
            if seen[index] {
                return Err(ModelError::InvalidOrder { index });
            }
            seen[index] = true;
            order[filled] = index as u8;
            filled += 1;
        }

        for (index, present) in seen.iter().enumerate() {
            if !present {
                order[filled] = index as u8;
                filled += 1;
            }
        }

        Ok(Self(order))
    }

    pub fn indices(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.0
            .iter()
            .filter_map(|&index| SlotIndex::new(index as usize).ok())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Occupied windows in draw order, followed by the empty ones.
    pub fn render_order(&self, slots: &Slots) -> Vec<SlotIndex> {
        let (mut occupied, empty): (Vec<_>, Vec<_>) =
            self.indices().partition(|index| slots.is_occupied(*index));
        occupied.extend(empty);
        occupied
    }
}

impl Default for ViewOrder {
    fn default() -> Self {
        Self::identity()
    }
}

impl TryFrom<Vec<u8>> for ViewOrder {
    type Error = ModelError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let prefix: Vec<usize> = value.into_iter().map(usize::from).collect();
        Self::from_prefix(&prefix)
    }
}

impl From<ViewOrder> for Vec<u8> {
    fn from(order: ViewOrder) -> Self {
        order.0.to_vec()
    }
}

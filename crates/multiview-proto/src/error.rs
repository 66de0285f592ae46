use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("slot index {0} is outside 0..=8")]
    SlotOutOfRange(usize),
    #[error("view order repeats slot {index}")]
    InvalidOrder { index: usize },
    #[error("expected 9 slots, got {0}")]
    InvalidSlotCount(usize),
    #[error("every slot is occupied")]
    SelectionFull,
    #[error("gap {0} is outside 0..={}", crate::layout::MAX_GAP)]
    GapOutOfRange(u32),
    #[error("invalid border color {0:?}")]
    InvalidColor(String),
    #[error("invalid session code {0:?}: expected four digits 1000-9999")]
    InvalidCode(String),
}

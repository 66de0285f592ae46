//! Shared model and wire definitions for the multiview remote-control engine.
//! Kept free of runtime dependencies so the relay, the client engine and any
//! generated bindings agree on one set of types.

pub mod error;
pub mod layout;
pub mod message;
pub mod order;
pub mod record;
pub mod relay;
pub mod schedule;
pub mod selection;
pub mod view;

pub use error::ModelError;
pub use layout::{BorderColor, Layout};
pub use message::Message;
pub use order::ViewOrder;
pub use record::{
    channel_name, code_from_channel, CreateSessionRequest, SessionCode, SessionRecord,
    CHANNEL_PREFIX,
};
pub use schedule::{Schedule, ScheduleList};
pub use selection::{find_first_empty_slot, FeedRef, SlotIndex, Slots, SLOT_COUNT};
pub use view::{StatePatch, ViewState};

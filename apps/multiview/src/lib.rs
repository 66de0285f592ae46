//! Remote-control synchronization engine for a nine-window multiview.
//!
//! A display (controlled role) registers a short-lived session code and
//! publishes its view; a remote (controlling role) joins by code, receives a
//! snapshot and pushes full-state updates back.

pub mod cli;
pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod surface;
pub mod telemetry;
pub mod transport;

pub use config::RemoteConfig;
pub use error::{SessionError, SessionResult, TransportError};
pub use session::{
    ControlledHandle, ControlledSession, ControllingHandle, ControllingSession, RoleControls,
    RolePhase,
};
pub use store::{JsonFileStore, NoopStore, ViewStore};
pub use surface::{DisplaySurface, LogSurface, RecordingSurface, SurfaceCall};
pub use transport::{
    BusConnector, ChannelTransport, ConnectionState, TransportConnector, TransportEvent,
    WebSocketConnector,
};

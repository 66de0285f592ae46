//! Relay for multiview remote sessions: the session directory over HTTP,
//! channel token issuing and WebSocket channel fan-out.

pub mod channel;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod storage;
pub mod telemetry;
pub mod token;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use channel::ChannelHub;
pub use config::{Config, DirectoryBackend};
pub use handlers::{AppState, SharedDirectory};
pub use storage::{build_directory, RedisDirectory};
pub use token::TokenIssuer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/sessions", post(handlers::create_session_handler))
        .route(
            "/sessions/:code",
            get(handlers::get_session)
                .put(handlers::replace_session)
                .delete(handlers::delete_session),
        )
        .route("/token", post(handlers::issue_token))
        .route("/ws/:channel", get(channel::channel_socket))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

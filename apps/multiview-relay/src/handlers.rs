use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use multiview_proto::relay::TokenRequest;
use multiview_proto::{CreateSessionRequest, SessionCode, StatePatch};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::json;
use session_directory::{create_session, DirectoryError, SessionDirectory};
use tracing::{debug, error, info};

use crate::channel::ChannelHub;
use crate::metrics;
use crate::token::{TokenError, TokenIssuer};

pub type SharedDirectory = Arc<dyn SessionDirectory>;

#[derive(Clone)]
pub struct AppState {
    pub directory: SharedDirectory,
    pub tokens: TokenIssuer,
    pub channels: ChannelHub,
    pub code_attempts: u32,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Error responses of the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
    message: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn invalid_code(raw: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_code").with_message(raw)
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "session_not_found"),
            DirectoryError::Conflict(_) => Self::new(StatusCode::CONFLICT, "code_in_use"),
            DirectoryError::Exhausted { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "code_space_exhausted")
            }
            DirectoryError::Backend(message) => {
                error!(error = %message, "session directory backend failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "directory_unavailable")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidChannel(_) | TokenError::MissingClientId => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_token_request")
                    .with_message(err.to_string())
            }
            other => {
                debug!(error = %other, "rejected channel token");
                Self::new(StatusCode::UNAUTHORIZED, "invalid_token")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            reason: self.reason,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn parse_code(raw: &str) -> Result<SessionCode, ApiError> {
    raw.parse().map_err(|_| ApiError::invalid_code(raw))
}

fn outcome(err: &DirectoryError) -> &'static str {
    match err {
        DirectoryError::NotFound(_) => "not_found",
        DirectoryError::Conflict(_) => "conflict",
        DirectoryError::Exhausted { .. } => "exhausted",
        DirectoryError::Backend(_) => "error",
    }
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// `POST /sessions`. The body is optional; with a `code` the caller picks it.
pub async fn create_session_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, "invalid_body").with_message(e.to_string())
        })?
    };

    let created = match request.code {
        Some(code) => state.directory.insert(code, request.state).await,
        None => {
            let mut rng = StdRng::from_entropy();
            create_session(
                state.directory.as_ref(),
                request.state,
                state.code_attempts,
                &mut rng,
            )
            .await
        }
    };

    match created {
        Ok(record) => {
            metrics::record_write("create", "ok");
            metrics::SESSIONS_CREATED.inc();
            info!(code = %record.code, "session created");
            Ok((StatusCode::CREATED, Json(record)).into_response())
        }
        Err(err) => {
            metrics::record_write("create", outcome(&err));
            Err(err.into())
        }
    }
}

pub async fn get_session(
    Path(raw): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let code = parse_code(&raw)?;
    let record = state.directory.get(code).await?;
    Ok(Json(record).into_response())
}

pub async fn replace_session(
    Path(raw): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<StatePatch>,
) -> Result<Response, ApiError> {
    let code = parse_code(&raw)?;
    match state.directory.replace(code, patch).await {
        Ok(record) => {
            metrics::record_write("replace", "ok");
            debug!(%code, "session record replaced");
            Ok(Json(record).into_response())
        }
        Err(err) => {
            metrics::record_write("replace", outcome(&err));
            Err(err.into())
        }
    }
}

pub async fn delete_session(
    Path(raw): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let code = parse_code(&raw)?;
    match state.directory.delete(code).await {
        Ok(()) => {
            metrics::record_write("delete", "ok");
            debug!(%code, "session record deleted");
            Ok(Json(json!({ "deleted": true })).into_response())
        }
        Err(err) => {
            metrics::record_write("delete", outcome(&err));
            Err(err.into())
        }
    }
}

/// `POST /token`. Session existence is not checked here; the channel name
/// only has to be well formed.
pub async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<Response, ApiError> {
    let response = state.tokens.issue(&request.client_id, &request.channel)?;
    debug!(client_id = %request.client_id, channel = %request.channel, "issued channel token");
    Ok(Json(response).into_response())
}

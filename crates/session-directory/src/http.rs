use std::time::Duration;

use async_trait::async_trait;
use multiview_proto::{CreateSessionRequest, SessionCode, SessionRecord, StatePatch, ViewState};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::{DirectoryError, DirectoryResult, SessionDirectory};

/// Directory client for the relay's `/sessions` REST surface.
#[derive(Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base: &str) -> Self {
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference
        let server = if base.contains("localhost") {
            base.replace("localhost", "127.0.0.1")
        } else {
            base.to_string()
        };
        let server = server.trim_end_matches('/').to_string();

        let base_url = if server.starts_with("http://") || server.starts_with("https://") {
            server
        } else {
            format!("http://{}", server)
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(4))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, code: SessionCode) -> String {
        format!("{}/sessions/{}", self.base_url, code)
    }
}

fn backend(err: reqwest::Error) -> DirectoryError {
    DirectoryError::Backend(err.to_string())
}

fn unexpected(status: StatusCode) -> DirectoryError {
    DirectoryError::Backend(format!("unexpected status {status}"))
}

#[async_trait]
impl SessionDirectory for HttpDirectory {
    async fn insert(&self, code: SessionCode, state: ViewState) -> DirectoryResult<SessionRecord> {
        let request = CreateSessionRequest {
            code: Some(code),
            state,
        };
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(backend)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => response.json().await.map_err(backend),
            StatusCode::CONFLICT => Err(DirectoryError::Conflict(code)),
            status => Err(unexpected(status)),
        }
    }

    async fn get(&self, code: SessionCode) -> DirectoryResult<SessionRecord> {
        let response = self
            .client
            .get(self.session_url(code))
            .send()
            .await
            .map_err(backend)?;

        match response.status() {
            StatusCode::OK => response.json().await.map_err(backend),
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound(code)),
            status => Err(unexpected(status)),
        }
    }

    async fn replace(&self, code: SessionCode, patch: StatePatch) -> DirectoryResult<SessionRecord> {
        let response = self
            .client
            .put(self.session_url(code))
            .json(&patch)
            .send()
            .await
            .map_err(backend)?;

        match response.status() {
            StatusCode::OK => response.json().await.map_err(backend),
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound(code)),
            status => Err(unexpected(status)),
        }
    }

    async fn delete(&self, code: SessionCode) -> DirectoryResult<()> {
        let response = self
            .client
            .delete(self.session_url(code))
            .send()
            .await
            .map_err(backend)?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(%code, "session record deleted");
                Ok(())
            }
            status => Err(unexpected(status)),
        }
    }
}

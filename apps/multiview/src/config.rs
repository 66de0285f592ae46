use std::env;
use std::path::PathBuf;
use std::time::Duration;

use session_directory::DEFAULT_CODE_ATTEMPTS;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side settings shared by both roles.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Base URL of the relay serving the directory and the realtime channel
    pub relay_url: String,
    /// How long a controlling device waits for the first snapshot
    pub connect_timeout: Duration,
    /// Code draws before session creation gives up
    pub code_attempts: u32,
    /// Where the controlled device persists its view, if anywhere
    pub state_file: Option<PathBuf>,
}

impl RemoteConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_url = lookup("MULTIVIEW_RELAY_URL")
            .filter(|value| !value.trim().is_empty())
            .map(|value| normalize_relay_url(&value))
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        let connect_timeout = lookup("MULTIVIEW_CONNECT_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let code_attempts = lookup("MULTIVIEW_CODE_ATTEMPTS")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_CODE_ATTEMPTS);
        let state_file = lookup("MULTIVIEW_STATE_FILE")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Self {
            relay_url,
            connect_timeout,
            code_attempts,
            state_file,
        }
    }

    /// WebSocket base derived from the relay URL.
    pub fn websocket_base(&self) -> String {
        if let Some(rest) = self.relay_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.relay_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.relay_url)
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            code_attempts: DEFAULT_CODE_ATTEMPTS,
            state_file: None,
        }
    }
}

/// Adds a scheme when missing and pins `localhost` to IPv4.
pub fn normalize_relay_url(raw: &str) -> String {
    // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
    let server = raw.trim().trim_end_matches('/').replace("localhost", "127.0.0.1");
    if server.starts_with("http://") || server.starts_with("https://") {
        server
    } else {
        format!("http://{server}")
    }
}

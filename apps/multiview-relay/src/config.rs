use std::env;
use std::time::Duration;

use session_directory::DEFAULT_CODE_ATTEMPTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryBackend {
    Memory,
    Redis,
}

impl DirectoryBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub directory_backend: DirectoryBackend,
    pub session_ttl_seconds: u64,
    /// Unset means a random secret per process; tokens then die with it.
    pub token_secret: Option<String>,
    pub token_ttl_seconds: u64,
    pub code_attempts: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            port: lookup("MULTIVIEW_RELAY_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            directory_backend: lookup("MULTIVIEW_DIRECTORY_BACKEND")
                .and_then(|b| DirectoryBackend::parse(&b))
                .unwrap_or(defaults.directory_backend),
            session_ttl_seconds: lookup("MULTIVIEW_SESSION_TTL")
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(defaults.session_ttl_seconds),
            token_secret: lookup("MULTIVIEW_TOKEN_SECRET").filter(|s| !s.trim().is_empty()),
            token_ttl_seconds: lookup("MULTIVIEW_TOKEN_TTL")
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(defaults.token_ttl_seconds),
            code_attempts: lookup("MULTIVIEW_CODE_ATTEMPTS")
                .and_then(|a| a.parse().ok())
                .filter(|a| *a > 0)
                .unwrap_or(defaults.code_attempts),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://localhost:6379".to_string(),
            directory_backend: DirectoryBackend::Memory,
            session_ttl_seconds: 3600,
            token_secret: None,
            token_ttl_seconds: 3600,
            code_attempts: DEFAULT_CODE_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.directory_backend, DirectoryBackend::Memory);
        assert_eq!(config.session_ttl(), Duration::from_secs(3600));
        assert_eq!(config.code_attempts, 20);
        assert!(config.token_secret.is_none());
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let config = Config::from_lookup(lookup(&[
            ("MULTIVIEW_RELAY_PORT", "9090"),
            ("MULTIVIEW_DIRECTORY_BACKEND", "Redis"),
            ("MULTIVIEW_SESSION_TTL", "0"),
            ("MULTIVIEW_TOKEN_SECRET", "  "),
            ("MULTIVIEW_TOKEN_TTL", "120"),
            ("MULTIVIEW_CODE_ATTEMPTS", "many"),
        ]));
        assert_eq!(config.port, 9090);
        assert_eq!(config.directory_backend, DirectoryBackend::Redis);
        assert_eq!(config.session_ttl_seconds, 3600);
        assert!(config.token_secret.is_none());
        assert_eq!(config.token_ttl(), Duration::from_secs(120));
        assert_eq!(config.code_attempts, 20);
    }
}

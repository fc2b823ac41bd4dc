//! Endpoint and transport configuration.
//!
//! The synchronization endpoint is a `ws://` or `wss://` base URL. The upload
//! and health-check services live on the same host, reached over
//! `http://`/`https://` with fixed path suffixes.

use std::time::Duration;

use url::Url;

use crate::error::SessionError;
use crate::room::RoomId;

/// Environment variable holding the synchronization endpoint base URL.
pub const ENDPOINT_ENV: &str = "SWIFTSHARE_WS_URL";

/// Endpoint used when [`ENDPOINT_ENV`] is unset.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:1234";

pub const UPLOAD_PATH: &str = "/api/uploadthing";
pub const HEALTH_PATH: &str = "/api/health";

/// A validated synchronization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Normalized base URL, no trailing slash
    base: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let base = Url::parse(raw).map_err(|e| SessionError::InvalidEndpoint {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match base.scheme() {
            "ws" | "wss" => Ok(Self {
                base: base.as_str().trim_end_matches('/').to_string(),
            }),
            other => Err(SessionError::InvalidEndpoint {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{other}', expected ws or wss"),
            }),
        }
    }

    /// Read the endpoint from [`ENDPOINT_ENV`], falling back to
    /// [`DEFAULT_ENDPOINT`] when the variable is unset or empty.
    pub fn from_env() -> Result<Self, SessionError> {
        match std::env::var(ENDPOINT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::parse(raw.trim()),
            _ => Self::parse(DEFAULT_ENDPOINT),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> String {
        self.base.clone()
    }

    /// WebSocket URL of a room: `<base>/<room-id>`.
    pub fn room_url(&self, room: &RoomId) -> String {
        format!("{}/{}", self.base(), room)
    }

    /// The base URL with its scheme swapped to `http`/`https`.
    pub fn http_base(&self) -> String {
        let base = self.base();
        if let Some(rest) = base.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = base.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            base
        }
    }

    pub fn upload_url(&self) -> String {
        format!("{}{UPLOAD_PATH}", self.http_base())
    }

    pub fn health_url(&self) -> String {
        format!("{}{HEALTH_PATH}", self.http_base())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            base: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Configuration of the bundled WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Synchronization endpoint
    pub endpoint: Endpoint,
    /// First reconnect delay; doubled on every failed attempt
    pub backoff_base: Duration,
    /// Upper bound for the reconnect delay
    pub max_backoff: Duration,
}

impl TransportConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Reconnect delay after `attempt` consecutive failures.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_ws_and_wss() {
        assert!(Endpoint::parse("ws://localhost:1234").is_ok());
        assert!(Endpoint::parse("wss://sync.example.com").is_ok());
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(Endpoint::parse("http://localhost:1234").is_err());
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_derived_urls_insecure() {
        let endpoint = Endpoint::parse("ws://localhost:1234").unwrap();
        assert_eq!(endpoint.http_base(), "http://localhost:1234");
        assert_eq!(endpoint.upload_url(), "http://localhost:1234/api/uploadthing");
        assert_eq!(endpoint.health_url(), "http://localhost:1234/api/health");
    }

    #[test]
    fn test_derived_urls_secure() {
        let endpoint = Endpoint::parse("wss://sync.example.com/").unwrap();
        assert_eq!(endpoint.http_base(), "https://sync.example.com");
        assert_eq!(endpoint.upload_url(), "https://sync.example.com/api/uploadthing");
    }

    #[test]
    fn test_room_url() {
        let endpoint = Endpoint::parse("ws://localhost:1234").unwrap();
        let room = RoomId::parse("team-notes").unwrap();
        assert_eq!(endpoint.room_url(&room), "ws://localhost:1234/team-notes");
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(Endpoint::default().base(), "ws://localhost:1234");
        assert_eq!(Endpoint::default(), Endpoint::parse(DEFAULT_ENDPOINT).unwrap());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = TransportConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
        assert_eq!(config.backoff(10), Duration::from_millis(2500));
        assert_eq!(config.backoff(u32::MAX), Duration::from_millis(2500));
    }
}

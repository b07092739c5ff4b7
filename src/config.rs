//! Client configuration.

use url::Url;

use crate::error::{Error, Result};
use crate::websocket::BackoffPolicy;

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay schedule between attempts
    pub backoff: BackoffPolicy,
    /// Maximum number of consecutive failed attempts before giving up
    /// (None = retry forever). Losing an open connection is always retried
    /// at least once.
    pub max_attempts: Option<u32>,
    /// Randomize each delay within the upper half of its backoff window
    pub jitter: bool,
}

impl ReconnectConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: Some(Self::DEFAULT_MAX_ATTEMPTS),
            jitter: false,
        }
    }
}

/// Configuration for [`RealtimeClient`](crate::RealtimeClient)
///
/// # Example
///
/// ```
/// use market_realtime::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::from_origin("https://markets.example.com", "/ws")
///     .unwrap()
///     .with_identity("user-42")
///     .with_max_attempts(Some(10))
///     .with_backoff(Duration::from_millis(500), Duration::from_secs(20));
///
/// assert_eq!(config.url, "wss://markets.example.com/ws");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Application identity forwarded verbatim in subscribe frames
    pub identity: Option<String>,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Default endpoint used when none is given
    pub const DEFAULT_WS_URL: &'static str = "ws://localhost:8081/ws";

    /// Create a configuration for a custom endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identity: None,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Build a configuration whose endpoint is derived from a page origin
    ///
    /// See [`endpoint_from_origin`].
    pub fn from_origin(origin: &str, path: &str) -> Result<Self> {
        Ok(Self::new(endpoint_from_origin(origin, path)?))
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.reconnect.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: std::time::Duration, cap: std::time::Duration) -> Self {
        self.reconnect.backoff = BackoffPolicy::new(base, cap);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.reconnect.jitter = jitter;
        self
    }

    /// Check the endpoint and backoff settings
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::Config("endpoint has no host".to_string()));
        }

        let backoff = &self.reconnect.backoff;
        if backoff.base.is_zero() {
            return Err(Error::Config("backoff base must be positive".to_string()));
        }
        if backoff.cap < backoff.base {
            return Err(Error::Config(format!(
                "backoff cap ({:?}) is below base ({:?})",
                backoff.cap, backoff.base
            )));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WS_URL)
    }
}

/// Derive a WebSocket endpoint from a page origin
///
/// The scheme follows the page: `https` gives `wss`, `http` gives `ws`.
/// Host and port are kept; `path` replaces whatever path the origin had.
pub fn endpoint_from_origin(origin: &str, path: &str) -> Result<String> {
    let mut url = Url::parse(origin)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::Config(format!(
                "cannot derive a websocket endpoint from a {} origin",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot switch {} to {}", origin, scheme)))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);

    let mut endpoint = url.to_string();
    // Url always renders an empty path as "/"; keep the bare origin form
    if path.is_empty() && endpoint.ends_with('/') {
        endpoint.pop();
    }
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_secure_page_gets_secure_socket() {
        assert_eq!(
            endpoint_from_origin("https://markets.example.com", "/ws").unwrap(),
            "wss://markets.example.com/ws"
        );
    }

    #[test]
    fn test_plain_page_keeps_port() {
        assert_eq!(
            endpoint_from_origin("http://localhost:5174/markets/7?tab=book", "").unwrap(),
            "ws://localhost:5174"
        );
    }

    #[test]
    fn test_non_http_origin_rejected() {
        assert!(matches!(
            endpoint_from_origin("ftp://files.example.com", "/ws"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            endpoint_from_origin("not a url", "/ws"),
            Err(Error::Url(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.url, ClientConfig::DEFAULT_WS_URL);
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert_eq!(config.reconnect.backoff.base, Duration::from_secs(1));
        assert_eq!(config.reconnect.backoff.cap, Duration::from_secs(30));
        assert!(!config.reconnect.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(ClientConfig::new("https://example.com").validate().is_err());
        assert!(ClientConfig::new("ws://example.com")
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(ClientConfig::new("ws://example.com")
            .with_backoff(Duration::ZERO, Duration::from_secs(1))
            .validate()
            .is_err());
    }
}

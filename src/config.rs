use std::net::SocketAddr;
use std::time::Duration;

use crate::hub::DEFAULT_QUEUE_CAPACITY;

/// Relay configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Listener for browser WebSocket subscribers and the `/api` routes
    pub subscriber_addr: SocketAddr,
    /// Listener for the ingest endpoint. Equal to `subscriber_addr` = single listener.
    pub ingest_addr: SocketAddr,
    /// Path accepting ingest POSTs
    pub ingest_path: String,
    /// Bound on each subscriber's outgoing queue
    pub subscriber_queue: usize,
    /// Maximum accepted ingest or upload body
    pub max_body_bytes: usize,
    /// Keepalive ping interval for subscribers (None = disabled)
    pub ping_interval: Option<Duration>,
    /// Close subscribers silent for this long (None = disabled)
    pub idle_timeout: Option<Duration>,
    /// Base URL of the inference service
    pub chess_api_url: String,
    /// Path of the board snapshot on the inference service
    pub board_path: String,
    /// Timeout for non-streaming upstream calls and for connecting
    pub upstream_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subscriber_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            ingest_addr: SocketAddr::from(([0, 0, 0, 0], 3002)),
            ingest_path: "/".to_string(),
            subscriber_queue: DEFAULT_QUEUE_CAPACITY,
            max_body_bytes: 16 * 1024 * 1024,
            ping_interval: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(120)),
            chess_api_url: "http://127.0.0.1:8100".to_string(),
            board_path: "/current-board-svg".to_string(),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let subscriber_addr = parse_var("RELAY_SUBSCRIBER_ADDR").unwrap_or(defaults.subscriber_addr);
        let ingest_addr = parse_var("RELAY_INGEST_ADDR").unwrap_or(defaults.ingest_addr);

        let ingest_path = string_var("RELAY_INGEST_PATH")
            .map(|path| normalize_path(&path))
            .unwrap_or(defaults.ingest_path);

        let subscriber_queue = parse_var::<usize>("RELAY_SUBSCRIBER_QUEUE")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.subscriber_queue);

        let max_body_bytes =
            parse_var("RELAY_MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes);

        let ping_interval = match parse_var::<u64>("RELAY_PING_INTERVAL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.ping_interval,
        };

        let idle_timeout = match parse_var::<u64>("RELAY_IDLE_TIMEOUT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_timeout,
        };

        let chess_api_url = string_var("CHESS_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.chess_api_url);

        let board_path = string_var("CHESS_BOARD_PATH")
            .map(|path| normalize_path(&path))
            .unwrap_or(defaults.board_path);

        let upstream_timeout = parse_var("CHESS_API_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.upstream_timeout);

        let config = Self {
            subscriber_addr,
            ingest_addr,
            ingest_path,
            subscriber_queue,
            max_body_bytes,
            ping_interval,
            idle_timeout,
            chess_api_url,
            board_path,
            upstream_timeout,
        };

        tracing::info!(
            subscriber_addr = %config.subscriber_addr,
            ingest_addr = %config.ingest_addr,
            ingest_path = %config.ingest_path,
            chess_api_url = %config.chess_api_url,
            "Relay config loaded"
        );

        config
    }

    /// True when ingest and subscribers share one listener
    pub fn single_listener(&self) -> bool {
        self.subscriber_addr == self.ingest_addr
    }
}

/// Non-empty, trimmed value of an environment variable
fn string_var(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = string_var(key)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Invalid {} value '{}', using default", key, value);
            None
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "RELAY_SUBSCRIBER_ADDR",
        "RELAY_INGEST_ADDR",
        "RELAY_INGEST_PATH",
        "RELAY_SUBSCRIBER_QUEUE",
        "RELAY_MAX_BODY_BYTES",
        "RELAY_PING_INTERVAL_SECS",
        "RELAY_IDLE_TIMEOUT_SECS",
        "CHESS_API_URL",
        "CHESS_BOARD_PATH",
        "CHESS_API_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();
        let config = RelayConfig::from_env();
        assert_eq!(config, RelayConfig::default());
        assert!(!config.single_listener());
        assert_eq!(config.subscriber_addr.port(), 3001);
        assert_eq!(config.ingest_addr.port(), 3002);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("RELAY_SUBSCRIBER_ADDR", "127.0.0.1:9000");
        std::env::set_var("RELAY_INGEST_ADDR", "127.0.0.1:9000");
        std::env::set_var("RELAY_INGEST_PATH", "ingest");
        std::env::set_var("RELAY_PING_INTERVAL_SECS", "0");
        std::env::set_var("RELAY_IDLE_TIMEOUT_SECS", "15");
        std::env::set_var("CHESS_API_URL", "http://backend:8100/");

        let config = RelayConfig::from_env();
        assert!(config.single_listener());
        assert_eq!(config.ingest_path, "/ingest");
        assert_eq!(config.ping_interval, None);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.chess_api_url, "http://backend:8100");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("RELAY_INGEST_ADDR", "not an address");
        std::env::set_var("RELAY_SUBSCRIBER_QUEUE", "0");
        std::env::set_var("CHESS_API_TIMEOUT_SECS", "soon");
        std::env::set_var("CHESS_API_URL", "   ");

        let config = RelayConfig::from_env();
        let defaults = RelayConfig::default();
        assert_eq!(config.ingest_addr, defaults.ingest_addr);
        assert_eq!(config.subscriber_queue, defaults.subscriber_queue);
        assert_eq!(config.upstream_timeout, defaults.upstream_timeout);
        assert_eq!(config.chess_api_url, defaults.chess_api_url);

        clear_env();
    }
}

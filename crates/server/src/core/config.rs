//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::core::store::{Identity, MessageStore, Persistence};
use crate::realtime::{Hub, HubConfig, DEFAULT_OUTBOUND_QUEUE};

/// Configuration for the Convo server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket listener.
    /// Env: `HTTP_ADDR`
    pub http_addr: SocketAddr,
    /// sqlx connection string.
    /// Env: `DATABASE_URL`
    pub database_url: String,
    /// Per-connection outbound queue depth.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    pub outbound_queue_capacity: usize,
    /// WebSocket ping interval.
    /// Env: `HEARTBEAT_INTERVAL_SECS`
    pub heartbeat_interval: Duration,
    /// Close a socket that sends nothing for this long.
    /// Env: `IDLE_TIMEOUT_SECS`
    pub idle_timeout: Duration,
    /// Server-side typing auto-stop. Disabled unless set.
    /// Env: `TYPING_TIMEOUT_SECS`
    pub typing_timeout: Option<Duration>,
    /// Allowed CORS origin; permissive when unset.
    /// Env: `FRONTEND_URL`
    pub frontend_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            database_url: "sqlite://convo.sqlite".to_string(),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            heartbeat_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(60),
            typing_timeout: None,
            frontend_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(url) = lookup("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = url;
            }
        }

        if let Some(n) = parse_number(&lookup, "OUTBOUND_QUEUE_CAPACITY") {
            if n > 0 {
                config.outbound_queue_capacity = n as usize;
            }
        }

        if let Some(secs) = parse_number(&lookup, "HEARTBEAT_INTERVAL_SECS") {
            if secs > 0 {
                config.heartbeat_interval = Duration::from_secs(secs);
            }
        }

        if let Some(secs) = parse_number(&lookup, "IDLE_TIMEOUT_SECS") {
            if secs > 0 {
                config.idle_timeout = Duration::from_secs(secs);
            }
        }

        // 0 keeps the auto-stop disabled
        if let Some(secs) = parse_number(&lookup, "TYPING_TIMEOUT_SECS") {
            config.typing_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(url) = lookup("FRONTEND_URL") {
            if !url.is_empty() {
                config.frontend_url = Some(url);
            }
        }

        if config.idle_timeout <= config.heartbeat_interval {
            tracing::warn!(
                idle = ?config.idle_timeout,
                heartbeat = ?config.heartbeat_interval,
                "IDLE_TIMEOUT_SECS should exceed HEARTBEAT_INTERVAL_SECS"
            );
        }

        config
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_queue_capacity: self.outbound_queue_capacity,
            typing_timeout: self.typing_timeout,
        }
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(value = %raw, "Invalid {}, using default", key);
            None
        }
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hub: Hub,
    pub identity: Arc<dyn Identity>,
    pub persistence: Arc<dyn Persistence>,
    pub messages: Arc<dyn MessageStore>,
}

impl AppState {
    /// Wire a store implementing every collaborator trait into fresh state.
    pub fn new<S>(config: ServerConfig, store: Arc<S>) -> Self
    where
        S: Identity + Persistence + MessageStore + 'static,
    {
        let hub = Hub::new(store.clone(), config.hub_config());
        Self {
            config: Arc::new(config),
            hub,
            identity: store.clone(),
            persistence: store.clone(),
            messages: store,
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
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, SocketAddr::from(([0, 0, 0, 0], 3001)));
        assert_eq!(config.outbound_queue_capacity, DEFAULT_OUTBOUND_QUEUE);
        assert!(config.typing_timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("TYPING_TIMEOUT_SECS", "4"),
            ("OUTBOUND_QUEUE_CAPACITY", "32"),
        ]));
        assert_eq!(config.http_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.typing_timeout, Some(Duration::from_secs(4)));
        assert_eq!(config.hub_config().outbound_queue_capacity, 32);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("IDLE_TIMEOUT_SECS", "soon"),
            ("TYPING_TIMEOUT_SECS", "0"),
        ]));
        let default = ServerConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.idle_timeout, default.idle_timeout);
        assert!(config.typing_timeout.is_none());
    }
}

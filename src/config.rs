//! Environment configuration.

use std::env;
use std::time::Duration;

use stream_transport::TransportConfig;

/// Default cadence at which batched events are released to the engine.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(32);
/// Default upper bound on how long a programmatic scroll may go unsettled.
pub const DEFAULT_SCROLL_SETTLE_TIMEOUT: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub base_url: Option<String>,
    pub session_id: Option<String>,
    pub flush_ms: Option<u64>,
    pub reconnect_base_ms: Option<u64>,
    pub max_reconnects: Option<u32>,
    pub scroll_settle_ms: Option<u64>,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string_opt("CHAT_STREAM_BASE_URL"),
            session_id: env_string_opt("CHAT_STREAM_SESSION_ID"),
            flush_ms: env_parse_opt("CHAT_STREAM_FLUSH_MS"),
            reconnect_base_ms: env_parse_opt("CHAT_STREAM_RECONNECT_BASE_MS"),
            max_reconnects: env_parse_opt("CHAT_STREAM_MAX_RECONNECTS"),
            scroll_settle_ms: env_parse_opt("CHAT_STREAM_SCROLL_SETTLE_MS"),
            log_filter: env_string_opt("CHAT_STREAM_LOG"),
        }
    }

    /// Session configuration with every unset value at its default.
    pub fn session_config(&self) -> SessionConfig {
        let mut transport = TransportConfig::default();
        if let Some(base_url) = &self.base_url {
            transport.base_url = base_url.clone();
        }
        if let Some(session_id) = &self.session_id {
            transport.session_id = session_id.clone();
        }
        if let Some(millis) = self.reconnect_base_ms {
            transport.reconnect_base_delay = Duration::from_millis(millis);
        }
        if let Some(attempts) = self.max_reconnects {
            transport.max_reconnect_attempts = attempts;
        }

        let mut config = SessionConfig::from_transport(transport);
        if let Some(millis) = self.flush_ms.filter(|millis| *millis > 0) {
            config.flush_interval = Duration::from_millis(millis);
        }
        if let Some(millis) = self.scroll_settle_ms {
            config.scroll_settle_timeout = Duration::from_millis(millis);
        }
        config
    }
}

/// Everything a [`crate::Session`] needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    /// Batch flush cadence.
    pub flush_interval: Duration,
    pub scroll_settle_timeout: Duration,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::from_transport(TransportConfig::new(base_url, session_id))
    }

    pub fn from_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            scroll_settle_timeout: DEFAULT_SCROLL_SETTLE_TIMEOUT,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_scroll_settle_timeout(mut self, timeout: Duration) -> Self {
        self.scroll_settle_timeout = timeout;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_parse_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}

use std::time::Duration;

use crate::url::DEFAULT_BASE_URL;

/// Connection configuration for one conversation session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// HTTP(S) or WS(S) base URL of the server.
    pub base_url: String,
    /// Conversation session whose stream is followed.
    pub session_id: String,
    /// Upper bound for one WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Delay unit for reconnect backoff; attempt `n` waits `n` units.
    pub reconnect_base_delay: Duration,
    /// Cap applied to any single reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Reconnect attempts allowed before the transport gives up.
    pub max_reconnect_attempts: u32,
    /// Optional timeout for REST requests.
    pub request_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            session_id: String::new(),
            handshake_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            request_timeout: None,
        }
    }
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

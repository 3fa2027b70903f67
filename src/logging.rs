//! Tracing subscriber setup for binaries and tests.

use std::env;

use tracing_subscriber::EnvFilter;

/// Filter used when neither `CHAT_STREAM_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Resolves the filter directive: explicit value, then `CHAT_STREAM_LOG`, then
/// `RUST_LOG`, then [`DEFAULT_LOG_FILTER`].
pub fn resolve_filter(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env::var("CHAT_STREAM_LOG").ok())
        .or_else(|| env::var("RUST_LOG").ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Installs a stderr fmt subscriber. Returns false when a global subscriber
/// was already installed; calling this more than once is harmless.
pub fn init_tracing(explicit: Option<&str>) -> bool {
    let directive = resolve_filter(explicit);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|error| {
        eprintln!("invalid log filter '{directive}': {error}; using '{DEFAULT_LOG_FILTER}'");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::{init_tracing, resolve_filter};

    #[test]
    fn explicit_filter_wins() {
        assert_eq!(resolve_filter(Some("chat_stream=trace")), "chat_stream=trace");
    }

    #[test]
    fn second_initialization_is_rejected_quietly() {
        init_tracing(Some("warn"));
        assert!(!init_tracing(Some("debug")));
    }
}

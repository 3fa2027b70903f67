use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

fn fatal_connect_error_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)unsupported.?url.?scheme|url.?error|invalid.?(uri|url|header)|certificate")
            .expect("connect error regex must compile")
    })
}

/// Returns whether a failed connection attempt is worth retrying.
///
/// Server answers that reject the session outright (4xx other than 408/429) and
/// client-side configuration faults are final; everything else is transient.
pub fn is_retryable_connect_error(status: Option<u16>, error_text: &str) -> bool {
    match status {
        Some(408 | 429) => true,
        Some(status) if (400..500).contains(&status) => false,
        Some(_) => true,
        None => !fatal_connect_error_regex().is_match(error_text),
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `base × attempt`, capped at `max`.
pub fn reconnect_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    base.saturating_mul(attempt.max(1)).min(max)
}

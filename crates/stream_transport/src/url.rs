use url::Url;

use crate::error::TransportError;

/// Default server base URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

const API_PREFIX: [&str; 2] = ["api", "v1"];

/// Builds the WebSocket stream endpoint for a session.
///
/// `http`/`https` bases are mapped to `ws`/`wss`; an `/api/v1` suffix already
/// present on the base is not repeated.
pub fn stream_url(base_url: &str, session_id: &str) -> Result<Url, TransportError> {
    let mut url = api_url(base_url, &["chats", session_id, "stream"], session_id)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("cannot switch to {scheme}")))?;
    Ok(url)
}

/// Builds the REST endpoint listing the persisted blocks of a session.
pub fn blocks_url(base_url: &str, session_id: &str) -> Result<Url, TransportError> {
    let mut url = api_url(base_url, &["chats", session_id, "blocks"], session_id)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("cannot switch to {scheme}")))?;
    Ok(url)
}

fn api_url(base_url: &str, segments: &[&str], session_id: &str) -> Result<Url, TransportError> {
    if session_id.trim().is_empty() {
        return Err(TransportError::InvalidUrl("session id is empty".to_string()));
    }

    let base = if base_url.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        base_url.trim()
    };
    let mut url =
        Url::parse(base).map_err(|error| TransportError::InvalidUrl(format!("{base}: {error}")))?;
    let has_prefix = url
        .path()
        .trim_end_matches('/')
        .ends_with(&format!("/{}", API_PREFIX.join("/")));

    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(format!("{base}: cannot be a base")))?;
        path.pop_if_empty();
        if !has_prefix {
            path.extend(API_PREFIX);
        }
        path.extend(segments);
    }
    url.set_query(None);
    Ok(url)
}

use reqwest::Url;

use crate::error::HttpTaskError;

/// Default local task server.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8007";

/// Query parameter that carries the stream handle on the events endpoint.
pub const HANDLE_QUERY_PARAM: &str = "event_file_id";

/// Join a server root and an endpoint path.
///
/// Blank roots fall back to [`DEFAULT_BASE_URL`]; duplicate slashes at the seam
/// are collapsed and any path prefix on the root is kept.
pub fn endpoint_url(base_url: &str, path: &str) -> Result<Url, HttpTaskError> {
    let base = if base_url.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        base_url.trim()
    };

    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    );
    let url = Url::parse(&joined).map_err(|error| HttpTaskError::InvalidBaseUrl(format!("{joined}: {error}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HttpTaskError::InvalidBaseUrl(format!(
            "unsupported scheme '{}' in {joined}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Events endpoint for one run: `{events}?event_file_id={handle}`.
pub fn events_url(base_url: &str, path: &str, handle: &str) -> Result<Url, HttpTaskError> {
    let mut url = endpoint_url(base_url, path)?;
    url.query_pairs_mut().append_pair(HANDLE_QUERY_PARAM, handle);
    Ok(url)
}

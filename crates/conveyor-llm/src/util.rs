//! Helpers shared by the HTTP providers

use crate::error::Error;

/// Minimum key length to display partial key
const MIN_KEY_LENGTH_FOR_PARTIAL_DISPLAY: usize = 8;

/// Number of characters to show at start/end of masked key
const KEY_MASK_VISIBLE_CHARS: usize = 4;

/// Sensitive patterns to filter from error messages
const SENSITIVE_PATTERNS: &[&str] = &[
    "api_key",
    "api-key",
    "apikey",
    "authorization",
    "bearer",
    "token",
    "secret",
    "password",
];

/// Mask an API key for safe display in logs
///
/// ```
/// use conveyor_llm::util::mask_api_key;
/// assert_eq!(mask_api_key("sk-1234567890abcdef"), "sk-1...cdef");
/// assert_eq!(mask_api_key("short"), "****");
/// ```
#[must_use]
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= MIN_KEY_LENGTH_FOR_PARTIAL_DISPLAY || !key.is_ascii() {
        return "****".to_string();
    }
    format!(
        "{}...{}",
        &key[..KEY_MASK_VISIBLE_CHARS],
        &key[key.len() - KEY_MASK_VISIBLE_CHARS..]
    )
}

/// Strip credentials and local paths from a provider error body.
#[must_use]
pub fn sanitize_api_error(error: &str) -> String {
    let lower = error.to_lowercase();

    if SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "The provider rejected the request credentials.".to_string();
    }

    if lower.contains("/home") || lower.contains("/root") || lower.contains("\\users\\") {
        return "An internal provider error occurred.".to_string();
    }

    if lower.contains("model") && (lower.contains("not found") || lower.contains("pull")) {
        return "Model not available on the provider.".to_string();
    }

    if error.len() < 200 {
        return error.to_string();
    }

    "The provider returned an error.".to_string()
}

/// Map a non-success HTTP status and body to an [`Error`].
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> Error {
    let message = format!("{}: {}", status.as_u16(), sanitize_api_error(body));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimit
    } else if status.is_server_error() {
        Error::Unavailable(message)
    } else {
        Error::Api(message)
    }
}

/// Map a transport error to an [`Error`].
pub(crate) fn transport_error(error: &reqwest::Error, timeout_ms: u64) -> Error {
    if error.is_timeout() {
        Error::Timeout(timeout_ms)
    } else {
        Error::Network(sanitize_api_error(&error.to_string()))
    }
}

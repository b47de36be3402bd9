//! Input shape checks for call-control commands.
//!
//! These run before anything touches the session store or the provider.
//! Reachability (e.g. of a transfer target) is left to the provider.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::core::error::{SessionError, SessionResult};

/// Longest accepted call or conference id.
pub const MAX_ID_LEN: usize = 128;

/// Longest accepted DTMF string.
pub const MAX_DTMF_LEN: usize = 64;

/// Provider ids are UUIDs in practice; accept any short token of safe characters
/// so they can be placed in URL paths unescaped.
static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").expect("valid id regex"));

/// E.164: up to 15 digits, no leading zero, optional `+`.
static E164_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9][0-9]{6,14}$").expect("valid E.164 regex"));

/// Digits, `*`, `#`, and the pause characters `p` (500ms) / `w` (1s).
static DTMF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9*#pw]+$").expect("valid DTMF regex"));

pub fn validate_id(kind: &str, id: &str) -> SessionResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN || !ID_PATTERN.is_match(id) {
        return Err(SessionError::InvalidInput(format!("invalid {kind} id '{id}'")));
    }
    Ok(())
}

pub fn validate_call_id(id: &str) -> SessionResult<()> {
    validate_id("call", id)
}

/// Validate an E.164 number and return it without the leading `+`.
pub fn normalize_e164(number: &str) -> SessionResult<String> {
    let compact: String = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if !E164_PATTERN.is_match(&compact) {
        return Err(SessionError::InvalidInput(format!(
            "'{number}' is not an E.164 phone number"
        )));
    }
    Ok(compact.trim_start_matches('+').to_string())
}

pub fn validate_dtmf(digits: &str) -> SessionResult<()> {
    if digits.len() > MAX_DTMF_LEN || !DTMF_PATTERN.is_match(digits) {
        return Err(SessionError::InvalidInput(format!(
            "DTMF digits must match [0-9*#pw]{{1,{MAX_DTMF_LEN}}}"
        )));
    }
    Ok(())
}

/// Text for speech must be non-blank and at most `max_chars` characters.
pub fn validate_speak_text(text: &str, max_chars: usize) -> SessionResult<()> {
    if text.trim().is_empty() {
        return Err(SessionError::InvalidInput("text must not be empty".to_string()));
    }
    let chars = text.chars().count();
    if chars > max_chars {
        return Err(SessionError::InvalidInput(format!(
            "text is {chars} characters, limit is {max_chars}"
        )));
    }
    Ok(())
}

/// Check that `raw` is an absolute http(s) URL with a host.
pub fn validate_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{raw}': {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("URL '{raw}' must use http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("URL '{raw}' has no host"));
    }
    Ok(url)
}

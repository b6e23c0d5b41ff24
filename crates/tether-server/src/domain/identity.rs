//! Client identity rules.
//!
//! Every connection is registered under the id taken from the handshake
//! header.  The value is trimmed, then must be non-empty, at most
//! [`MAX_CLIENT_ID_LEN`] bytes and free of control characters.  A missing
//! header either gets a fresh UUID or is rejected, depending on
//! configuration.

use thiserror::Error;
use uuid::Uuid;

/// Longest accepted client id, in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Why a client id was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("client id header is missing")]
    Missing,

    #[error("client id is empty")]
    Empty,

    #[error("client id is {len} bytes long (max {MAX_CLIENT_ID_LEN})")]
    TooLong { len: usize },

    #[error("client id contains control characters")]
    ControlCharacter,

    #[error("client id is not valid text")]
    NotText,
}

/// Checks a header value and returns the trimmed id.
pub fn validate_client_id(raw: &str) -> Result<String, IdentityError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(IdentityError::Empty);
    }
    if id.len() > MAX_CLIENT_ID_LEN {
        return Err(IdentityError::TooLong { len: id.len() });
    }
    if id.chars().any(char::is_control) {
        return Err(IdentityError::ControlCharacter);
    }
    Ok(id.to_string())
}

/// Derives the registry key for a connection.
///
/// `header` is `None` when the header was absent and `Some(Err(()))` when it
/// was present but not valid text.
pub fn resolve_client_id(
    header: Option<Result<&str, ()>>,
    assign_missing: bool,
) -> Result<String, IdentityError> {
    match header {
        Some(Ok(raw)) => validate_client_id(raw),
        Some(Err(())) => Err(IdentityError::NotText),
        None if assign_missing => Ok(Uuid::new_v4().to_string()),
        None => Err(IdentityError::Missing),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Proximity-tag payloads.
//!
//! A tag that launches the unlock flow carries a text record of the form
//! `unlock/<token>`. The session core only passes the token along; this is
//! the parsing half that runs before a session starts.

const UNLOCK_PREFIX: &str = "unlock/";

/// Token carried by an `unlock/<token>` payload.
pub fn parse_unlock_token(payload: &str) -> Option<String> {
    let token = payload.trim().strip_prefix(UNLOCK_PREFIX)?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Same as [`parse_unlock_token`] for raw record bytes. Non UTF-8 payloads
/// carry no token.
pub fn parse_unlock_record(payload: &[u8]) -> Option<String> {
    std::str::from_utf8(payload).ok().and_then(parse_unlock_token)
}

use http::StatusCode;

/// Status used when a response leaves its status unset (0).
pub const DEFAULT_STATUS: u16 = 200;

/// Standard reason phrase for `code`, or `""` for unregistered codes.
pub fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("")
}

/// `"{code} {reason}"`, e.g. `"404 Not Found"`.
pub fn status_line(code: u16) -> String {
    format!("{code} {}", reason_phrase(code))
}

/// Statuses whose responses must not carry a body.
pub fn forbids_body(code: u16) -> bool {
    matches!(code, 101 | 204 | 205 | 304)
}

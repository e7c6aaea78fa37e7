//! Header redaction applied to everything a run persists or returns.

use crate::model::{Headers, NetworkLog};

pub const REDACTED: &str = "[REDACTED]";

/// Header names whose values never leave the harness. Matched case-insensitively.
pub const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "x-api-key", "x-auth-token"];

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

pub fn redact_headers(headers: &mut Headers) {
    for (name, value) in headers.iter_mut() {
        if is_sensitive(name) {
            *value = REDACTED.to_string();
        }
    }
}

/// Redact request and response headers of every entry.
pub fn redact_network_logs(logs: &mut [NetworkLog]) {
    for log in logs {
        redact_headers(&mut log.request.headers);
        if let Some(response) = log.response.as_mut() {
            redact_headers(&mut response.headers);
        }
    }
}

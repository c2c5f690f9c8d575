//! Header helpers shared by the adapters.

use std::time::Duration;

use rcc_provider_core::{Headers, header_get, header_set};

pub fn set_bearer(headers: &mut Headers, token: &str) {
    header_set(headers, "authorization", format!("Bearer {token}"));
}

pub fn set_accept_json(headers: &mut Headers) {
    header_set(headers, "accept", "application/json");
}

pub fn set_content_type_json(headers: &mut Headers) {
    header_set(headers, "content-type", "application/json");
}

pub fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

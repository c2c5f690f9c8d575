pub mod anthropic;
pub mod gemini;
pub mod iflow;
pub mod openai;
pub mod qwen;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Synthesised completion id for upstreams that do not return one.
pub(crate) fn gen_response_id(prefix: &str) -> String {
    let mut raw = [0u8; 12];
    rand::rng().fill_bytes(&mut raw);
    let mut hex = String::with_capacity(prefix.len() + 1 + raw.len() * 2);
    hex.push_str(prefix);
    hex.push('-');
    for byte in raw {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

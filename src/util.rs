use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Critical sections never panic while holding a lock, so a poisoned lock
/// still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Strips trailing slashes and a trailing `/api` segment so endpoint paths
/// can always be joined as `/api/...`.
pub fn normalize_server_url(value: &str) -> String {
    let mut url = value.trim().trim_end_matches('/').to_string();
    if let Some(stripped) = url.strip_suffix("/api") {
        url = stripped.trim_end_matches('/').to_string();
    }
    url
}

pub fn derive_ws_url(server_url: &str) -> String {
    let mut url = match Url::parse(server_url) {
        Ok(url) => url,
        Err(_) => return server_url.to_string(),
    };
    match url.scheme() {
        "http" => {
            let _ = url.set_scheme("ws");
        }
        "https" => {
            let _ = url.set_scheme("wss");
        }
        "ws" | "wss" => {}
        _ => return server_url.to_string(),
    }
    url.to_string()
}

/// Socket.IO websocket endpoint for a panel server URL.
pub fn push_url(server_url: &str) -> String {
    let base = derive_ws_url(&normalize_server_url(server_url));
    format!(
        "{}/socket.io/?EIO=4&transport=websocket",
        base.trim_end_matches('/')
    )
}

/// `123456` -> `123,456`
pub fn format_thousands(value: impl Into<i128>) -> String {
    let value: i128 = value.into();
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub(crate) fn or_dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| "-".to_string())
}

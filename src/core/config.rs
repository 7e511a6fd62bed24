use std::path::Path;
use std::time::Duration;

pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_SERVER_MODE: &str = "CLEARGATE_SERVER_MODE";
pub const ENV_POLL_INTERVAL_MS: &str = "CLEARGATE_POLL_MS";
pub const ENV_DEADLINE_SECS: &str = "CLEARGATE_DEADLINE_SECS";

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is **auto-discovery** (see `session::chromium::find_chrome_executable()`).
/// This function only returns a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

/// Server mode wraps every browser session in its own virtual display, for
/// hosts without a physical one. Default: off (local, visible browser).
///
/// Enabled by the `--server` flag or by setting `CLEARGATE_SERVER_MODE=1`.
pub fn server_mode_from_env() -> bool {
    let Ok(v) = std::env::var(ENV_SERVER_MODE) else {
        return false;
    };
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Fixed wait between orchestrator polling rounds. Default: 2000 ms.
pub fn poll_interval() -> Duration {
    let ms = std::env::var(ENV_POLL_INTERVAL_MS)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(2_000);
    Duration::from_millis(ms)
}

/// Optional wall-clock ceiling on a whole bypass, on top of the attempt
/// budget. Unset by default, so the attempt count stays the only bound.
pub fn deadline() -> Option<Duration> {
    std::env::var(ENV_DEADLINE_SECS)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub fn port_from_env() -> Option<u16> {
    for k in ["CLEARGATE_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

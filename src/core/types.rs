use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::app_state::Settings;

/// Retry budget applied when the caller omits `retries`.
pub const DEFAULT_RETRIES: u32 = 5;

/// Query parameters shared by `/cookies` and `/html`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClearanceQuery {
    /// The URL of the challenge-protected website.
    pub url: String,
    /// Upstream proxy (e.g. `http://proxy:port`). Empty string means none.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Number of polling rounds before giving up.
    #[serde(default)]
    pub retries: Option<u32>,
}

/// One clearance job, fixed at construction. The target must pass the safety
/// gate before any browser resource is allocated for it.
#[derive(Debug, Clone)]
pub struct BypassRequest {
    pub target: String,
    pub proxy: Option<String>,
    pub retries: u32,
    /// Per-round orchestrator logging. Set from service settings, not ambient state.
    pub log_rounds: bool,
}

impl BypassRequest {
    pub fn from_query(q: &ClearanceQuery, settings: &Settings) -> Self {
        Self {
            target: q.url.clone(),
            proxy: q.proxy.clone().filter(|p| !p.trim().is_empty()),
            // The budget is a positive integer; a literal 0 would mean "never poll".
            retries: q.retries.unwrap_or(DEFAULT_RETRIES).max(1),
            log_rounds: settings.log_rounds,
        }
    }
}

/// Terminal result of a successful bypass.
#[derive(Debug, Clone, Serialize)]
pub struct BypassOutcome {
    pub cleared: bool,
    /// Polling rounds consumed, reported for observability.
    pub attempts: u32,
    /// Cookie jar as name -> value; name collisions resolve last-write-wins.
    pub cookies: HashMap<String, String>,
    pub user_agent: String,
    /// Rendered markup, captured only when the caller asked for it.
    pub html: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CookieResponse {
    pub cookies: HashMap<String, String>,
    pub user_agent: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

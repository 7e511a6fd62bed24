//! Target URL safety gate.
//!
//! Rejects local-file schemes and targets whose *literal* hostname is a
//! loopback, unspecified, or private-network address, so the service cannot
//! be pointed at its own host or internal network. Matching is purely
//! lexical — no DNS resolution happens here, so a public name resolving to a
//! private address still passes. This is a cheap syntactic gate, not a full
//! SSRF defense.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

static BLOCKED_HOST: OnceLock<Regex> = OnceLock::new();

fn blocked_host_matcher() -> &'static Regex {
    BLOCKED_HOST.get_or_init(|| {
        Regex::new(
            r"^(127\.0\.0\.1|localhost|0\.0\.0\.0|::1|10\.\d+\.\d+\.\d+|172\.1[6-9]\.\d+\.\d+|172\.2[0-9]\.\d+\.\d+|172\.3[0-1]\.\d+\.\d+|192\.168\.\d+\.\d+)$",
        )
        .expect("valid blocked-host pattern")
    })
}

/// Returns `false` for `file://` URLs, unparseable or host-less URLs, and
/// hostnames inside loopback/private ranges. Called once per request, before
/// any browser resource is allocated.
pub fn is_safe(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() == "file" {
        return false;
    }
    match url.host_str() {
        Some(host) => {
            // IPv6 hosts serialize bracketed ([::1]); strip before matching.
            let host = host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_ascii_lowercase();
            !blocked_host_matcher().is_match(&host)
        }
        None => false,
    }
}

//! Full-pipeline tests: the clearance flow driven through a scripted
//! browser fixture, from `bypass::clear` up to the HTTP surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::Url;

use cleargate::bypass::{self, BypassError, ChallengeState};
use cleargate::core::types::{BypassRequest, CookieResponse, ErrorResponse};
use cleargate::session::{BypassSession, SessionLauncher};
use cleargate::{AppState, Settings};

/// Launcher handing out scripted sessions; counts opens and closes so the
/// release contract is checkable from the outside.
struct FixtureLauncher {
    script: Vec<ChallengeState>,
    fail_detect_on: Option<usize>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FixtureLauncher {
    fn new(script: Vec<ChallengeState>) -> Self {
        Self {
            script,
            fail_detect_on: None,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SessionLauncher for FixtureLauncher {
    async fn open(&self, _target: &Url, _proxy: Option<&str>) -> Result<Box<dyn BypassSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixtureSession {
            script: self.script.clone(),
            cursor: 0,
            fail_detect_on: self.fail_detect_on,
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct FixtureSession {
    script: Vec<ChallengeState>,
    cursor: usize,
    fail_detect_on: Option<usize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BypassSession for FixtureSession {
    async fn detect(&mut self) -> Result<ChallengeState> {
        self.cursor += 1;
        if self.fail_detect_on == Some(self.cursor) {
            return Err(anyhow!("renderer crashed"));
        }
        let idx = (self.cursor - 1).min(self.script.len() - 1);
        Ok(self.script[idx])
    }

    async fn activate_widget(&mut self) -> Result<bool> {
        Ok(true)
    }

    async fn cookie_jar(&mut self) -> Result<Vec<(String, String)>> {
        // Duplicate name on purpose: the extractor keeps the last write.
        Ok(vec![
            ("cf_clearance".into(), "stale-token".into()),
            ("sid".into(), "abc123".into()),
            ("cf_clearance".into(), "fresh-token".into()),
        ])
    }

    async fn user_agent(&mut self) -> Result<String> {
        Ok("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36".into())
    }

    async fn page_html(&mut self) -> Result<String> {
        Ok("<html><body>welcome through the gate</body></html>".into())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_settings() -> Settings {
    Settings {
        poll_interval: Duration::from_millis(1),
        log_rounds: false,
        ..Settings::default()
    }
}

fn state_with(launcher: FixtureLauncher) -> (Arc<AppState>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let opens = Arc::clone(&launcher.opens);
    let closes = Arc::clone(&launcher.closes);
    let state = AppState::new(fast_settings()).with_launcher(Arc::new(launcher));
    (Arc::new(state), opens, closes)
}

fn request(target: &str, retries: u32) -> BypassRequest {
    BypassRequest {
        target: target.into(),
        proxy: None,
        retries,
        log_rounds: false,
    }
}

// ── Pipeline: release contract ───────────────────────────────────────────────

#[tokio::test]
async fn session_closed_exactly_once_on_clearance() {
    use ChallengeState::*;
    let (state, opens, closes) = state_with(FixtureLauncher::new(vec![Active, Cleared]));

    let outcome = bypass::clear(&state, &request("https://example.com", 5), false)
        .await
        .expect("should clear");
    assert!(outcome.cleared);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_closed_exactly_once_on_exhaustion() {
    let (state, _, closes) = state_with(FixtureLauncher::new(vec![ChallengeState::Active]));

    let err = bypass::clear(&state, &request("https://example.com", 3), false)
        .await
        .expect_err("should exhaust");
    match err {
        BypassError::ChallengeNotCleared { attempts } => assert_eq!(attempts, 3),
        other => panic!("expected ChallengeNotCleared, got {other:?}"),
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_closed_exactly_once_when_detector_raises_mid_loop() {
    let mut launcher = FixtureLauncher::new(vec![ChallengeState::Active]);
    launcher.fail_detect_on = Some(2);
    let (state, opens, closes) = state_with(launcher);

    let err = bypass::clear(&state, &request("https://example.com", 5), false)
        .await
        .expect_err("should error");
    assert!(matches!(err, BypassError::DriverFailure(_)), "got {err:?}");
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsafe_target_never_opens_a_session() {
    let (state, opens, closes) = state_with(FixtureLauncher::new(vec![ChallengeState::Cleared]));

    let err = bypass::clear(&state, &request("http://192.168.1.1/admin", 5), false)
        .await
        .expect_err("should be rejected");
    assert!(matches!(err, BypassError::InvalidTarget(_)), "got {err:?}");
    assert_eq!(opens.load(Ordering::SeqCst), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn cookie_collisions_resolve_last_write_wins() {
    let (state, _, _) = state_with(FixtureLauncher::new(vec![ChallengeState::Cleared]));

    let outcome = bypass::clear(&state, &request("https://example.com", 5), false)
        .await
        .expect("should clear");
    assert_eq!(outcome.cookies.len(), 2);
    assert_eq!(outcome.cookies["cf_clearance"], "fresh-token");
    assert_eq!(outcome.cookies["sid"], "abc123");
    assert!(outcome.html.is_none());
}

#[tokio::test]
async fn cookie_mapping_survives_a_serialization_round_trip() {
    let (state, _, _) = state_with(FixtureLauncher::new(vec![ChallengeState::Cleared]));

    let outcome = bypass::clear(&state, &request("https://example.com", 5), false)
        .await
        .expect("should clear");
    let serialized = serde_json::to_string(&outcome.cookies).expect("serialize");
    let parsed: HashMap<String, String> = serde_json::from_str(&serialized).expect("parse");
    assert_eq!(parsed, outcome.cookies);
}

// ── HTTP surface ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cookies_endpoint_end_to_end() {
    use ChallengeState::*;
    let (state, _, closes) = state_with(FixtureLauncher::new(vec![Active, Cleared]));

    let response = cleargate::http::router(state)
        .oneshot(
            Request::builder()
                .uri("/cookies?url=https://example.com&proxy=&retries=3")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-clearance-attempts")
            .and_then(|v| v.to_str().ok()),
        Some("2")
    );

    let body = response.into_body().collect().await.expect("body").to_bytes();
    let parsed: CookieResponse = serde_json::from_slice(&body).expect("cookie response");
    assert!(!parsed.cookies.is_empty());
    assert!(!parsed.user_agent.is_empty());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn html_endpoint_carries_metadata_in_headers() {
    let (state, _, _) = state_with(FixtureLauncher::new(vec![ChallengeState::Cleared]));

    let response = cleargate::http::router(state)
        .oneshot(
            Request::builder()
                .uri("/html?url=https://example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .expect("content type")
        .starts_with("text/html"));
    assert_eq!(
        response
            .headers()
            .get("user_agent")
            .and_then(|v| v.to_str().ok()),
        Some("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
    );

    let header_cookies: HashMap<String, String> = serde_json::from_str(
        response
            .headers()
            .get("cookies")
            .and_then(|v| v.to_str().ok())
            .expect("cookies header"),
    )
    .expect("cookies header JSON");
    assert_eq!(header_cookies["cf_clearance"], "fresh-token");

    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(
        body.as_ref(),
        b"<html><body>welcome through the gate</body></html>"
    );
}

#[tokio::test]
async fn private_target_is_a_client_error() {
    let (state, opens, _) = state_with(FixtureLauncher::new(vec![ChallengeState::Cleared]));

    let response = cleargate::http::router(state)
        .oneshot(
            Request::builder()
                .uri("/cookies?url=http://10.0.0.5/internal")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let parsed: ErrorResponse = serde_json::from_slice(&body).expect("error response");
    assert!(parsed.error.contains("invalid target"));
    assert_eq!(opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unresolved_challenge_is_a_server_error() {
    let (state, _, closes) = state_with(FixtureLauncher::new(vec![ChallengeState::Active]));

    let response = cleargate::http::router(state)
        .oneshot(
            Request::builder()
                .uri("/cookies?url=https://example.com&retries=3")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let parsed: ErrorResponse = serde_json::from_slice(&body).expect("error response");
    assert!(parsed.error.contains("not cleared after 3 attempts"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_defaults_to_five() {
    use ChallengeState::*;
    // Clears on the fifth poll — only reachable if the default budget is 5.
    let (state, _, _) = state_with(FixtureLauncher::new(vec![
        Active, Active, Active, Active, Cleared,
    ]));

    let response = cleargate::http::router(state)
        .oneshot(
            Request::builder()
                .uri("/cookies?url=https://example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-clearance-attempts")
            .and_then(|v| v.to_str().ok()),
        Some("5")
    );
}

#[tokio::test]
async fn health_endpoint_reports_service_name() {
    let (state, _, _) = state_with(FixtureLauncher::new(vec![ChallengeState::Cleared]));

    let response = cleargate::http::router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("health JSON");
    assert_eq!(parsed["service"], "cleargate");
}

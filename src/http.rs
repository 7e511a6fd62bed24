//! HTTP surface: thin transport over the bypass pipeline.
//!
//! `/cookies` returns the clearance cookies and user agent as JSON;
//! `/html` returns the raw rendered markup as the body, with the serialized
//! cookie mapping and user agent carried in response headers so the body
//! stays pure `text/html`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::bypass::{self, BypassError};
use crate::core::types::{BypassRequest, ClearanceQuery, CookieResponse, ErrorResponse};
use crate::core::AppState;

const ATTEMPTS_HEADER: HeaderName = HeaderName::from_static("x-clearance-attempts");

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/cookies", get(get_cookies))
        .route("/html", get(get_html))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cleargate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_cookies(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClearanceQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let req = BypassRequest::from_query(&q, &state.settings);
    let outcome = bypass::clear(&state, &req, false)
        .await
        .map_err(error_response)?;

    let headers = [(ATTEMPTS_HEADER, HeaderValue::from(outcome.attempts))];
    Ok((
        headers,
        Json(CookieResponse {
            cookies: outcome.cookies,
            user_agent: outcome.user_agent,
        }),
    ))
}

async fn get_html(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClearanceQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let req = BypassRequest::from_query(&q, &state.settings);
    let outcome = bypass::clear(&state, &req, true)
        .await
        .map_err(error_response)?;

    let cookie_json = serde_json::to_string(&outcome.cookies)
        .map_err(|e| internal_error(format!("cookie serialization failed: {e}")))?;
    let cookie_header = HeaderValue::from_str(&cookie_json)
        .map_err(|e| internal_error(format!("cookie header encoding failed: {e}")))?;
    let ua_header = HeaderValue::from_str(&outcome.user_agent)
        .map_err(|e| internal_error(format!("user agent header encoding failed: {e}")))?;

    let mut response = Response::new(Body::from(outcome.html.unwrap_or_default()));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(HeaderName::from_static("cookies"), cookie_header);
    headers.insert(HeaderName::from_static("user_agent"), ua_header);
    headers.insert(ATTEMPTS_HEADER, HeaderValue::from(outcome.attempts));
    Ok(response)
}

fn error_response(err: BypassError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        BypassError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        BypassError::ChallengeNotCleared { .. } | BypassError::DriverFailure(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error!("bypass failed: {}", err);
    (status, Json(ErrorResponse { error: err.to_string() }))
}

fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    error!("{}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

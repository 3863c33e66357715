//! Cross-cutting HTTP middleware: request correlation ids and API rate
//! limiting.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::extractors::RequestId;
use super::rate_limit::{RateCategory, RateDecision};
use super::responses::{ApiError, ErrorCode};
use super::AppState;

/// Attach a correlation id to the request extensions and echo it back in the
/// `x-request-id` response header.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    request.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Enforce the per-category API budgets. Feed and media endpoints are not
/// metered; the health probe is exempt so liveness checks never 429.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let Some(category) = categorize(request.method(), path) else {
        return next.run(request).await;
    };

    let decision = state.rate_limiter.check(category);
    if !decision.allowed {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0)
            .unwrap_or_else(Uuid::new_v4);
        let mut response =
            ApiError::new(ErrorCode::RateLimited, "rate limit exceeded", request_id)
                .into_response();
        apply_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}

fn categorize(method: &Method, path: &str) -> Option<RateCategory> {
    if !path.starts_with("/api/v1") || path == "/api/v1/health" {
        return None;
    }

    if path.ends_with("/refresh") || path == "/api/v1/refresh-all" {
        Some(RateCategory::Trigger)
    } else if matches!(*method, Method::GET | Method::HEAD) {
        Some(RateCategory::Read)
    } else {
        Some(RateCategory::Write)
    }
}

fn apply_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

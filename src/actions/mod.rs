pub mod contact;
pub mod giving;
pub mod schedule;
pub mod webhooks;

use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::ratelimit::{RateLimitDecision, SlidingWindow, client_ip};

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct DataListResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Apply `limiter` to the request's client. `Err` carries the finished 429
/// response with standard rate-limit headers.
pub fn check_rate_limit(limiter: &SlidingWindow, headers: &HeaderMap) -> Result<(), Response> {
    let decision = limiter.check(&client_ip(headers));
    if decision.allowed {
        return Ok(());
    }

    metrics::counter!("shiloh.ratelimit.rejected").increment(1);
    Err(rate_limited(&decision))
}

fn rate_limited(decision: &RateLimitDecision) -> Response {
    let mut response = json_error(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many requests, please try again later",
    );
    let headers = response.headers_mut();
    if let Ok(value) = decision.retry_after_secs.to_string().parse() {
        headers.insert("Retry-After", value);
    }
    if let Ok(value) = decision.limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = decision.remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
    response
}

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sonic_rs::JsonValueTrait;
use std::net::SocketAddr;
use std::time::Duration;

use crate::{error::AppError, services::cache, state::AppState};

/// Registration attempts allowed per IP inside one window.
const REGISTER_LIMIT: i64 = 3;
/// Failed login attempts allowed per email inside one window.
const LOGIN_LIMIT: i64 = 5;
/// Window for both counters, 12 hours.
const WINDOW: Duration = Duration::from_secs(43200);

/// Extracts the real IP address from the request extensions.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A middleware that rate limits user registration per source IP.
pub async fn rate_limit_register(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let key = cache::register_rate_key(&ip);

    let count = match state.cache.incr(&key, WINDOW).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!("❌ Rate-limit counter unavailable: {}", e);
            // counter loss must not lock everyone out of registration
            return next.run(req).await;
        }
    };

    if count > REGISTER_LIMIT {
        tracing::warn!("⏳ Registration rate limit hit for {}", ip);
        return AppError::RateLimitExceeded(
            "Registration limit exceeded. Try again later".to_string(),
        )
        .into_response();
    }

    next.run(req).await
}

/// A middleware that rate limits login attempts per email.
///
/// The counter only advances on failed attempts and is cleared by a
/// successful login, so a legitimate user is never locked out by their own
/// successful sessions.
pub async fn rate_limit_login(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    fn extract_email_from_body(body_bytes: &[u8]) -> Option<String> {
        let json = sonic_rs::from_slice::<sonic_rs::Value>(body_bytes).ok()?;
        json.get("email").and_then(|v| v.as_str()).map(|s| s.to_lowercase())
    }

    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    let email = extract_email_from_body(&body_bytes).unwrap_or_else(|| "unknown".to_string());
    let key = cache::login_rate_key(&email);

    if let Some(attempts) = state.cache.get::<i64>(&key).await {
        if attempts >= LOGIN_LIMIT {
            tracing::warn!("⏳ Login rate limit hit for {}", email);
            return AppError::Authentication(
                "Too many failed login attempts. Try again later".to_string(),
            )
            .into_response();
        }
    }

    let new_req = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(new_req).await;

    if is_failed_credential_attempt(response.status()) {
        if let Err(e) = state.cache.incr(&key, WINDOW).await {
            tracing::error!("❌ Failed to record login attempt: {}", e);
        }
    } else if response.status().is_success() {
        state.cache.delete(&key).await;
    }

    response
}

/// Only rejected credentials advance the lockout counter; malformed
/// payloads and other client errors do not burn attempts for that email.
fn is_failed_credential_attempt(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejected_credentials_count_toward_lockout() {
        assert!(is_failed_credential_attempt(StatusCode::UNAUTHORIZED));
        assert!(!is_failed_credential_attempt(StatusCode::BAD_REQUEST));
        assert!(!is_failed_credential_attempt(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_failed_credential_attempt(StatusCode::OK));
    }
}

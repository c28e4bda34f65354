use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tower_cookies::Cookies;

use crate::{error::AppError, services::cache, state::AppState};

/// A middleware that verifies the CSRF token on mutating requests.
///
/// The double-submit pattern: the token must arrive both as a cookie and as
/// the `x-csrf-token` header, the two must match, and the token must still
/// be registered in the cache store.
pub async fn verify_csrf(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::GET
        || req.method() == Method::HEAD
        || req.method() == Method::OPTIONS
    {
        tracing::debug!("✅ CSRF exemption: {} request", req.method());
        return next.run(req).await;
    }

    let csrf_token_cookie = match cookies.get("csrf_token") {
        Some(c) => c.value().to_string(),
        None => {
            tracing::warn!("❌ CSRF: csrf_token cookie not found");
            return AppError::Authentication("Missing CSRF token cookie".to_string())
                .into_response();
        }
    };

    let headers = req.headers();
    let csrf_token_header = match headers
        .get("x-csrf-token")
        .or_else(|| headers.get("X-CSRF-Token"))
    {
        Some(token) => match token.to_str() {
            Ok(t) => t.to_string(),
            Err(_) => {
                tracing::warn!("❌ CSRF: header has invalid format");
                return AppError::Authentication("Invalid CSRF token format".to_string())
                    .into_response();
            }
        },
        None => {
            tracing::warn!("❌ CSRF: x-csrf-token header not found");
            return AppError::Authentication("Missing CSRF token header".to_string())
                .into_response();
        }
    };

    if csrf_token_cookie
        .as_bytes()
        .ct_eq(csrf_token_header.as_bytes())
        .unwrap_u8()
        != 1
    {
        tracing::warn!("❌ CSRF: tokens do not match");
        return AppError::Authentication("CSRF token mismatch".to_string()).into_response();
    }

    match state
        .cache
        .get::<String>(&cache::csrf_key(&csrf_token_cookie))
        .await
    {
        Some(_) => {
            tracing::debug!("✅ CSRF token valid");
            next.run(req).await
        }
        None => {
            tracing::warn!("❌ CSRF: token expired or invalid");
            AppError::Authentication("CSRF token expired or invalid".to_string()).into_response()
        }
    }
}

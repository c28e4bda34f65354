use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_cookies::{Cookie, Cookies};
use tower_cookies::cookie::time::Duration as CookieDuration;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::identity::Identity,
    models::session::Session,
    repositories::user as user_repo,
    services::cache,
    state::AppState,
};

/// Lifetime of the anonymous session cookie.
const ANON_COOKIE_DAYS: i64 = 30;

/// Extracts the session token from the request cookies.
fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get("session_id")
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// Resolves who is talking: a logged-in user when a live session cookie is
/// present, an anonymous visitor otherwise. Anonymous visitors get a stable
/// `anon_id` cookie on first contact. The resolved [`Identity`] is attached
/// as a request extension; a session cookie pointing at a dead or expired
/// session silently degrades to anonymous.
pub async fn resolve_identity(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(session_id) = extract_session_token(&cookies) {
        if let Some(user) = load_session_user(&state, &session_id).await {
            tracing::debug!("✅ Request identity: user {}", user.id);
            request.extensions_mut().insert(Identity::User(user));
            return next.run(request).await;
        }
        tracing::debug!("⚠️  Stale session cookie, treating request as anonymous");
    }

    let anon_id = match cookies
        .get("anon_id")
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
    {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4();
            let mut cookie = Cookie::new("anon_id", id.to_string());
            cookie.set_http_only(true);
            cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
            cookie.set_max_age(CookieDuration::days(ANON_COOKIE_DAYS));
            cookie.set_path("/");
            cookies.add(cookie);
            tracing::debug!("🆔 Issued anonymous id: {}", id);
            id
        }
    };

    request.extensions_mut().insert(Identity::Anonymous(anon_id));
    next.run(request).await
}

/// Looks up a session and its user. Any failure along the way (missing
/// record, expired session, deactivated user) yields `None`.
async fn load_session_user(state: &AppState, session_id: &Uuid) -> Option<crate::models::user::User> {
    let session: Session = state
        .cache
        .get(&cache::session_key(&session_id.to_string()))
        .await?;

    if chrono::Utc::now() > session.expires_at {
        tracing::debug!("❌ Session expired for user: {}", session.user_id);
        state
            .cache
            .delete(&cache::session_key(&session_id.to_string()))
            .await;
        return None;
    }

    match user_repo::find_by_id(&state.db, &session.user_id).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("❌ Session user lookup failed: {}", e);
            None
        }
    }
}

/// A middleware that requires a logged-in user.
pub async fn require_auth(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<Identity>() {
        Some(Identity::User(_)) => next.run(request).await,
        _ => {
            tracing::warn!("❌ Authentication required");
            AppError::Authentication("Authentication required".to_string()).into_response()
        }
    }
}

/// A middleware that requires the creator account.
pub async fn require_creator(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<Identity>() {
        Some(Identity::User(user)) if user.is_creator => next.run(request).await,
        Some(Identity::User(_)) => {
            tracing::warn!("❌ Creator privileges required");
            AppError::Forbidden.into_response()
        }
        _ => AppError::Authentication("Authentication required".to_string()).into_response(),
    }
}

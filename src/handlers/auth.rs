use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::identity::Identity,
    models::session::Session,
    models::user::User,
    services::auth as auth_service,
    services::cache,
    services::quota::Remaining,
    state::AppState,
    validation::auth::*,
};

/// The request payload for user registration.
#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// The request payload for user login.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

/// The account summary returned by `/api/auth/me`.
#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub is_creator: bool,
    pub daily_message_limit: i64,
    pub messages_remaining: Remaining,
}

/// Creates a secure cookie with the given name, value, and max age.
fn create_secure_cookie(name: String, value: String, max_age_hours: i64) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.clone(), value);

    let is_production =
        std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()) == "production";

    if name != "csrf_token" {
        cookie.set_http_only(true);
    }

    if is_production {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_max_age(CookieDuration::hours(max_age_hours));
    cookie.set_path("/");

    cookie
}

/// Opens a session for the user: a cache record plus session and CSRF
/// cookies.
async fn open_session(state: &AppState, cookies: &Cookies, user: &User) -> Result<()> {
    let session_id = Uuid::new_v4();
    tracing::debug!("🔑 Generated session_id: {}", session_id);

    let hours = state.config.session_duration_hours;
    let ttl = Duration::from_secs((hours * 3600) as u64);
    let session = Session {
        user_id: user.id,
        created_at: Utc::now(),
        expires_at: Utc::now() + chrono::Duration::hours(hours),
    };

    let stored = state
        .cache
        .set(&cache::session_key(&session_id.to_string()), &session, ttl)
        .await;
    if !stored {
        return Err(AppError::Internal("Failed to persist session".to_string()));
    }
    tracing::info!("✅ Session stored: session:{}", session_id);

    cookies.add(create_secure_cookie(
        "session_id".to_string(),
        session_id.to_string(),
        hours,
    ));

    // the CSRF token lives exactly as long as the session it protects
    let csrf_token = crate::crypto::csrf::generate_csrf_token()?;
    state
        .cache
        .set(&cache::csrf_key(&csrf_token), &"valid".to_string(), ttl)
        .await;

    cookies.add(create_secure_cookie("csrf_token".to_string(), csrf_token, hours));
    tracing::debug!("✅ Session and CSRF cookies added");

    Ok(())
}

/// Handles user registration.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    tracing::info!("📝 Register attempt for: {}", payload.email);
    validate_email(&payload.email)?;
    validate_name(&payload.name)?;
    validate_password(&payload.password)?;

    let user = auth_service::create_user(
        &state.db,
        payload.email.trim().to_lowercase(),
        payload.name.trim().to_string(),
        payload.password,
    )
    .await?;

    tracing::info!("✅ User registered: {}", user.id);

    open_session(&state, &cookies, &user).await?;

    let response = AuthResponse {
        success: true,
        message: "Registration successful. Welcome!".to_string(),
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Handles user login.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt for: {}", payload.email);
    validate_email(&payload.email)?;

    let user = auth_service::authenticate_user(
        &state.db,
        &payload.email.trim().to_lowercase(),
        &payload.password,
    )
    .await?;

    open_session(&state, &cookies, &user).await?;
    tracing::info!("✅ User logged in: {}", user.id);

    let response = AuthResponse {
        success: true,
        message: "Login successful".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    cookies: Cookies,
) -> Result<Response> {
    let Some(user) = identity.user() else {
        return Err(AppError::Authentication("Not logged in".to_string()));
    };
    tracing::info!("👋 Logout for user: {}", user.id);

    if let Some(session_cookie) = cookies.get("session_id") {
        state
            .cache
            .delete(&cache::session_key(session_cookie.value()))
            .await;
        tracing::info!("✅ Session deleted");
    }

    if let Some(csrf_cookie) = cookies.get("csrf_token") {
        state.cache.delete(&cache::csrf_key(csrf_cookie.value())).await;
        tracing::info!("✅ CSRF token deleted");
    }

    let mut session_cookie = Cookie::new("session_id", "");
    session_cookie.set_max_age(CookieDuration::seconds(0));
    session_cookie.set_path("/");
    cookies.remove(session_cookie);

    let mut csrf_cookie = Cookie::new("csrf_token", "");
    csrf_cookie.set_max_age(CookieDuration::seconds(0));
    csrf_cookie.set_path("/");
    cookies.remove(csrf_cookie);

    let response = AuthResponse {
        success: true,
        message: "Logout successful".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Returns the logged-in user's account summary.
#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MeResponse>> {
    let Some(user) = identity.user() else {
        return Err(AppError::Authentication("Not logged in".to_string()));
    };

    let messages_remaining = state.quota.remaining(&identity).await?;

    let daily_message_limit = if user.is_quota_exempt() {
        -1
    } else {
        user.daily_message_limit as i64
    };

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role.as_str().to_string(),
        is_creator: user.is_creator,
        daily_message_limit,
        messages_remaining,
    }))
}

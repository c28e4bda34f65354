use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    error::{AppError, Result},
    models::api_key::{ApiKeyView, ServiceKind},
    models::identity::Identity,
    models::user::{Role, User},
    repositories::{api_key as api_key_repo, settings as settings_repo, user as user_repo},
    services::cache::{self, PREFERENCE_TTL},
    state::AppState,
};

/// The request payload for storing a provider credential.
#[derive(Deserialize, Validate)]
pub struct CreateKeyRequest {
    #[garde(skip)]
    pub service: String,
    #[garde(length(min = 1, max = 100))]
    pub key_name: String,
    #[garde(length(min = 8, max = 512))]
    pub api_key: String,
}

/// The request payload for toggling a credential's flags.
#[derive(Deserialize, Debug)]
pub struct UpdateKeyRequest {
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
}

/// The request payload for updating a user's role and limit.
#[derive(Deserialize, Debug)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub daily_message_limit: Option<i32>,
}

/// The request payload for writing a system setting.
#[derive(Deserialize, Validate)]
pub struct SettingRequest {
    #[garde(length(min = 1, max = 100))]
    pub key: String,
    #[garde(length(max = 1000))]
    pub value: String,
}

/// The wire shape of a user in admin listings.
#[derive(Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub is_creator: bool,
    pub daily_message_limit: i32,
    pub messages_used_today: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role.as_str().to_string(),
            is_creator: user.is_creator,
            daily_message_limit: user.daily_message_limit,
            messages_used_today: user.messages_used_today,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

fn invalid(report: garde::Report) -> AppError {
    AppError::Validation(report.to_string())
}

fn admin_id(identity: &Identity) -> Result<Uuid> {
    identity
        .user()
        .map(|user| user.id)
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))
}

/// Lists stored credentials with masked ciphertext.
#[axum::debug_handler]
pub async fn list_keys(State(state): State<AppState>) -> Result<Json<Vec<ApiKeyView>>> {
    let keys = api_key_repo::list_all(&state.db)
        .await?
        .into_iter()
        .map(ApiKeyView::from)
        .collect();
    Ok(Json(keys))
}

/// Stores (or replaces) a provider credential. The plaintext is encrypted
/// before it touches the database and never written to the log.
#[axum::debug_handler]
pub async fn create_key(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse> {
    payload.validate().map_err(invalid)?;
    let admin = admin_id(&identity)?;

    let service: ServiceKind = payload.service.parse()?;
    let plaintext = Zeroizing::new(payload.api_key);

    let encrypted = state.vault.encrypt(&plaintext)?;
    let key = api_key_repo::upsert(&state.db, service, payload.key_name.trim(), &encrypted).await?;

    tracing::info!(
        "🔑 Credential stored by {}: {} / {}",
        admin,
        service,
        key.key_name
    );

    Ok((StatusCode::CREATED, Json(ApiKeyView::from(key))))
}

/// Updates a credential's activation / default flags.
#[axum::debug_handler]
pub async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateKeyRequest>,
) -> Result<Json<ApiKeyView>> {
    if payload.is_active.is_none() && payload.is_default.is_none() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }

    let key = api_key_repo::set_flags(&state.db, id, payload.is_active, payload.is_default).await?;
    tracing::info!("🔑 Credential {} flags updated: {:?}", id, payload);
    Ok(Json(ApiKeyView::from(key)))
}

/// Deletes a credential.
#[axum::debug_handler]
pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse> {
    api_key_repo::delete(&state.db, id).await?;
    tracing::info!("🗑️  Credential {} deleted", id);
    Ok(Json(sonic_rs::json!({ "success": true })))
}

/// Lists registered users.
#[axum::debug_handler]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserView>>> {
    let users = user_repo::list_users(&state.db)
        .await?
        .into_iter()
        .map(UserView::from)
        .collect();
    Ok(Json(users))
}

/// Updates a user's role and/or daily message limit.
#[axum::debug_handler]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserView>> {
    if payload.role.is_none() && payload.daily_message_limit.is_none() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }

    let role = match payload.role.as_deref() {
        Some(raw) => Some(
            raw.parse::<Role>()
                .map_err(|_| AppError::Validation(format!("Unknown role: {}", raw)))?,
        ),
        None => None,
    };

    if let Some(limit) = payload.daily_message_limit {
        if limit < 0 {
            return Err(AppError::Validation(
                "Daily message limit cannot be negative".to_string(),
            ));
        }
    }

    let user =
        user_repo::update_role_and_limit(&state.db, &user_id, role, payload.daily_message_limit)
            .await?;

    tracing::info!(
        "👤 User {} updated: role={} limit={}",
        user.id,
        user.role.as_str(),
        user.daily_message_limit
    );
    Ok(Json(UserView::from(user)))
}

/// Returns the system settings map, read through the cache.
#[axum::debug_handler]
pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<HashMap<String, String>>> {
    let key = cache::settings_key();

    if let Some(cached) = state.cache.get::<HashMap<String, String>>(&key).await {
        return Ok(Json(cached));
    }

    let settings = settings_repo::all(&state.db).await?;
    state.cache.set(&key, &settings, PREFERENCE_TTL).await;
    Ok(Json(settings))
}

/// Writes one system setting and invalidates the cached map.
#[axum::debug_handler]
pub async fn set_setting(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<SettingRequest>,
) -> Result<impl IntoResponse> {
    payload.validate().map_err(invalid)?;
    let admin = admin_id(&identity)?;

    settings_repo::set(&state.db, payload.key.trim(), &payload.value, &admin).await?;
    state.cache.delete(&cache::settings_key()).await;

    tracing::info!("⚙️  Setting {} updated by {}", payload.key.trim(), admin);
    Ok(Json(sonic_rs::json!({ "success": true })))
}

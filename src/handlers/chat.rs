use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Extension, Json,
};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::identity::Identity,
    models::message::HistoryEntry,
    repositories::{message as message_repo, preference as preference_repo},
    services::cache::{self, HISTORY_TTL},
    services::chat as chat_service,
    services::files,
    services::quota::Remaining,
    state::AppState,
};

/// The request payload for sending a message.
#[derive(Deserialize, Validate, Debug)]
pub struct MessageRequest {
    #[garde(length(min = 1, max = 4000))]
    pub message: String,
    #[garde(skip)]
    pub model: Option<String>,
}

/// The request payload for a web search.
#[derive(Deserialize, Validate, Debug)]
pub struct SearchRequest {
    #[garde(length(min = 1, max = 400))]
    pub query: String,
}

/// The request payload for setting the preferred model.
#[derive(Deserialize, Validate, Debug)]
pub struct PreferenceRequest {
    #[garde(length(min = 1, max = 200))]
    pub model: String,
}

/// The response payload for a completed exchange.
#[derive(Serialize)]
pub struct MessageResponse {
    pub response: String,
    pub messages_remaining: Remaining,
}

/// The response payload for an upload exchange.
#[derive(Serialize)]
pub struct UploadResponse {
    pub response: String,
    pub messages_remaining: Remaining,
    pub file_info: serde_json::Value,
}

/// The response payload for a search exchange.
#[derive(Serialize)]
pub struct SearchResponse {
    pub results: String,
    pub messages_remaining: Remaining,
}

/// The response payload for a history read.
#[derive(Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryEntry>,
    pub messages_remaining: Remaining,
}

fn invalid(report: garde::Report) -> AppError {
    AppError::Validation(report.to_string())
}

/// Rejects inputs that are empty once trimmed, before a quota slot is spent.
fn trimmed_non_empty<'a>(input: &'a str, label: &str) -> Result<&'a str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", label)));
    }
    Ok(trimmed)
}

/// Handles a chat message.
#[axum::debug_handler]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<MessageResponse>> {
    payload.validate().map_err(invalid)?;
    let message = trimmed_non_empty(&payload.message, "Message")?;

    let outcome = chat_service::send_text(&state, &identity, message, payload.model).await?;

    Ok(Json(MessageResponse {
        response: outcome.reply,
        messages_remaining: outcome.remaining,
    }))
}

/// Handles a file upload.
#[axum::debug_handler]
pub async fn upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    // cheap rejection before the body is pulled in
    if !state.quota.can_send(&identity).await? {
        return Err(AppError::QuotaExceeded(
            "Daily message limit reached".to_string(),
        ));
    }

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Multipart(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(|name| name.to_string())
                .ok_or_else(|| AppError::Validation("File has no name".to_string()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Multipart(e.to_string()))?;
            upload = Some((filename, bytes.to_vec()));
            break;
        }
    }

    let (filename, bytes) =
        upload.ok_or_else(|| AppError::Validation("No file field in request".to_string()))?;

    let processed = files::process_upload(&filename, bytes)?;
    tracing::info!(
        "📎 Upload accepted: {} ({} bytes)",
        processed.filename,
        processed.size
    );

    let meta = processed.meta();
    let outcome = chat_service::send_file(&state, &identity, &processed).await?;

    Ok(Json(UploadResponse {
        response: outcome.reply,
        messages_remaining: outcome.remaining,
        file_info: meta,
    }))
}

/// Handles a web search request.
#[axum::debug_handler]
pub async fn search(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    payload.validate().map_err(invalid)?;
    let query = trimmed_non_empty(&payload.query, "Search query")?;

    let outcome = chat_service::send_search(&state, &identity, query).await?;

    Ok(Json(SearchResponse {
        results: outcome.reply,
        messages_remaining: outcome.remaining,
    }))
}

/// Returns the identity's conversation history, newest last.
#[axum::debug_handler]
pub async fn history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<HistoryResponse>> {
    let key = cache::history_key(&identity.cache_scope());
    let messages_remaining = state.quota.remaining(&identity).await?;

    if let Some(cached) = state.cache.get::<Vec<HistoryEntry>>(&key).await {
        tracing::debug!("✅ History cache hit");
        return Ok(Json(HistoryResponse {
            messages: cached,
            messages_remaining,
        }));
    }

    let entries: Vec<HistoryEntry> = message_repo::history(&state.db, &identity)
        .await?
        .into_iter()
        .map(HistoryEntry::from)
        .collect();

    state.cache.set(&key, &entries, HISTORY_TTL).await;
    Ok(Json(HistoryResponse {
        messages: entries,
        messages_remaining,
    }))
}

/// Deletes the identity's conversation history.
#[axum::debug_handler]
pub async fn clear_history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse> {
    let deleted = message_repo::clear(&state.db, &identity).await?;
    state
        .cache
        .delete(&cache::history_key(&identity.cache_scope()))
        .await;

    tracing::info!("🧹 Cleared {} messages for {}", deleted, identity.cache_scope());
    Ok(Json(sonic_rs::json!({ "success": true, "deleted": deleted })))
}

/// Returns the identity's preferred model.
#[axum::debug_handler]
pub async fn get_model_preference(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse> {
    let model = chat_service::preferred_model(&state, &identity).await;
    Ok(Json(sonic_rs::json!({ "model": model })))
}

/// Sets the identity's preferred model.
#[axum::debug_handler]
pub async fn set_model_preference(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<PreferenceRequest>,
) -> Result<impl IntoResponse> {
    payload.validate().map_err(invalid)?;

    let model = trimmed_non_empty(&payload.model, "Model")?;
    preference_repo::set(&state.db, &identity, model).await?;
    state
        .cache
        .delete(&cache::preference_key(&identity.cache_scope()))
        .await;

    tracing::info!("✅ Model preference updated: {}", model);
    Ok(Json(sonic_rs::json!({ "success": true, "model": model })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_input_is_rejected_before_admission() {
        let err = trimmed_non_empty("   \n\t ", "Message").unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "Message cannot be empty"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn surrounding_whitespace_is_stripped() {
        assert_eq!(trimmed_non_empty("  hello  ", "Message").unwrap(), "hello");
        assert_eq!(trimmed_non_empty("q", "Search query").unwrap(), "q");
    }
}

//! The per-request message pipeline:
//! admission → persist inbound → dispatch → persist outbound → respond.
//!
//! Admission denial short-circuits with a 429 and consumes nothing. The
//! inbound write is the only fatal storage step. Dispatch never fails: a
//! missing credential, a provider error or a timeout all degrade to a
//! textual reply recorded as a normal assistant turn, so the conversation
//! log stays coherent. The quota slot is consumed at admission and never
//! refunded, whatever dispatch does.

use crate::{
    error::{AppError, Result},
    models::api_key::ServiceKind,
    models::identity::Identity,
    models::message::MessageType,
    models::preference::{ModelPreference, DEFAULT_MODEL},
    repositories::{message as message_repo, preference as preference_repo},
    services::cache::{self, PREFERENCE_TTL, SEARCH_TTL},
    services::files::{FileKind, ProcessedFile},
    services::quota::{Admission, Remaining},
    state::AppState,
};

/// Reply recorded when no provider credential is configured.
pub const NO_PROVIDER_KEY_REPLY: &str =
    "❌ No active OpenRouter API key found. Please configure API keys in settings.";

/// Reply recorded when a stored credential cannot be decrypted.
const MISCONFIGURED_REPLY: &str =
    "❌ The assistant is temporarily misconfigured. Please contact the operator.";

/// Reply recorded for accepted attachments with no analyzable content.
const UNSUPPORTED_FILE_REPLY: &str = "✅ File uploaded. File type processing not yet supported.";

/// The answer returned to the caller.
#[derive(Debug)]
pub struct ChatReply {
    pub reply: String,
    pub remaining: Remaining,
}

/// Sends a plain text message through the pipeline.
pub async fn send_text(
    state: &AppState,
    identity: &Identity,
    message: &str,
    model: Option<String>,
) -> Result<ChatReply> {
    let remaining = admit(state, identity).await?;

    message_repo::insert(&state.db, identity, MessageType::User, message, None).await?;

    let reply = dispatch_chat(state, identity, message, model).await;

    persist_outbound(state, identity, &reply, None).await;
    finish(state, identity).await;

    Ok(ChatReply { reply, remaining })
}

/// Sends an uploaded file through the pipeline.
pub async fn send_file(
    state: &AppState,
    identity: &Identity,
    file: &ProcessedFile,
) -> Result<ChatReply> {
    let remaining = admit(state, identity).await?;

    let meta = file.meta();
    let inbound = format!("Uploaded file: {}", file.filename);
    message_repo::insert(&state.db, identity, MessageType::User, &inbound, Some(&meta)).await?;

    let reply = dispatch_file(state, identity, file).await;

    persist_outbound(state, identity, &reply, None).await;
    finish(state, identity).await;

    Ok(ChatReply { reply, remaining })
}

/// Sends a web search through the pipeline.
pub async fn send_search(
    state: &AppState,
    identity: &Identity,
    query: &str,
) -> Result<ChatReply> {
    let remaining = admit(state, identity).await?;

    let inbound = format!("🔍 Search: {}", query);
    message_repo::insert(&state.db, identity, MessageType::User, &inbound, None).await?;

    let results = cached_search(state, query).await;

    persist_outbound(state, identity, &results, None).await;
    finish(state, identity).await;

    Ok(ChatReply {
        reply: results,
        remaining,
    })
}

/// ADMISSION: acquire a quota slot or reject with 429.
async fn admit(state: &AppState, identity: &Identity) -> Result<Remaining> {
    match state.quota.try_acquire(identity).await? {
        Admission::Admitted { remaining } => Ok(remaining),
        Admission::Denied { reason } => Err(AppError::QuotaExceeded(reason.to_string())),
    }
}

/// DISPATCH for text messages. Always yields a reply string.
async fn dispatch_chat(
    state: &AppState,
    identity: &Identity,
    message: &str,
    model_override: Option<String>,
) -> String {
    let model = match model_override {
        Some(model) if !model.trim().is_empty() => model,
        _ => preferred_model(state, identity).await,
    };

    let api_key = match state.keys.get_key(ServiceKind::Openrouter).await {
        Ok(Some(key)) => key,
        Ok(None) => return NO_PROVIDER_KEY_REPLY.to_string(),
        Err(e) => {
            tracing::error!("❌ Credential selection failed: {}", e);
            return MISCONFIGURED_REPLY.to_string();
        }
    };

    state.provider.chat(&api_key, &model, message).await.into_reply()
}

/// DISPATCH for uploads: text files are summarized, images are described
/// first and then discussed, PDFs are acknowledged without analysis.
async fn dispatch_file(state: &AppState, identity: &Identity, file: &ProcessedFile) -> String {
    match file.kind {
        FileKind::Text => {
            let content = file.text.as_deref().unwrap_or_default();
            let excerpt: String = content.chars().take(4000).collect();
            let prompt = format!(
                "I've uploaded a text file: {}\n\nContent:\n{}\n\nCan you summarize this content and provide insights?",
                file.filename, excerpt
            );
            dispatch_chat(state, identity, &prompt, None).await
        }
        FileKind::Image => {
            let description = describe_image(state, file).await;
            let prompt = format!(
                "I've uploaded an image: {}\n\nImage description: {}\n\nCan you tell me more about this image and what you observe?",
                file.filename, description
            );
            dispatch_chat(state, identity, &prompt, None).await
        }
        FileKind::Pdf => UNSUPPORTED_FILE_REPLY.to_string(),
    }
}

async fn describe_image(state: &AppState, file: &ProcessedFile) -> String {
    let api_key = match state.keys.get_key(ServiceKind::GoogleAi).await {
        Ok(Some(key)) => key,
        Ok(None) => return "No Google AI API key configured for image description.".to_string(),
        Err(e) => {
            tracing::error!("❌ Credential selection failed: {}", e);
            return "Error describing image.".to_string();
        }
    };

    let Some(bytes) = file.bytes.as_deref() else {
        return "Error describing image.".to_string();
    };

    state.provider.describe_image(&api_key, bytes, file.mime_type).await
}

/// PERSIST_OUTBOUND: best-effort; a failed write is logged, the reply still
/// reaches the caller.
async fn persist_outbound(
    state: &AppState,
    identity: &Identity,
    reply: &str,
    file_data: Option<&serde_json::Value>,
) {
    if let Err(e) =
        message_repo::insert(&state.db, identity, MessageType::Assistant, reply, file_data).await
    {
        tracing::error!("❌ Failed to persist outbound message: {}", e);
    }
}

/// RESPOND: drop the cache entries this exchange made stale.
async fn finish(state: &AppState, identity: &Identity) {
    let scope = identity.cache_scope();
    state.cache.delete(&cache::history_key(&scope)).await;
}

/// The model to use for an identity: cached preference, then default.
pub async fn preferred_model(state: &AppState, identity: &Identity) -> String {
    let scope = identity.cache_scope();
    let key = cache::preference_key(&scope);

    if let Some(preference) = state.cache.get::<ModelPreference>(&key).await {
        return preference.preferred_model;
    }

    let preference = match preference_repo::find(&state.db, identity).await {
        Ok(Some(preference)) => preference,
        Ok(None) => ModelPreference::default(),
        Err(e) => {
            tracing::warn!("⚠️  Preference lookup failed, using default model: {}", e);
            return DEFAULT_MODEL.to_string();
        }
    };

    state.cache.set(&key, &preference, PREFERENCE_TTL).await;
    preference.preferred_model
}

/// A search memoized by query hash; repeated queries inside the TTL window
/// skip the provider entirely.
async fn cached_search(state: &AppState, query: &str) -> String {
    let key = cache::search_key(query);

    if let Some(hit) = state.cache.get::<String>(&key).await {
        tracing::debug!("✅ Search cache hit");
        return hit;
    }

    let results = state.search.search(query).await;
    state.cache.set(&key, &results, SEARCH_TTL).await;
    results
}

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};

use http::{header, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod state;

mod crypto {
    pub mod aes;
    pub mod csrf;
    pub mod vault;
}

mod models {
    pub mod api_key;
    pub mod identity;
    pub mod message;
    pub mod preference;
    pub mod session;
    pub mod user;
}

mod repositories {
    pub mod api_key;
    pub mod message;
    pub mod preference;
    pub mod settings;
    pub mod user;
}

mod services {
    pub mod auth;
    pub mod cache;
    pub mod chat;
    pub mod files;
    pub mod keys;
    pub mod provider;
    pub mod quota;
    pub mod search;
}

mod handlers {
    pub mod admin;
    pub mod auth;
    pub mod chat;
}

mod middleware_layer {
    pub mod auth;
    pub mod csrf;
    pub mod rate_limit;
}

mod validation {
    pub mod auth;
}

use config::Config;
use state::AppState;

/// Days of retention for anonymous conversation rows.
const ANON_RETENTION_DAYS: i32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    db::run_migrations(&state.db).await?;
    tracing::info!("✅ Database migrations applied");

    state.vault.self_check()?;
    tracing::info!("✅ Credential vault self-check passed");

    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:3000".parse().unwrap(),
            "http://127.0.0.1:3000".parse().unwrap(),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            "x-csrf-token".parse().unwrap(),
        ])
        .allow_credentials(true)
        .expose_headers(["x-csrf-token".parse().unwrap()])
        .max_age(Duration::from_secs(86400));

    let admin_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .use_headers()
            .finish()
            .unwrap(),
    );

    let register_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_register,
        ))
        .with_state(state.clone());

    let login_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_login,
        ))
        .with_state(state.clone());

    // open to both logged-in users and anonymous visitors
    let chat_routes = Router::new()
        .route("/api/message", post(handlers::chat::send_message))
        .route("/api/upload", post(handlers::chat::upload))
        .route("/api/search", post(handlers::chat::search))
        .route("/api/history", get(handlers::chat::history))
        .route("/api/clear-history", post(handlers::chat::clear_history))
        .route(
            "/api/model-preference",
            get(handlers::chat::get_model_preference).post(handlers::chat::set_model_preference),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::resolve_identity,
        ))
        .with_state(state.clone());

    let account_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        .route_layer(from_fn(middleware_layer::auth::require_auth))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::resolve_identity,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/api/admin/keys", get(handlers::admin::list_keys))
        .route("/api/admin/keys", post(handlers::admin::create_key))
        .route("/api/admin/keys/{id}", patch(handlers::admin::update_key))
        .route("/api/admin/keys/{id}", delete(handlers::admin::delete_key))
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route("/api/admin/users/{user_id}", patch(handlers::admin::update_user))
        .route("/api/admin/settings", get(handlers::admin::get_settings))
        .route("/api/admin/settings", post(handlers::admin::set_setting))
        .layer(tower_governor::GovernorLayer::new(admin_governor_conf))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::csrf::verify_csrf,
        ))
        .route_layer(from_fn(middleware_layer::auth::require_creator))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::resolve_identity,
        ))
        .with_state(state.clone());

    let app = Router::new()
        .merge(register_routes)
        .merge(login_routes)
        .merge(chat_routes)
        .merge(account_routes)
        .merge(admin_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(services::files::MAX_FILE_SIZE + 64 * 1024))
        .layer(cors)
        .fallback_service(ServeDir::new("static"));

    let purge_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            tracing::info!("🧹 Purging stale anonymous conversations...");
            match repositories::message::purge_stale_anonymous(&purge_state.db, ANON_RETENTION_DAYS)
                .await
            {
                Ok(purged) => {
                    tracing::info!("✅ Purge job removed {} messages", purged);
                }
                Err(e) => {
                    tracing::error!("❌ Purge job failed: {}", e);
                }
            }
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Background purge job started (runs every hour)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

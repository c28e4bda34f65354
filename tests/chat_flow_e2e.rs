//! End-to-end flows against a running server instance.
//!
//! These tests expect the server on 127.0.0.1:3000 with PostgreSQL and
//! Redis behind it, so they are ignored by default:
//!
//!     cargo test --test chat_flow_e2e -- --ignored

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

struct TestContext {
    client: reqwest::Client,
    base_url: String,
}

static BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("E2E_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string())
});

impl TestContext {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .cookie_store(true)
                .build()
                .unwrap(),
            base_url: BASE_URL.clone(),
        }
    }

    fn get_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    async fn register(&self, email: &str, name: &str, password: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/auth/register", self.base_url))
            .json(&json!({ "email": email, "name": name, "password": password }))
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
#[ignore = "requires a running server with PostgreSQL and Redis"]
async fn registration_login_and_account_summary() {
    let context = TestContext::new();
    let timestamp = TestContext::get_timestamp();
    let email = format!("testuser_{}@example.com", timestamp);

    let reg_response = context.register(&email, "Test User", "SecurePass123!@#").await;
    assert_eq!(reg_response.status().as_u16(), 201, "Registration failed");

    let max_age = |name: &str| {
        reg_response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|raw| raw.starts_with(name))
            .and_then(|raw| {
                raw.split(';')
                    .find_map(|part| part.trim().strip_prefix("Max-Age="))
                    .map(|age| age.to_string())
            })
    };
    assert_eq!(
        max_age("session_id"),
        max_age("csrf_token"),
        "CSRF cookie must live as long as the session"
    );

    let reg_body: Value = reg_response.json().await.unwrap();
    assert_eq!(reg_body["message"], "Registration successful. Welcome!");

    let me_response = context
        .client
        .get(format!("{}/api/auth/me", context.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(me_response.status().as_u16(), 200);
    let me_body: Value = me_response.json().await.unwrap();
    assert_eq!(me_body["email"], email.as_str());

    let logout_response = context
        .client
        .post(format!("{}/api/auth/logout", context.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(logout_response.status().as_u16(), 200);

    let fresh = TestContext::new();
    let login_response = fresh
        .client
        .post(format!("{}/api/auth/login", fresh.base_url))
        .json(&json!({ "email": email, "password": "SecurePass123!@#" }))
        .send()
        .await
        .unwrap();
    assert_eq!(login_response.status().as_u16(), 200, "Login failed");
}

#[tokio::test]
#[ignore = "requires a running server with PostgreSQL and Redis"]
async fn anonymous_visitors_are_capped_at_ten_messages() {
    let context = TestContext::new();

    let mut last_remaining = i64::MAX;
    for i in 0..10 {
        let response = context
            .client
            .post(format!("{}/api/message", context.base_url))
            .json(&json!({ "message": format!("hello {}", i) }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200, "message {} rejected early", i);

        let body: Value = response.json().await.unwrap();
        let remaining = body["messages_remaining"].as_i64().unwrap();
        assert!(remaining < last_remaining, "remaining must decrease");
        last_remaining = remaining;
    }
    assert_eq!(last_remaining, 0);

    let denied = context
        .client
        .post(format!("{}/api/message", context.base_url))
        .json(&json!({ "message": "one too many" }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 429);
}

#[tokio::test]
#[ignore = "requires a running server with PostgreSQL and Redis"]
async fn whitespace_only_message_is_rejected_without_spending_quota() {
    let context = TestContext::new();

    let rejected = context
        .client
        .post(format!("{}/api/message", context.base_url))
        .json(&json!({ "message": "   \n\t " }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status().as_u16(), 400);

    let accepted = context
        .client
        .post(format!("{}/api/message", context.base_url))
        .json(&json!({ "message": "real message" }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 200);
    let body: Value = accepted.json().await.unwrap();
    // the rejected send must not have consumed the first slot
    assert_eq!(body["messages_remaining"].as_i64().unwrap(), 9);
}

#[tokio::test]
#[ignore = "requires a running server with PostgreSQL and Redis"]
async fn history_survives_an_exchange_and_clears_on_request() {
    let context = TestContext::new();

    let send = context
        .client
        .post(format!("{}/api/message", context.base_url))
        .json(&json!({ "message": "remember me" }))
        .send()
        .await
        .unwrap();
    assert_eq!(send.status().as_u16(), 200);

    let history: Value = context
        .client
        .get(format!("{}/api/history", context.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = history["messages"].as_array().unwrap();
    assert!(entries.len() >= 2, "expected the inbound turn and a reply");
    assert_eq!(entries[0]["type"], "user");
    assert_eq!(entries[0]["content"], "remember me");

    let clear = context
        .client
        .post(format!("{}/api/clear-history", context.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(clear.status().as_u16(), 200);

    let after: Value = context
        .client
        .get(format!("{}/api/history", context.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(after["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running server with PostgreSQL and Redis"]
async fn racing_sends_at_the_limit_boundary_admit_exactly_one() {
    let context = TestContext::new();

    // burn the budget down to a single remaining slot
    for i in 0..9 {
        let response = context
            .client
            .post(format!("{}/api/message", context.base_url))
            .json(&json!({ "message": format!("warmup {}", i) }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let fire = |text: &str| {
        let client = context.client.clone();
        let url = format!("{}/api/message", context.base_url);
        let body = json!({ "message": text });
        async move { client.post(url).json(&body).send().await.unwrap().status().as_u16() }
    };

    let (a, b) = tokio::join!(fire("racer a"), fire("racer b"));
    let admitted = [a, b].iter().filter(|&&status| status == 200).count();
    let denied = [a, b].iter().filter(|&&status| status == 429).count();
    assert_eq!(admitted, 1, "exactly one racer may take the final slot");
    assert_eq!(denied, 1);
}

#[tokio::test]
#[ignore = "requires a running server with PostgreSQL and Redis"]
async fn admin_surface_rejects_non_creator_accounts() {
    let context = TestContext::new();
    let timestamp = TestContext::get_timestamp();
    let email = format!("basic_{}@example.com", timestamp);

    let reg = context.register(&email, "Basic User", "SecurePass123!@#").await;
    assert_eq!(reg.status().as_u16(), 201);

    let keys_response = context
        .client
        .get(format!("{}/api/admin/keys", context.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(keys_response.status().as_u16(), 403);
}

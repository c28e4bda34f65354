use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wall-clock budget for one provider call.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The fixed system preamble sent with every chat completion.
const SYSTEM_PREAMBLE: &str = "You are CyberChat AI, a cyberpunk-themed AI assistant. \
You're helpful, knowledgeable, and have a slight edge with cyberpunk flair. \
Keep responses concise but informative.";

const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

/// Classified result of a provider call. Every variant maps to a textual
/// reply; nothing past this boundary ever raises.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Success(String),
    AuthFailed,
    RateLimited,
    Timeout,
    Upstream(u16),
    Unreachable,
}

impl ProviderOutcome {
    /// The user-facing string recorded as the assistant turn.
    pub fn into_reply(self) -> String {
        match self {
            ProviderOutcome::Success(content) => content,
            ProviderOutcome::AuthFailed => {
                "❌ API key authentication failed. Please check your OpenRouter API key.".to_string()
            }
            ProviderOutcome::RateLimited => {
                "⏳ Rate limit reached. Please try again in a moment.".to_string()
            }
            ProviderOutcome::Timeout => "⏳ Request timed out. Please try again.".to_string(),
            ProviderOutcome::Upstream(status) => format!("❌ AI service error: {}", status),
            ProviderOutcome::Unreachable => {
                "❌ AI service is unreachable. Please try again later.".to_string()
            }
        }
    }
}

/// Maps a non-success provider status to an outcome.
fn classify_status(status: u16) -> ProviderOutcome {
    match status {
        401 | 403 => ProviderOutcome::AuthFailed,
        429 => ProviderOutcome::RateLimited,
        other => ProviderOutcome::Upstream(other),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// HTTP client for the model providers: OpenRouter chat completions and
/// Google AI image description.
#[derive(Clone)]
pub struct ModelProvider {
    http: reqwest::Client,
    openrouter_base_url: String,
    google_ai_base_url: String,
}

impl ModelProvider {
    pub fn new(http: reqwest::Client, openrouter_base_url: String, google_ai_base_url: String) -> Self {
        Self {
            http,
            openrouter_base_url,
            google_ai_base_url,
        }
    }

    /// One chat completion against OpenRouter.
    pub async fn chat(&self, api_key: &str, model: &str, message: &str) -> ProviderOutcome {
        let body = ChatRequest {
            model,
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: SYSTEM_PREAMBLE,
                },
                ChatTurn {
                    role: "user",
                    content: message,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let result = self
            .http
            .post(format!("{}/chat/completions", self.openrouter_base_url))
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://cyberchat.app")
            .header("X-Title", "CyberChat AI")
            .json(&body)
            .timeout(DISPATCH_TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ProviderOutcome::Timeout,
            Err(e) => {
                tracing::error!("OpenRouter request failed: {}", e);
                return ProviderOutcome::Unreachable;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            tracing::warn!("OpenRouter returned status {}", status);
            return classify_status(status);
        }

        match response.json::<ChatResponse>().await {
            Ok(parsed) => match parsed.choices.into_iter().next() {
                Some(choice) => ProviderOutcome::Success(choice.message.content),
                None => {
                    ProviderOutcome::Success("❌ Unexpected response format from AI service.".to_string())
                }
            },
            Err(e) => {
                tracing::error!("OpenRouter response parse error: {}", e);
                ProviderOutcome::Success("❌ Unexpected response format from AI service.".to_string())
            }
        }
    }

    /// Describes an image with Google AI (`gemini-1.5-flash`). Returns a
    /// textual description or a degraded string, never an error.
    pub async fn describe_image(&self, api_key: &str, image: &[u8], mime_type: &str) -> String {
        let payload = sonic_rs::json!({
            "contents": [{
                "parts": [
                    {"text": "Describe this image in detail. Focus on the key elements, colors, composition, and overall mood."},
                    {
                        "inline_data": {
                            "mime_type": mime_type,
                            "data": general_purpose::STANDARD.encode(image)
                        }
                    }
                ]
            }]
        });

        let result = self
            .http
            .post(format!(
                "{}/models/gemini-1.5-flash:generateContent?key={}",
                self.google_ai_base_url, api_key
            ))
            .json(&payload)
            .timeout(DISPATCH_TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Google AI request failed: {}", e);
                return "Error describing image.".to_string();
            }
        };

        if !response.status().is_success() {
            tracing::error!("Google AI returned status {}", response.status());
            return "Error describing image.".to_string();
        }

        match response.json::<GenerateResponse>().await {
            Ok(parsed) => parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content.parts.into_iter().next())
                .map(|p| p.text)
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| "Could not generate image description.".to_string()),
            Err(e) => {
                tracing::error!("Google AI response parse error: {}", e);
                "Could not generate image description.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_classify_as_auth_failure() {
        assert_eq!(classify_status(401), ProviderOutcome::AuthFailed);
        assert_eq!(classify_status(403), ProviderOutcome::AuthFailed);
    }

    #[test]
    fn throttle_status_classifies_as_rate_limited() {
        assert_eq!(classify_status(429), ProviderOutcome::RateLimited);
    }

    #[test]
    fn other_statuses_classify_as_upstream() {
        assert_eq!(classify_status(500), ProviderOutcome::Upstream(500));
        assert_eq!(classify_status(502), ProviderOutcome::Upstream(502));
    }

    #[test]
    fn every_outcome_degrades_to_a_reply_string() {
        assert_eq!(
            ProviderOutcome::Success("hello".to_string()).into_reply(),
            "hello"
        );
        assert!(ProviderOutcome::AuthFailed.into_reply().contains("authentication failed"));
        assert!(ProviderOutcome::RateLimited.into_reply().contains("Rate limit"));
        assert!(ProviderOutcome::Timeout.into_reply().contains("timed out"));
        assert!(ProviderOutcome::Upstream(503).into_reply().contains("503"));
        assert!(!ProviderOutcome::Unreachable.into_reply().is_empty());
    }

    #[test]
    fn chat_response_parses_first_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}]}"#;
        let parsed: ChatResponse = sonic_rs::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hi there");
    }

    #[test]
    fn empty_choices_parse_without_error() {
        let parsed: ChatResponse = sonic_rs::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}

use serde::Deserialize;
use std::time::Duration;

/// Timeout for one search request.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How many related topics make it into the formatted result.
const MAX_RELATED_TOPICS: usize = 5;

#[derive(Deserialize, Default)]
struct InstantAnswer {
    #[serde(rename = "Abstract", default)]
    abstract_: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
    #[serde(rename = "Answer", default)]
    answer: String,
    #[serde(rename = "Definition", default)]
    definition: String,
    #[serde(rename = "DefinitionURL", default)]
    definition_url: String,
}

#[derive(Deserialize, Default)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
}

/// DuckDuckGo Instant Answer client. All failures are absorbed into
/// degraded result strings so search never breaks the conversation.
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Runs a search and formats the result as markdown.
    pub async fn search(&self, query: &str) -> String {
        let result = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return "⏳ Search request timed out. Please try again.".to_string();
            }
            Err(e) => {
                tracing::error!("Search API error: {}", e);
                return "❌ Search service error. Please try again later.".to_string();
            }
        };

        if !response.status().is_success() {
            return format!("❌ Search service unavailable (Status: {})", response.status().as_u16());
        }

        let data = match response.json::<InstantAnswer>().await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Search response parse error: {}", e);
                return "❌ Search service returned an unreadable response.".to_string();
            }
        };

        format_results(&data, query).unwrap_or_else(|| fallback_text(query))
    }
}

/// Formats an instant answer into markdown, or `None` when nothing matched.
fn format_results(data: &InstantAnswer, query: &str) -> Option<String> {
    let mut results: Vec<String> = Vec::new();

    if !data.abstract_.is_empty() {
        results.push(format!("## 🔍 Search Results for: {}\n", query));
        results.push(format!("**{}**\n", data.abstract_text));
        if !data.abstract_url.is_empty() {
            results.push(format!("[Read more]({})\n", data.abstract_url));
        }
    }

    let topics: Vec<&RelatedTopic> = data
        .related_topics
        .iter()
        .filter(|t| !t.text.is_empty())
        .take(MAX_RELATED_TOPICS)
        .collect();
    if !topics.is_empty() {
        results.push("### Related Topics:\n".to_string());
        for (i, topic) in topics.iter().enumerate() {
            results.push(format!("{}. {}", i + 1, topic.text));
            if !topic.first_url.is_empty() {
                results.push(format!("   [Link]({})", topic.first_url));
            }
            results.push(String::new());
        }
    }

    if !data.answer.is_empty() {
        results.push(format!("### Quick Answer:\n{}\n", data.answer));
    }

    if !data.definition.is_empty() {
        results.push(format!("### Definition:\n{}", data.definition));
        if !data.definition_url.is_empty() {
            results.push(format!("[Source]({})", data.definition_url));
        }
        results.push(String::new());
    }

    if results.is_empty() {
        None
    } else {
        Some(results.join("\n"))
    }
}

/// The fixed text returned when the instant answer came back empty.
fn fallback_text(query: &str) -> String {
    format!(
        "## 🔍 Search Results for: {}\n\n\
        I apologize, but I couldn't find specific results for your query using the search service.\n\n\
        **Suggestions:**\n\
        - Try rephrasing your search with different keywords\n\
        - Use more general terms\n\
        - Check your spelling\n\n\
        Feel free to ask me directly about the topic - I might be able to help based on my training data!",
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_abstract_answer_and_definition() {
        let raw = r#"{
            "Abstract": "Rust is a systems programming language.",
            "AbstractText": "Rust is a systems programming language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
            "RelatedTopics": [
                {"Text": "Cargo - the Rust package manager", "FirstURL": "https://doc.rust-lang.org/cargo/"},
                {"Text": "", "FirstURL": "https://ignored.example"}
            ],
            "Answer": "42",
            "Definition": "A language empowering everyone.",
            "DefinitionURL": "https://www.rust-lang.org/"
        }"#;
        let data: InstantAnswer = sonic_rs::from_str(raw).unwrap();
        let formatted = format_results(&data, "rust language").unwrap();

        assert!(formatted.contains("## 🔍 Search Results for: rust language"));
        assert!(formatted.contains("**Rust is a systems programming language.**"));
        assert!(formatted.contains("1. Cargo - the Rust package manager"));
        assert!(formatted.contains("### Quick Answer:\n42"));
        assert!(formatted.contains("[Source](https://www.rust-lang.org/)"));
        // topics without text are dropped
        assert!(!formatted.contains("ignored.example"));
    }

    #[test]
    fn caps_related_topics() {
        let topics: Vec<String> = (0..8)
            .map(|i| format!(r#"{{"Text": "topic {}", "FirstURL": ""}}"#, i))
            .collect();
        let raw = format!(r#"{{"RelatedTopics": [{}]}}"#, topics.join(","));
        let data: InstantAnswer = sonic_rs::from_str(&raw).unwrap();
        let formatted = format_results(&data, "q").unwrap();
        assert!(formatted.contains("5. topic 4"));
        assert!(!formatted.contains("topic 5"));
    }

    #[test]
    fn empty_answer_falls_back() {
        let data = InstantAnswer::default();
        assert!(format_results(&data, "obscure thing").is_none());
        let fallback = fallback_text("obscure thing");
        assert!(fallback.contains("obscure thing"));
        assert!(fallback.contains("Suggestions"));
    }
}

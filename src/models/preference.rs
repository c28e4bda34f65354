use serde::{Deserialize, Serialize};

/// The model used when an identity has expressed no preference.
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

/// An identity's preferred chat model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPreference {
    pub preferred_model: String,
}

impl Default for ModelPreference {
    fn default() -> Self {
        Self {
            preferred_model: DEFAULT_MODEL.to_string(),
        }
    }
}

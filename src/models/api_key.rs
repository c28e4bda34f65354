use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// The fixed enumeration of provider services a credential can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Chat completions; rotation-capable (multiple keys, probed in order).
    Openrouter,
    /// Image description; single-key.
    GoogleAi,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Openrouter => "openrouter",
            ServiceKind::GoogleAi => "google_ai",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openrouter" => Ok(ServiceKind::Openrouter),
            "google_ai" => Ok(ServiceKind::GoogleAi),
            other => Err(AppError::Validation(format!(
                "Unknown service: {}",
                other
            ))),
        }
    }
}

/// A stored provider credential. `encrypted_key` is the vault ciphertext;
/// plaintext never leaves the key selector.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: i32,
    pub service: ServiceKind,
    pub key_name: String,
    pub encrypted_key: String,
    pub is_active: bool,
    pub is_default: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// A masked trailing-characters view safe to return to clients.
    pub fn masked(&self) -> String {
        if self.encrypted_key.len() > 4 {
            format!("{}{}", "*".repeat(20), &self.encrypted_key[self.encrypted_key.len() - 4..])
        } else {
            "*".repeat(24)
        }
    }
}

/// The wire shape of a credential in admin listings.
#[derive(Debug, Serialize)]
pub struct ApiKeyView {
    pub id: i32,
    pub service: ServiceKind,
    pub key_name: String,
    pub masked_key: String,
    pub is_active: bool,
    pub is_default: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyView {
    fn from(key: ApiKey) -> Self {
        let masked_key = key.masked();
        Self {
            id: key.id,
            service: key.service,
            key_name: key.key_name,
            masked_key,
            is_active: key.is_active,
            is_default: key.is_default,
            last_used: key.last_used,
            created_at: key.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_with_ciphertext(ciphertext: &str) -> ApiKey {
        ApiKey {
            id: 1,
            service: ServiceKind::Openrouter,
            key_name: "primary".to_string(),
            encrypted_key: ciphertext.to_string(),
            is_active: true,
            is_default: false,
            last_used: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn masked_view_keeps_only_trailing_characters() {
        let key = key_with_ciphertext("AAAABBBBCCCCDDDDwxyz");
        assert_eq!(key.masked(), format!("{}wxyz", "*".repeat(20)));
    }

    #[test]
    fn masked_view_of_short_ciphertext_is_fully_opaque() {
        let key = key_with_ciphertext("abc");
        assert_eq!(key.masked(), "*".repeat(24));
    }

    #[test]
    fn service_kind_round_trips_through_str() {
        assert_eq!("openrouter".parse::<ServiceKind>().unwrap(), ServiceKind::Openrouter);
        assert_eq!("google_ai".parse::<ServiceKind>().unwrap(), ServiceKind::GoogleAi);
        assert!("stability".parse::<ServiceKind>().is_err());
    }
}

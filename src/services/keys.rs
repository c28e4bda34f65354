use deadpool_postgres::Pool;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::{
    crypto::vault::KeyVault,
    error::Result,
    models::api_key::ServiceKind,
    repositories::api_key as api_key_repo,
};

/// Timeout for credential liveness probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Chooses a working provider credential for a service.
///
/// OpenRouter keys are rotation-capable: candidates are probed in order and
/// the first live one wins. Probe failures are logged and skipped; they are
/// graceful degradation, not errors. Decryption failures do propagate, as
/// they mean the vault secret no longer matches the stored ciphertexts.
#[derive(Clone)]
pub struct KeySelector {
    db: Pool,
    vault: Arc<KeyVault>,
    http: reqwest::Client,
    openrouter_base_url: String,
}

impl KeySelector {
    pub fn new(db: Pool, vault: Arc<KeyVault>, http: reqwest::Client, openrouter_base_url: String) -> Self {
        Self {
            db,
            vault,
            http,
            openrouter_base_url,
        }
    }

    /// Returns a decrypted credential for the service, or `None` when no
    /// candidate is usable (caller treats that as "service unavailable").
    pub async fn get_key(&self, service: ServiceKind) -> Result<Option<Zeroizing<String>>> {
        let candidates = api_key_repo::list_active(&self.db, service).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        match service {
            ServiceKind::GoogleAi => {
                // single-key service, no probe
                let key = &candidates[0];
                let secret = self.vault.decrypt(&key.encrypted_key)?;
                self.touch(key.id).await;
                Ok(Some(secret))
            }
            ServiceKind::Openrouter => {
                for key in &candidates {
                    let secret = self.vault.decrypt(&key.encrypted_key)?;
                    if self.probe_openrouter(&secret).await {
                        self.touch(key.id).await;
                        return Ok(Some(secret));
                    }
                    tracing::warn!("⚠️  OpenRouter key '{}' failed liveness probe, rotating", key.key_name);
                }
                tracing::warn!("⚠️  No OpenRouter key passed its liveness probe");
                Ok(None)
            }
        }
    }

    /// Lightweight liveness probe: a model listing with the candidate key.
    async fn probe_openrouter(&self, api_key: &str) -> bool {
        let result = self
            .http
            .get(format!("{}/models", self.openrouter_base_url))
            .bearer_auth(api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("⚠️  OpenRouter probe request failed: {}", e);
                false
            }
        }
    }

    async fn touch(&self, key_id: i32) {
        if let Err(e) = api_key_repo::touch_last_used(&self.db, key_id).await {
            tracing::warn!("⚠️  Failed to stamp last_used for key {}: {}", key_id, e);
        }
    }
}

use deadpool_postgres::Pool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Fetches every system setting as a key/value map.
pub async fn all(pool: &Pool) -> Result<HashMap<String, String>> {
    let client = pool.get().await?;
    let rows = client
        .query("SELECT setting_key, setting_value FROM system_settings", &[])
        .await?;

    let mut settings = HashMap::with_capacity(rows.len());
    for row in &rows {
        let key: String = row
            .try_get("setting_key")
            .map_err(|_| AppError::MissingData("setting_key".to_string()))?;
        let value: String = row
            .try_get("setting_value")
            .map_err(|_| AppError::MissingData("setting_value".to_string()))?;
        settings.insert(key, value);
    }
    Ok(settings)
}

/// Upserts a system setting, recording who changed it.
pub async fn set(pool: &Pool, key: &str, value: &str, updated_by: &Uuid) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO system_settings (setting_key, setting_value, updated_by)
            VALUES ($1, $2, $3)
            ON CONFLICT (setting_key)
            DO UPDATE SET setting_value = EXCLUDED.setting_value,
                          updated_by = EXCLUDED.updated_by,
                          updated_at = NOW()
            "#,
            &[&key, &value, updated_by],
        )
        .await?;
    Ok(())
}
